/// Detection events
///
/// Closed set of event types and ordered severities produced by the
/// detector and owned by the session ledger.

use crate::features::FeatureSet;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of detection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Silence,
    AmplitudeIncrease,
    AmplitudeDecrease,
    FrequencyShift,
    Clipping,
    SpectralChange,
}

impl EventType {
    pub const ALL: [EventType; 6] = [
        EventType::Silence,
        EventType::AmplitudeIncrease,
        EventType::AmplitudeDecrease,
        EventType::FrequencyShift,
        EventType::Clipping,
        EventType::SpectralChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Silence => "silence",
            EventType::AmplitudeIncrease => "amplitude_increase",
            EventType::AmplitudeDecrease => "amplitude_decrease",
            EventType::FrequencyShift => "frequency_shift",
            EventType::Clipping => "clipping",
            EventType::SpectralChange => "spectral_change",
        }
    }

    /// Whether the rule compares against the session baseline
    pub fn is_baseline_relative(&self) -> bool {
        matches!(
            self,
            EventType::AmplitudeIncrease
                | EventType::AmplitudeDecrease
                | EventType::FrequencyShift
                | EventType::SpectralChange
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Urgency of an event, ordered low < medium < high < critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified, timestamped detection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    timestamp: DateTime<Utc>,
    event_type: EventType,
    description: String,
    severity: Severity,
    features: FeatureSet,

    /// Triggering audio, kept only for recording; never exported
    #[serde(skip)]
    snippet: Option<Vec<f32>>,
}

impl Event {
    pub fn new(
        timestamp: DateTime<Utc>,
        event_type: EventType,
        description: impl Into<String>,
        severity: Severity,
        features: FeatureSet,
    ) -> Self {
        Self {
            timestamp,
            event_type,
            description: description.into(),
            severity,
            features,
            snippet: None,
        }
    }

    /// Attach the triggering chunk's samples
    pub fn with_snippet(mut self, samples: Vec<f32>) -> Self {
        self.snippet = Some(samples);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn features(&self) -> &FeatureSet {
        &self.features
    }

    pub fn snippet(&self) -> Option<&[f32]> {
        self.snippet.as_deref()
    }

    /// Copy of the event without its audio snippet
    pub fn without_snippet(&self) -> Self {
        Self {
            snippet: None,
            ..self.clone()
        }
    }
}
