/// Session ledger
///
/// Append-only record of the events raised during one monitoring session,
/// with summary aggregation and JSON export.

use crate::baseline::Baseline;
use crate::event::{Event, EventType, Severity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Event at {event} is older than the last recorded event at {last}")]
    OutOfOrder {
        event: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("Baseline already established for this session")]
    BaselineAlreadySet,

    #[error("Session already finished")]
    Finished,

    #[error("Export I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Export serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Aggregate view of a session, always derived from the current event list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_start: DateTime<Utc>,
    pub duration_seconds: f64,
    pub total_events: usize,
    pub events_by_type: BTreeMap<EventType, usize>,
    pub events_by_severity: BTreeMap<Severity, usize>,
    pub baseline: Option<Baseline>,
}

/// Persisted form of a session; audio snippets are not included
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportDocument {
    pub summary: SessionSummary,
    pub events: Vec<Event>,
}

impl ExportDocument {
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, LedgerError> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::from_reader(File::open(path)?)
    }
}

/// One monitoring session
#[derive(Debug, Clone)]
pub struct Session {
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    baseline: Option<Baseline>,
    events: Vec<Event>,
}

impl Session {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            ended_at: None,
            baseline: None,
            events: Vec::new(),
        }
    }

    /// Record the session baseline; it cannot be replaced afterwards
    pub fn set_baseline(&mut self, baseline: Baseline) -> Result<(), LedgerError> {
        if self.baseline.is_some() {
            return Err(LedgerError::BaselineAlreadySet);
        }
        self.baseline = Some(baseline);
        Ok(())
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    /// Append an event; timestamps must be non-decreasing
    pub fn append(&mut self, event: Event) -> Result<&Event, LedgerError> {
        if self.ended_at.is_some() {
            return Err(LedgerError::Finished);
        }

        if let Some(last) = self.last_event_timestamp() {
            if event.timestamp() < last {
                return Err(LedgerError::OutOfOrder {
                    event: event.timestamp(),
                    last,
                });
            }
        }

        self.events.push(event);
        Ok(&self.events[self.events.len() - 1])
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    /// The most recent `count` events, oldest first
    pub fn recent(&self, count: usize) -> &[Event] {
        let start = self.events.len().saturating_sub(count);
        &self.events[start..]
    }

    pub fn last_event_timestamp(&self) -> Option<DateTime<Utc>> {
        self.events.last().map(Event::timestamp)
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    pub fn is_finished(&self) -> bool {
        self.ended_at.is_some()
    }

    /// Fix the session end time; later calls keep the first value
    pub fn finish(&mut self, ended_at: DateTime<Utc>) {
        if self.ended_at.is_none() {
            self.ended_at = Some(ended_at.max(self.started_at));
        }
    }

    /// Elapsed seconds; measured against now while the session is open
    pub fn duration_seconds(&self) -> f64 {
        let end = self.ended_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as f64 / 1000.0
    }

    pub fn summary(&self) -> SessionSummary {
        let mut events_by_type = BTreeMap::new();
        let mut events_by_severity = BTreeMap::new();

        for event in &self.events {
            *events_by_type.entry(event.event_type()).or_insert(0) += 1;
            *events_by_severity.entry(event.severity()).or_insert(0) += 1;
        }

        SessionSummary {
            session_start: self.started_at,
            duration_seconds: self.duration_seconds(),
            total_events: self.events.len(),
            events_by_type,
            events_by_severity,
            baseline: self.baseline,
        }
    }

    pub fn export_document(&self) -> ExportDocument {
        ExportDocument {
            summary: self.summary(),
            events: self.events.iter().map(Event::without_snippet).collect(),
        }
    }

    /// Write the summary and event list as pretty-printed JSON
    pub fn export<W: Write>(&self, writer: W) -> Result<(), LedgerError> {
        serde_json::to_writer_pretty(writer, &self.export_document())?;
        Ok(())
    }

    pub fn export_to_file(&self, path: impl AsRef<Path>) -> Result<(), LedgerError> {
        let path = path.as_ref();
        let mut writer = BufWriter::new(File::create(path)?);
        self.export(&mut writer)?;
        writer.flush()?;

        info!("Session data exported to: {}", path.display());
        Ok(())
    }
}
