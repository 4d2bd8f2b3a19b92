/// Event detection rules
///
/// Stateless rule table evaluated against one chunk's features. Every rule
/// is checked independently and in a fixed order; one chunk can yield
/// several events. Debounce state (the last event time) is supplied by the
/// caller from the session ledger.

use crate::baseline::Baseline;
use crate::config::ThresholdConfig;
use crate::event::{Event, EventType, Severity};
use crate::features::FeatureSet;
use chrono::{DateTime, Utc};
use tracing::debug;

/// Amplitude ratio above which a chunk is significantly louder than baseline
pub const AMPLITUDE_INCREASE_RATIO: f64 = 2.0;

/// Amplitude ratio at or above which an increase is high severity
pub const AMPLITUDE_HIGH_RATIO: f64 = 5.0;

/// Amplitude ratio below which a chunk is significantly quieter than baseline
pub const AMPLITUDE_DECREASE_RATIO: f64 = 0.3;

#[derive(Debug, Default, Clone, Copy)]
pub struct EventDetector;

impl EventDetector {
    pub fn new() -> Self {
        Self
    }

    /// Evaluate all rules for one chunk
    ///
    /// `last_event` is the timestamp of the most recent event recorded in the
    /// session (any type) and drives the silence debounce. Baseline-relative
    /// rules are skipped when `baseline` is `None`.
    pub fn detect(
        &self,
        features: &FeatureSet,
        baseline: Option<&Baseline>,
        thresholds: &ThresholdConfig,
        last_event: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Vec<Event> {
        let mut events = Vec::new();
        let event = |event_type, description: String, severity| {
            Event::new(now, event_type, description, severity, features.clone())
        };

        if features.rms_energy < thresholds.amplitude_threshold {
            let debounced = match last_event {
                None => true,
                Some(last) => seconds_between(last, now) > thresholds.silence_duration_threshold,
            };
            if debounced {
                events.push(event(
                    EventType::Silence,
                    format!("Environment became quiet (amplitude: {:.6})", features.rms_energy),
                    Severity::Low,
                ));
            }
        }

        if let Some(baseline) = baseline {
            // A zero-energy baseline has no meaningful ratio
            if baseline.amplitude > 0.0 {
                let ratio = features.rms_energy / baseline.amplitude;
                if ratio > AMPLITUDE_INCREASE_RATIO {
                    let severity = if ratio >= AMPLITUDE_HIGH_RATIO {
                        Severity::High
                    } else {
                        Severity::Medium
                    };
                    events.push(event(
                        EventType::AmplitudeIncrease,
                        format!("Significant volume increase ({:.1}x baseline)", ratio),
                        severity,
                    ));
                } else if ratio < AMPLITUDE_DECREASE_RATIO {
                    events.push(event(
                        EventType::AmplitudeDecrease,
                        format!("Significant volume decrease ({:.1}x baseline)", ratio),
                        Severity::Low,
                    ));
                }
            }

            if let Some(frequency) = features.dominant_frequency {
                let shift = (frequency - baseline.frequency).abs();
                if shift > thresholds.frequency_change_threshold {
                    events.push(event(
                        EventType::FrequencyShift,
                        format!("Frequency shift detected: {:.1} Hz from baseline", shift),
                        Severity::Medium,
                    ));
                }
            }
        }

        if features.clipping_detected {
            events.push(event(
                EventType::Clipping,
                format!(
                    "Audio clipping detected ({:.4} ratio)",
                    features.clipped_sample_ratio
                ),
                Severity::High,
            ));
        }

        if let Some(baseline) = baseline {
            let deviation = (features.spectral_centroid_mean - baseline.spectral_centroid).abs();
            if deviation > thresholds.spectral_change_threshold {
                events.push(event(
                    EventType::SpectralChange,
                    format!(
                        "Unusual spectral characteristics detected ({:.1} Hz centroid deviation)",
                        deviation
                    ),
                    Severity::Medium,
                ));
            }
        }

        if !events.is_empty() {
            debug!(
                "Chunk at {} raised {} event(s): {:?}",
                now,
                events.len(),
                events.iter().map(Event::event_type).collect::<Vec<_>>()
            );
        }

        events
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_microseconds().unwrap_or(i64::MAX) as f64 / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn features(rms_energy: f64) -> FeatureSet {
        FeatureSet {
            duration: 1.0,
            sample_rate: 44100,
            num_samples: 44100,
            rms_energy,
            max_amplitude: rms_energy * 1.4,
            spectral_centroid_mean: 1500.0,
            spectral_centroid_std: 10.0,
            spectral_rolloff_mean: 3000.0,
            zero_crossing_rate_mean: 0.05,
            dominant_frequency: Some(440.0),
            clipping_detected: false,
            clipped_sample_ratio: 0.0,
            silence_ratio: 0.0,
            dc_offset: 0.0,
            dynamic_range_db: 3.0,
        }
    }

    fn baseline() -> Baseline {
        Baseline {
            amplitude: 0.01,
            frequency: 440.0,
            spectral_centroid: 1500.0,
        }
    }

    fn types(events: &[Event]) -> Vec<EventType> {
        events.iter().map(Event::event_type).collect()
    }

    #[test]
    fn test_silence_fires_without_prior_event() {
        let now = Utc::now();
        let events = EventDetector.detect(
            &features(0.001),
            None,
            &ThresholdConfig::default(),
            None,
            now,
        );

        assert_eq!(types(&events), vec![EventType::Silence]);
        assert_eq!(events[0].severity(), Severity::Low);
        assert_eq!(events[0].timestamp(), now);
    }

    #[test]
    fn test_silence_debounce() {
        let thresholds = ThresholdConfig::default();
        let last = Utc::now();

        let within = EventDetector.detect(
            &features(0.001),
            None,
            &thresholds,
            Some(last),
            last + Duration::seconds(1),
        );
        assert!(within.is_empty());

        let at_limit = EventDetector.detect(
            &features(0.001),
            None,
            &thresholds,
            Some(last),
            last + Duration::seconds(5),
        );
        assert!(at_limit.is_empty());

        let after = EventDetector.detect(
            &features(0.001),
            None,
            &thresholds,
            Some(last),
            last + Duration::seconds(6),
        );
        assert_eq!(types(&after), vec![EventType::Silence]);
    }

    #[test]
    fn test_amplitude_increase_severity() {
        let thresholds = ThresholdConfig::default();
        let now = Utc::now();

        let medium = EventDetector.detect(
            &features(0.025),
            Some(&baseline()),
            &thresholds,
            None,
            now,
        );
        assert_eq!(types(&medium), vec![EventType::AmplitudeIncrease]);
        assert_eq!(medium[0].severity(), Severity::Medium);

        let high = EventDetector.detect(&features(0.06), Some(&baseline()), &thresholds, None, now);
        assert_eq!(types(&high), vec![EventType::AmplitudeIncrease]);
        assert_eq!(high[0].severity(), Severity::High);

        let exactly_five = EventDetector.detect(
            &features(0.05),
            Some(&baseline()),
            &thresholds,
            None,
            now,
        );
        assert_eq!(exactly_five[0].severity(), Severity::High);
    }

    #[test]
    fn test_amplitude_decrease() {
        let thresholds = ThresholdConfig {
            amplitude_threshold: 0.0,
            ..Default::default()
        };
        let events = EventDetector.detect(
            &features(0.002),
            Some(&baseline()),
            &thresholds,
            None,
            Utc::now(),
        );

        assert_eq!(types(&events), vec![EventType::AmplitudeDecrease]);
        assert_eq!(events[0].severity(), Severity::Low);
    }

    #[test]
    fn test_frequency_shift() {
        let thresholds = ThresholdConfig::default();
        let now = Utc::now();

        let mut shifted = features(0.01);
        shifted.dominant_frequency = Some(600.0);
        let events = EventDetector.detect(&shifted, Some(&baseline()), &thresholds, None, now);
        assert_eq!(types(&events), vec![EventType::FrequencyShift]);
        assert_eq!(events[0].severity(), Severity::Medium);

        let mut close = features(0.01);
        close.dominant_frequency = Some(500.0);
        assert!(EventDetector.detect(&close, Some(&baseline()), &thresholds, None, now).is_empty());

        let mut missing = features(0.01);
        missing.dominant_frequency = None;
        let events = EventDetector.detect(&missing, Some(&baseline()), &thresholds, None, now);
        assert!(events.is_empty());
    }

    #[test]
    fn test_clipping_without_baseline() {
        let mut clipped = features(0.5);
        clipped.clipping_detected = true;
        clipped.clipped_sample_ratio = 0.02;

        let events = EventDetector.detect(
            &clipped,
            None,
            &ThresholdConfig::default(),
            None,
            Utc::now(),
        );
        assert_eq!(types(&events), vec![EventType::Clipping]);
        assert_eq!(events[0].severity(), Severity::High);
        assert!(events[0].description().contains("0.0200"));
    }

    #[test]
    fn test_spectral_change() {
        let thresholds = ThresholdConfig::default();
        let now = Utc::now();

        let mut bright = features(0.01);
        bright.spectral_centroid_mean = 2600.0;
        let events = EventDetector.detect(&bright, Some(&baseline()), &thresholds, None, now);
        assert_eq!(types(&events), vec![EventType::SpectralChange]);
        assert_eq!(events[0].severity(), Severity::Medium);

        bright.spectral_centroid_mean = 2500.0;
        let events = EventDetector.detect(&bright, Some(&baseline()), &thresholds, None, now);
        assert!(events.is_empty());
    }

    #[test]
    fn test_multiple_rules_fire_in_order() {
        let mut loud = features(0.08);
        loud.dominant_frequency = Some(2000.0);
        loud.clipping_detected = true;
        loud.spectral_centroid_mean = 5000.0;

        let events = EventDetector.detect(
            &loud,
            Some(&baseline()),
            &ThresholdConfig::default(),
            None,
            Utc::now(),
        );
        assert_eq!(
            types(&events),
            vec![
                EventType::AmplitudeIncrease,
                EventType::FrequencyShift,
                EventType::Clipping,
                EventType::SpectralChange
            ]
        );
        assert!(events.iter().all(|e| e.features() == &loud));
    }

    #[test]
    fn test_no_baseline_relative_events_without_baseline() {
        let mut extreme = features(10.0);
        extreme.dominant_frequency = Some(15000.0);
        extreme.spectral_centroid_mean = 20000.0;

        let events = EventDetector.detect(
            &extreme,
            None,
            &ThresholdConfig::default(),
            None,
            Utc::now(),
        );
        assert!(events.iter().all(|e| !e.event_type().is_baseline_relative()));
    }

    #[test]
    fn test_zero_amplitude_baseline_skips_ratio_rules() {
        let silent_baseline = Baseline {
            amplitude: 0.0,
            ..baseline()
        };
        let events = EventDetector.detect(
            &features(0.5),
            Some(&silent_baseline),
            &ThresholdConfig::default(),
            None,
            Utc::now(),
        );
        assert!(events.is_empty());
    }
}
