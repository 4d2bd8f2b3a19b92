/// Monitor configuration
///
/// Capture cadence, baseline warm-up, loop timing and detection thresholds.
/// Loaded from defaults, an optional JSON file and `ACOUSTIC_MONITOR_*`
/// environment overrides.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default capture sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default analysis chunk length in seconds
pub const DEFAULT_CHUNK_DURATION_SECS: f64 = 1.0;

/// Number of chunks the baseline is computed from
pub const DEFAULT_BASELINE_CHUNKS: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid value for {var}: {value}")]
    Env { var: String, value: String },
}

/// Detection sensitivity parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdConfig {
    /// RMS energy below which a chunk counts as silent
    pub amplitude_threshold: f64,

    /// Dominant frequency deviation from baseline (Hz) that raises a shift
    pub frequency_change_threshold: f64,

    /// Minimum seconds since the previous event before another silence event
    pub silence_duration_threshold: f64,

    /// Reserved; accepted and carried but not consulted by any rule
    pub anomaly_sensitivity: f64,

    /// Spectral centroid deviation from baseline (Hz) that raises a spectral change
    pub spectral_change_threshold: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            amplitude_threshold: 0.01,
            frequency_change_threshold: 100.0,
            silence_duration_threshold: 5.0,
            anomaly_sensitivity: 0.8,
            spectral_change_threshold: 1000.0,
        }
    }
}

impl ThresholdConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_negative = [
            ("amplitude_threshold", self.amplitude_threshold),
            ("frequency_change_threshold", self.frequency_change_threshold),
            ("silence_duration_threshold", self.silence_duration_threshold),
            ("spectral_change_threshold", self.spectral_change_threshold),
        ];

        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.anomaly_sensitivity) {
            return Err(ConfigError::Invalid(
                "anomaly_sensitivity must be between 0.0 and 1.0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration for a monitoring session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Capture sample rate (Hz)
    pub sample_rate: u32,

    /// Analysis chunk length (seconds)
    pub chunk_duration_secs: f64,

    /// Input device index or name substring (None = system default)
    pub device: Option<String>,

    /// Chunks collected for the baseline at session start
    pub baseline_chunks: usize,

    /// Wait before draining baseline chunks (milliseconds)
    pub warmup_ms: u64,

    /// Maximum wait for each baseline chunk (milliseconds)
    pub baseline_chunk_timeout_ms: u64,

    /// Queue poll timeout for the analysis loop (milliseconds)
    pub poll_interval_ms: u64,

    /// Session length limit in seconds (None = until stopped)
    pub max_duration_secs: Option<f64>,

    /// Directory for event recordings (None = recording disabled)
    pub recording_dir: Option<PathBuf>,

    pub thresholds: ThresholdConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_duration_secs: DEFAULT_CHUNK_DURATION_SECS,
            device: None,
            baseline_chunks: DEFAULT_BASELINE_CHUNKS,
            warmup_ms: 1000,
            baseline_chunk_timeout_ms: 2000,
            poll_interval_ms: 100,
            max_duration_secs: None,
            recording_dir: None,
            thresholds: ThresholdConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from a JSON file; missing fields take defaults
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = serde_json::from_str(&raw)?;
        debug!("Loaded monitor config from {}", path.display());
        Ok(config)
    }

    /// Apply `ACOUSTIC_MONITOR_*` environment overrides
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|name| std::env::var(name).ok())
    }

    fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parse<T: std::str::FromStr>(var: &str, value: String) -> Result<T, ConfigError> {
            let parsed: Option<T> = value.trim().parse().ok();
            parsed.ok_or(ConfigError::Env { var: var.to_string(), value })
        }

        if let Some(v) = lookup("ACOUSTIC_MONITOR_SAMPLE_RATE") {
            self.sample_rate = parse("ACOUSTIC_MONITOR_SAMPLE_RATE", v)?;
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_CHUNK_DURATION") {
            self.chunk_duration_secs = parse("ACOUSTIC_MONITOR_CHUNK_DURATION", v)?;
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_DEVICE") {
            self.device = Some(v);
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_RECORDING_DIR") {
            self.recording_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_AMPLITUDE_THRESHOLD") {
            self.thresholds.amplitude_threshold = parse("ACOUSTIC_MONITOR_AMPLITUDE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_FREQUENCY_CHANGE_THRESHOLD") {
            self.thresholds.frequency_change_threshold =
                parse("ACOUSTIC_MONITOR_FREQUENCY_CHANGE_THRESHOLD", v)?;
        }
        if let Some(v) = lookup("ACOUSTIC_MONITOR_SILENCE_DURATION_THRESHOLD") {
            self.thresholds.silence_duration_threshold =
                parse("ACOUSTIC_MONITOR_SILENCE_DURATION_THRESHOLD", v)?;
        }

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate == 0 {
            return Err(ConfigError::Invalid("sample_rate must be greater than 0".to_string()));
        }

        if !self.chunk_duration_secs.is_finite() || self.chunk_duration_secs <= 0.0 {
            return Err(ConfigError::Invalid(
                "chunk_duration_secs must be greater than 0".to_string(),
            ));
        }

        if self.chunk_size() == 0 {
            return Err(ConfigError::Invalid(format!(
                "chunk of {}s at {} Hz holds no samples",
                self.chunk_duration_secs, self.sample_rate
            )));
        }

        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_interval_ms must be greater than 0".to_string(),
            ));
        }

        if let Some(limit) = self.max_duration_secs {
            if !limit.is_finite() || limit < 0.0 {
                return Err(ConfigError::Invalid(
                    "max_duration_secs must be a non-negative number".to_string(),
                ));
            }
        }

        self.thresholds.validate()
    }

    /// Samples per analysis chunk
    pub fn chunk_size(&self) -> usize {
        (self.sample_rate as f64 * self.chunk_duration_secs) as usize
    }

    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn baseline_chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.baseline_chunk_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs_f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.chunk_size(), 44100);
        assert_eq!(config.baseline_chunks, 10);
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert_eq!(config.thresholds.spectral_change_threshold, 1000.0);
    }

    #[test]
    fn test_chunk_size_truncates() {
        let config = MonitorConfig {
            sample_rate: 22050,
            chunk_duration_secs: 0.5,
            ..Default::default()
        };
        assert_eq!(config.chunk_size(), 11025);
    }

    #[test]
    fn test_validation() {
        let mut config = MonitorConfig::default();
        config.sample_rate = 0;
        assert!(config.validate().is_err());

        config.sample_rate = 16000;
        config.chunk_duration_secs = 0.00001;
        assert!(config.validate().is_err());

        config.chunk_duration_secs = 1.0;
        config.thresholds.anomaly_sensitivity = 1.5;
        assert!(config.validate().is_err());

        config.thresholds.anomaly_sensitivity = 0.5;
        config.thresholds.frequency_change_threshold = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"sample_rate": 16000, "thresholds": {{"amplitude_threshold": 0.005}}}}"#
        )
        .unwrap();

        let config = MonitorConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.sample_rate, 16000);
        assert_eq!(config.thresholds.amplitude_threshold, 0.005);
        assert_eq!(config.thresholds.frequency_change_threshold, 100.0);
        assert_eq!(config.chunk_duration_secs, 1.0);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ACOUSTIC_MONITOR_SAMPLE_RATE", "48000"),
            ("ACOUSTIC_MONITOR_DEVICE", "USB Mic"),
            ("ACOUSTIC_MONITOR_SILENCE_DURATION_THRESHOLD", "2.5"),
        ]
        .into_iter()
        .collect();

        let mut config = MonitorConfig::default();
        config
            .apply_vars(|name| vars.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.sample_rate, 48000);
        assert_eq!(config.device.as_deref(), Some("USB Mic"));
        assert_eq!(config.thresholds.silence_duration_threshold, 2.5);
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = MonitorConfig::default();
        let result = config.apply_vars(|name| {
            (name == "ACOUSTIC_MONITOR_SAMPLE_RATE").then(|| "fast".to_string())
        });

        match result {
            Err(ConfigError::Env { var, value }) => {
                assert_eq!(var, "ACOUSTIC_MONITOR_SAMPLE_RATE");
                assert_eq!(value, "fast");
            }
            other => panic!("Expected Env error, got {:?}", other),
        }
    }
}
