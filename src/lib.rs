/// Environmental audio monitor library
///
/// Streams microphone audio in fixed-size chunks, compares each chunk's
/// features against a baseline taken at session start, and records
/// classified events in a per-session ledger.

pub mod baseline;
pub mod capture;
pub mod config;
pub mod detector;
pub mod event;
pub mod features;
pub mod monitor;
pub mod session;
pub mod sink;

// Re-export main types
pub use baseline::{Baseline, BaselineEstimator};
pub use capture::{
    chunk_channel, list_input_devices, probe_capture, AudioChunk, AudioSource, CaptureAvailability,
    CaptureError, ChunkAssembler, CpalSource, ReplaySource,
};
pub use config::{ConfigError, MonitorConfig, ThresholdConfig};
pub use detector::EventDetector;
pub use event::{Event, EventType, Severity};
pub use features::{FeatureError, FeatureExtractor, FeatureSet, SpectralFeatureExtractor};
pub use monitor::{AudioMonitor, MonitorError, MonitorHandle, MonitorStats};
pub use session::{ExportDocument, LedgerError, Session, SessionSummary};
pub use sink::{ChannelSink, LogSink, NotificationSink, SinkError, WavRecorder};
