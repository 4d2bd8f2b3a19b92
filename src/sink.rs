/// Notification sinks
///
/// Every event appended to the session is handed to each registered sink in
/// turn. Sinks fail independently; the monitor logs the error and moves on.

use crate::event::{Event, Severity};
use hound::{WavSpec, WavWriter};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Sink channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Sink rejected event: {0}")]
    Rejected(String),
}

/// Receiver of detection events
#[cfg_attr(test, mockall::automock)]
pub trait NotificationSink: Send {
    /// Short identifier used in logs
    fn name(&self) -> &'static str;

    fn notify(&mut self, event: &Event) -> Result<(), SinkError>;
}

/// Logs each event through tracing
#[derive(Debug, Default)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, event: &Event) -> Result<(), SinkError> {
        let timestamp = event.timestamp().format("%H:%M:%S");
        match event.severity() {
            Severity::Low | Severity::Medium => info!(
                "[{}] {} ({}): {}",
                timestamp,
                event.event_type(),
                event.severity(),
                event.description()
            ),
            Severity::High | Severity::Critical => warn!(
                "[{}] {} ({}): {}",
                timestamp,
                event.event_type(),
                event.severity(),
                event.description()
            ),
        }
        Ok(())
    }
}

/// Forwards events to an async consumer
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> Self {
        Self { tx }
    }

    /// Create a sink together with the receiving end
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl NotificationSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn notify(&mut self, event: &Event) -> Result<(), SinkError> {
        self.tx.send(event.clone()).map_err(|_| SinkError::ChannelClosed)
    }
}

/// Writes each event's retained snippet as a 16-bit mono WAV file
///
/// Files are named `<YYYYmmdd_HHMMSS>_<event_type>.wav`; a numeric suffix
/// is added when that name is already taken. The file takes the sample
/// rate of the chunk the event was detected in.
pub struct WavRecorder {
    dir: PathBuf,
}

impl WavRecorder {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, SinkError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("Event recordings will be saved to: {}", dir.display());
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, event: &Event) -> PathBuf {
        let stem = format!(
            "{}_{}",
            event.timestamp().format("%Y%m%d_%H%M%S"),
            event.event_type()
        );

        let mut path = self.dir.join(format!("{}.wav", stem));
        let mut suffix = 1;
        while path.exists() {
            path = self.dir.join(format!("{}_{}.wav", stem, suffix));
            suffix += 1;
        }
        path
    }

    /// Write the snippet if the event carries one
    pub fn record(&self, event: &Event) -> Result<Option<PathBuf>, SinkError> {
        let Some(snippet) = event.snippet() else {
            return Ok(None);
        };

        let spec = WavSpec {
            channels: 1,
            sample_rate: event.features().sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let path = self.path_for(event);
        let mut writer = WavWriter::create(&path, spec)?;
        for &sample in snippet {
            writer.write_sample((sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)?;
        }
        writer.finalize()?;

        debug!("Event recording saved: {}", path.display());
        Ok(Some(path))
    }
}

impl NotificationSink for WavRecorder {
    fn name(&self) -> &'static str {
        "wav-recorder"
    }

    fn notify(&mut self, event: &Event) -> Result<(), SinkError> {
        self.record(event).map(|_| ())
    }
}
