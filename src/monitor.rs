/// Capture/dispatch loop
///
/// Bridges an `AudioSource` to the detector: waits for warm-up, establishes
/// the baseline from the first chunks, then analyses chunks one at a time in
/// arrival order until stopped, the deadline passes or the source closes.

use crate::baseline::{Baseline, BaselineEstimator};
use crate::capture::{chunk_channel, AudioChunk, AudioSource, CaptureError, ChunkReceiver};
use crate::config::{ConfigError, MonitorConfig, ThresholdConfig};
use crate::detector::EventDetector;
use crate::features::{FeatureExtractor, SpectralFeatureExtractor};
use crate::session::Session;
use crate::sink::{NotificationSink, SinkError, WavRecorder};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, error, info, warn};

#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Recording setup failed: {0}")]
    Recording(#[from] SinkError),

    #[error("Monitor already running")]
    AlreadyRunning,
}

/// Loop counters
#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub chunks_processed: u64,
    pub chunks_skipped: u64,
    pub events_emitted: u64,
    pub sink_failures: u64,
    pub is_running: bool,
}

/// Cloneable control handle for a running monitor
#[derive(Debug, Clone)]
pub struct MonitorHandle {
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
}

impl MonitorHandle {
    /// Ask the loop to exit after the chunk in flight
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Streaming environment monitor
pub struct AudioMonitor {
    config: MonitorConfig,
    extractor: Box<dyn FeatureExtractor>,
    detector: EventDetector,
    sinks: Vec<Box<dyn NotificationSink>>,
    recorder: Option<WavRecorder>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    stats: MonitorStats,
}

impl AudioMonitor {
    /// Create a monitor with the default spectral feature extractor
    pub fn new(config: MonitorConfig) -> Result<Self, MonitorError> {
        Self::with_extractor(config, Box::new(SpectralFeatureExtractor::new()))
    }

    pub fn with_extractor(
        config: MonitorConfig,
        extractor: Box<dyn FeatureExtractor>,
    ) -> Result<Self, MonitorError> {
        config.validate()?;

        info!("Initializing audio monitor");
        info!(
            "Sample rate: {} Hz, chunk duration: {}s ({} samples)",
            config.sample_rate,
            config.chunk_duration_secs,
            config.chunk_size()
        );
        info!("Device: {}", config.device.as_deref().unwrap_or("Default"));

        let recorder = match &config.recording_dir {
            Some(dir) => Some(WavRecorder::new(dir)?),
            None => None,
        };

        Ok(Self {
            config,
            extractor,
            detector: EventDetector::new(),
            sinks: Vec::new(),
            recorder,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            stats: MonitorStats::default(),
        })
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn thresholds(&self) -> &ThresholdConfig {
        &self.config.thresholds
    }

    /// Replace detection thresholds; only allowed between sessions
    pub fn set_thresholds(&mut self, thresholds: ThresholdConfig) -> Result<(), MonitorError> {
        if self.running.load(Ordering::Acquire) {
            return Err(MonitorError::AlreadyRunning);
        }
        thresholds.validate()?;
        debug!("Thresholds updated: {:?}", thresholds);
        self.config.thresholds = thresholds;
        Ok(())
    }

    pub fn add_sink(&mut self, sink: Box<dyn NotificationSink>) {
        debug!("Registered sink: {}", sink.name());
        self.sinks.push(sink);
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_some()
    }

    pub fn handle(&self) -> MonitorHandle {
        MonitorHandle {
            stop_requested: self.stop_requested.clone(),
            running: self.running.clone(),
        }
    }

    pub fn stats(&self) -> MonitorStats {
        MonitorStats {
            is_running: self.running.load(Ordering::Acquire),
            ..self.stats.clone()
        }
    }

    /// Run a session against a capture source
    ///
    /// The source is stopped before returning, whatever the outcome. A stop
    /// requested while the source is starting ends the session straight away.
    pub async fn run<S: AudioSource + ?Sized>(
        &mut self,
        source: &mut S,
    ) -> Result<Session, MonitorError> {
        let (tx, rx) = chunk_channel();
        source.start(tx)?;
        let session = self.run_with_receiver(rx).await;
        source.stop();
        session
    }

    /// Run a session against an already wired chunk queue
    ///
    /// A stop requested before the call is honoured; the flag is cleared
    /// when the session ends.
    pub async fn run_with_receiver(
        &mut self,
        mut rx: ChunkReceiver,
    ) -> Result<Session, MonitorError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(MonitorError::AlreadyRunning);
        }
        self.stats = MonitorStats::default();

        let deadline = self.config.max_duration().map(|limit| Instant::now() + limit);
        let mut session = Session::new(Utc::now());
        info!("Starting environmental listening session");

        // Let the input settle before sampling the baseline
        self.warm_up(deadline).await;

        // Establish baseline
        if let Some(baseline) = self.establish_baseline(&mut rx, deadline).await {
            // Fresh session, cannot already hold a baseline
            let _ = session.set_baseline(baseline);
        }

        info!("Monitoring environment");
        let poll_interval = self.config.poll_interval();

        // Main loop
        loop {
            if self.is_stop_requested() {
                info!("Stop requested");
                break;
            }

            let wait = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        info!("Session duration limit reached");
                        break;
                    }
                    remaining.min(poll_interval)
                }
                None => poll_interval,
            };

            // Process chunks
            match timeout(wait, rx.recv()).await {
                Ok(Some(chunk)) => self.process_chunk(&mut session, chunk),
                Ok(None) => {
                    info!("Audio source closed");
                    break;
                }
                Err(_) => {}
            }

            tokio::task::yield_now().await;
        }

        // Cleanup
        session.finish(Utc::now());
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);

        info!(
            "Listening session ended. Detected {} events ({} chunks processed, {} skipped)",
            session.events().len(),
            self.stats.chunks_processed,
            self.stats.chunks_skipped
        );

        Ok(session)
    }

    fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Sleep out the warm-up in poll-sized slices so a stop is noticed
    async fn warm_up(&self, deadline: Option<Instant>) {
        let warmup = self.config.warmup();
        if warmup.is_zero() {
            return;
        }

        let until = match deadline {
            Some(deadline) => deadline.min(Instant::now() + warmup),
            None => Instant::now() + warmup,
        };

        while !self.is_stop_requested() {
            let remaining = until.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            sleep(remaining.min(self.config.poll_interval())).await;
        }
    }

    async fn establish_baseline(
        &self,
        rx: &mut ChunkReceiver,
        deadline: Option<Instant>,
    ) -> Option<Baseline> {
        if self.is_stop_requested() {
            return None;
        }

        let estimator = BaselineEstimator::new(
            self.config.baseline_chunks,
            self.config.baseline_chunk_timeout(),
        )
        .with_poll_interval(self.config.poll_interval());
        info!("Establishing baseline from {} chunks", estimator.target_chunks());

        let chunks = estimator.collect(rx, deadline, &self.stop_requested).await;
        if self.is_stop_requested() {
            info!("Stop requested, skipping baseline");
            return None;
        }

        let sample_rate = chunks.first().map_or(self.config.sample_rate, |c| c.sample_rate);
        estimator.establish(self.extractor.as_ref(), &chunks, sample_rate)
    }

    /// Analyse one chunk and dispatch any events it raises
    fn process_chunk(&mut self, session: &mut Session, chunk: AudioChunk) {
        let features = match self.extractor.extract(&chunk.samples, chunk.sample_rate) {
            Ok(features) => features,
            Err(e) => {
                warn!("Skipping chunk captured at {}: {}", chunk.captured_at, e);
                self.stats.chunks_skipped += 1;
                return;
            }
        };
        self.stats.chunks_processed += 1;

        let events = self.detector.detect(
            &features,
            session.baseline(),
            &self.config.thresholds,
            session.last_event_timestamp(),
            chunk.captured_at,
        );

        for event in events {
            // Snippets are retained for every event type while recording
            let event = match self.recorder {
                Some(_) => event.with_snippet(chunk.samples.clone()),
                None => event,
            };

            let event = match session.append(event) {
                Ok(event) => event,
                Err(e) => {
                    error!("Dropping event: {}", e);
                    continue;
                }
            };
            self.stats.events_emitted += 1;

            if let Some(recorder) = &self.recorder {
                if let Err(e) = recorder.record(event) {
                    error!("Error saving event recording: {}", e);
                }
            }

            for sink in self.sinks.iter_mut() {
                if let Err(e) = sink.notify(event) {
                    self.stats.sink_failures += 1;
                    error!("Error in event sink '{}': {}", sink.name(), e);
                }
            }
        }
    }
}
