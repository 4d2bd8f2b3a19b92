/// Baseline estimation
///
/// The first usable chunks of a session are combined into one buffer and
/// run through the feature extractor; the resulting reference values feed
/// every baseline-relative detection rule for the rest of the session.

use crate::capture::{AudioChunk, ChunkReceiver};
use crate::features::FeatureExtractor;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Reference frequency when the extractor reports no dominant frequency
pub const FALLBACK_FREQUENCY_HZ: f64 = 440.0;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Reference values captured at session start
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    /// RMS energy of the combined baseline audio
    pub amplitude: f64,
    /// Dominant frequency in Hz
    pub frequency: f64,
    /// Mean spectral centroid in Hz
    pub spectral_centroid: f64,
}

pub struct BaselineEstimator {
    target_chunks: usize,
    chunk_timeout: Duration,
    poll_interval: Duration,
}

impl BaselineEstimator {
    pub fn new(target_chunks: usize, chunk_timeout: Duration) -> Self {
        Self {
            target_chunks,
            chunk_timeout,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Longest single wait before the stop flag is checked again
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval.max(Duration::from_millis(1));
        self
    }

    pub fn target_chunks(&self) -> usize {
        self.target_chunks
    }

    /// Drain up to `target_chunks` chunks from the queue
    ///
    /// Each chunk is waited for at most `chunk_timeout` and never past
    /// `deadline`. Collection ends early once `stop` is set. Returns
    /// whatever arrived; an empty result means the session runs without a
    /// baseline.
    pub async fn collect(
        &self,
        rx: &mut ChunkReceiver,
        deadline: Option<Instant>,
        stop: &AtomicBool,
    ) -> Vec<AudioChunk> {
        let mut chunks = Vec::with_capacity(self.target_chunks);

        'chunks: while chunks.len() < self.target_chunks {
            let chunk_deadline = match deadline {
                Some(deadline) => deadline.min(Instant::now() + self.chunk_timeout),
                None => Instant::now() + self.chunk_timeout,
            };

            loop {
                if stop.load(Ordering::Acquire) {
                    debug!("Stop requested during baseline collection");
                    break 'chunks;
                }

                let remaining = chunk_deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    let session_over = deadline.is_some_and(|d| Instant::now() >= d);
                    if !session_over {
                        warn!(
                            "Could not get enough baseline data ({} of {} chunks)",
                            chunks.len(),
                            self.target_chunks
                        );
                    }
                    break 'chunks;
                }

                match timeout(remaining.min(self.poll_interval), rx.recv()).await {
                    Ok(Some(chunk)) => {
                        chunks.push(chunk);
                        continue 'chunks;
                    }
                    Ok(None) => {
                        debug!("Audio source closed during baseline collection");
                        break 'chunks;
                    }
                    Err(_) => {}
                }
            }
        }

        chunks
    }

    /// Compute the baseline from collected chunks
    ///
    /// Chunks the extractor rejects on their own are left out. Returns
    /// `None` when no usable chunks remain or extraction failed.
    pub fn establish(
        &self,
        extractor: &dyn FeatureExtractor,
        chunks: &[AudioChunk],
        sample_rate: u32,
    ) -> Option<Baseline> {
        let usable: Vec<&AudioChunk> = chunks
            .iter()
            .filter(|chunk| match extractor.extract(&chunk.samples, sample_rate) {
                Ok(_) => true,
                Err(e) => {
                    warn!("Leaving chunk captured at {} out of baseline: {}", chunk.captured_at, e);
                    false
                }
            })
            .collect();

        if usable.is_empty() {
            warn!("Could not establish baseline: no usable audio collected");
            return None;
        }

        if usable.len() < self.target_chunks {
            warn!(
                "Establishing degraded baseline from {} of {} chunks",
                usable.len(),
                self.target_chunks
            );
        }

        let combined: Vec<f32> = usable
            .iter()
            .flat_map(|chunk| chunk.samples.iter().copied())
            .collect();

        let features = match extractor.extract(&combined, sample_rate) {
            Ok(features) => features,
            Err(e) => {
                warn!("Could not establish baseline: {}", e);
                return None;
            }
        };

        let baseline = Baseline {
            amplitude: features.rms_energy,
            frequency: features.dominant_frequency.unwrap_or(FALLBACK_FREQUENCY_HZ),
            spectral_centroid: features.spectral_centroid_mean,
        };

        info!(
            "Baseline established: amplitude={:.6}, dominant_frequency={:.1} Hz, \
             spectral_centroid={:.1} Hz",
            baseline.amplitude, baseline.frequency, baseline.spectral_centroid
        );

        Some(baseline)
    }
}
