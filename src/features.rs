/// Acoustic feature extraction
///
/// Turns one chunk of mono samples into a fixed schema of scalar features.
/// Extraction is a pure function of (samples, sample_rate).

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::trace;

/// Frame length for frame-wise spectral statistics
pub const FRAME_LENGTH: usize = 2048;

/// Hop between successive analysis frames
pub const HOP_LENGTH: usize = 512;

/// Absolute sample value above which a sample counts as clipped
pub const CLIPPING_THRESHOLD: f32 = 0.95;

/// Absolute sample value below which a sample counts as silent
pub const SILENCE_THRESHOLD: f32 = 0.01;

/// Fraction of spectral energy below the rolloff frequency
pub const ROLLOFF_PERCENT: f64 = 0.85;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum FeatureError {
    #[error("Cannot extract features from an empty chunk")]
    EmptyInput,

    #[error("Invalid sample rate: {0}")]
    InvalidSampleRate(u32),

    #[error("Chunk contains non-finite sample at index {0}")]
    NonFiniteSample(usize),
}

/// Features of a single chunk
///
/// Created once by an extractor and never modified afterwards; events keep
/// their own copy of the set that triggered them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSet {
    /// Chunk length in seconds
    pub duration: f64,
    pub sample_rate: u32,
    pub num_samples: usize,
    pub rms_energy: f64,
    pub max_amplitude: f64,
    pub spectral_centroid_mean: f64,
    pub spectral_centroid_std: f64,
    pub spectral_rolloff_mean: f64,
    pub zero_crossing_rate_mean: f64,
    /// Strongest FFT bin frequency, if the extractor reports one
    pub dominant_frequency: Option<f64>,
    pub clipping_detected: bool,
    pub clipped_sample_ratio: f64,
    pub silence_ratio: f64,
    pub dc_offset: f64,
    pub dynamic_range_db: f64,
}

/// Feature extraction boundary
///
/// Implementations must be deterministic and free of side effects.
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureSet, FeatureError>;
}

/// FFT-based extractor used by default
#[derive(Debug, Default, Clone, Copy)]
pub struct SpectralFeatureExtractor;

impl SpectralFeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Hann window of the analysis frame length
    fn hann_window() -> Vec<f64> {
        (0..FRAME_LENGTH)
            .map(|i| {
                0.5 * (1.0 - (2.0 * std::f64::consts::PI * i as f64 / FRAME_LENGTH as f64).cos())
            })
            .collect()
    }

    /// Frame-wise (centroid, rolloff, zcr) over Hann-windowed frames
    fn frame_statistics(
        planner: &mut FftPlanner<f64>,
        samples: &[f64],
        sample_rate: f64,
    ) -> Vec<(f64, f64, f64)> {
        let fft = planner.plan_fft_forward(FRAME_LENGTH);
        let window = Self::hann_window();
        let bin_hz = sample_rate / FRAME_LENGTH as f64;

        let mut starts: Vec<usize> = (0..)
            .map(|i| i * HOP_LENGTH)
            .take_while(|start| start + FRAME_LENGTH <= samples.len())
            .collect();
        if starts.is_empty() {
            // Short chunk: one zero-padded frame
            starts.push(0);
        }

        starts
            .into_iter()
            .map(|start| {
                let end = (start + FRAME_LENGTH).min(samples.len());
                let frame = &samples[start..end];

                let mut buffer: Vec<Complex<f64>> = window
                    .iter()
                    .enumerate()
                    .map(|(i, w)| Complex::new(frame.get(i).copied().unwrap_or(0.0) * w, 0.0))
                    .collect();
                fft.process(&mut buffer);

                let magnitudes: Vec<f64> =
                    buffer[..=FRAME_LENGTH / 2].iter().map(|c| c.norm()).collect();
                let total: f64 = magnitudes.iter().sum();

                let centroid = if total > 0.0 {
                    magnitudes
                        .iter()
                        .enumerate()
                        .map(|(k, m)| k as f64 * bin_hz * m)
                        .sum::<f64>()
                        / total
                } else {
                    0.0
                };

                let rolloff = if total > 0.0 {
                    let target = ROLLOFF_PERCENT * total;
                    let mut cumulative = 0.0;
                    let bin = magnitudes
                        .iter()
                        .position(|m| {
                            cumulative += m;
                            cumulative >= target
                        })
                        .unwrap_or(magnitudes.len() - 1);
                    bin as f64 * bin_hz
                } else {
                    0.0
                };

                let crossings = frame
                    .windows(2)
                    .filter(|pair| (pair[0] >= 0.0) != (pair[1] >= 0.0))
                    .count();
                let zcr = crossings as f64 / FRAME_LENGTH as f64;

                (centroid, rolloff, zcr)
            })
            .collect()
    }

    /// Frequency of the strongest bin in the positive half of the spectrum
    fn dominant_frequency(planner: &mut FftPlanner<f64>, samples: &[f64], sample_rate: f64) -> f64 {
        let n = samples.len();
        let fft = planner.plan_fft_forward(n);
        let mut buffer: Vec<Complex<f64>> = samples.iter().map(|&s| Complex::new(s, 0.0)).collect();
        fft.process(&mut buffer);

        let half = (n / 2).max(1);
        let mut best = 0;
        let mut best_magnitude = f64::MIN;
        for (k, c) in buffer[..half].iter().enumerate() {
            let magnitude = c.norm();
            if magnitude > best_magnitude {
                best = k;
                best_magnitude = magnitude;
            }
        }

        best as f64 * sample_rate / n as f64
    }
}

fn mean_and_std(values: impl Iterator<Item = f64> + Clone) -> (f64, f64) {
    let count = values.clone().count();
    if count == 0 {
        return (0.0, 0.0);
    }
    let mean = values.clone().sum::<f64>() / count as f64;
    let variance = values.map(|v| (v - mean).powi(2)).sum::<f64>() / count as f64;
    (mean, variance.sqrt())
}

impl FeatureExtractor for SpectralFeatureExtractor {
    fn extract(&self, samples: &[f32], sample_rate: u32) -> Result<FeatureSet, FeatureError> {
        if samples.is_empty() {
            return Err(FeatureError::EmptyInput);
        }
        if sample_rate == 0 {
            return Err(FeatureError::InvalidSampleRate(sample_rate));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FeatureError::NonFiniteSample(index));
        }

        let n = samples.len();
        let sr = sample_rate as f64;
        let signal: Vec<f64> = samples.iter().map(|&s| s as f64).collect();

        let rms_energy = (signal.iter().map(|v| v * v).sum::<f64>() / n as f64).sqrt();
        let max_amplitude = signal.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
        let mean_abs = signal.iter().map(|v| v.abs()).sum::<f64>() / n as f64;
        let dc_offset = signal.iter().sum::<f64>() / n as f64;

        let clipped = samples.iter().filter(|s| s.abs() > CLIPPING_THRESHOLD).count();
        let silent = samples.iter().filter(|s| s.abs() < SILENCE_THRESHOLD).count();

        // All-zero chunks report 0 dB rather than -inf
        let dynamic_range_db = if max_amplitude > 0.0 {
            20.0 * (max_amplitude / (mean_abs + 1e-10)).log10()
        } else {
            0.0
        };

        let mut planner = FftPlanner::new();
        let frames = Self::frame_statistics(&mut planner, &signal, sr);
        let (spectral_centroid_mean, spectral_centroid_std) =
            mean_and_std(frames.iter().map(|f| f.0));
        let (spectral_rolloff_mean, _) = mean_and_std(frames.iter().map(|f| f.1));
        let (zero_crossing_rate_mean, _) = mean_and_std(frames.iter().map(|f| f.2));
        let dominant_frequency = Self::dominant_frequency(&mut planner, &signal, sr);

        trace!(
            "Extracted features: rms={:.6}, dominant={:.1}Hz, centroid={:.1}Hz, frames={}",
            rms_energy,
            dominant_frequency,
            spectral_centroid_mean,
            frames.len()
        );

        Ok(FeatureSet {
            duration: n as f64 / sr,
            sample_rate,
            num_samples: n,
            rms_energy,
            max_amplitude,
            spectral_centroid_mean,
            spectral_centroid_std,
            spectral_rolloff_mean,
            zero_crossing_rate_mean,
            dominant_frequency: Some(dominant_frequency),
            clipping_detected: clipped > 0,
            clipped_sample_ratio: clipped as f64 / n as f64,
            silence_ratio: silent as f64 / n as f64,
            dc_offset,
            dynamic_range_db,
        })
    }
}
