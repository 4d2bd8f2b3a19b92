/// Audio capture boundary
///
/// Audio drivers push arbitrarily sized sample blocks from their own
/// real-time thread. `ChunkAssembler` regroups them into fixed-size chunks,
/// and an `AudioSource` hands each chunk to the analysis side over an
/// unbounded tokio channel, the only structure shared between the two.

use chrono::{DateTime, Utc};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Host, SampleFormat, StreamConfig};
use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;
use std::path::Path;
use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

/// How long `CpalSource::start` waits for the capture thread to open the stream
const STREAM_OPEN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Audio capture unavailable: {0}")]
    Unavailable(String),

    #[error("Input device not found: {0}")]
    DeviceNotFound(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Invalid chunk size: {0}")]
    InvalidChunkSize(usize),

    #[error("Capture already running")]
    AlreadyRunning,

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
}

/// Fixed-length block of mono samples with its capture time
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub captured_at: DateTime<Utc>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, captured_at: DateTime<Utc>, sample_rate: u32) -> Self {
        Self {
            samples,
            captured_at,
            sample_rate,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Sending half of the chunk queue
pub type ChunkSender = mpsc::UnboundedSender<AudioChunk>;

/// Receiving half of the chunk queue
pub type ChunkReceiver = mpsc::UnboundedReceiver<AudioChunk>;

pub fn chunk_channel() -> (ChunkSender, ChunkReceiver) {
    mpsc::unbounded_channel()
}

type RingBuffer = HeapRb<f32>;
type RingProducer = <RingBuffer as Split>::Prod;
type RingConsumer = <RingBuffer as Split>::Cons;

/// Regroups driver blocks into chunks of exactly `chunk_size` samples
pub struct ChunkAssembler {
    producer: RingProducer,
    consumer: RingConsumer,
    chunk_size: usize,
    sample_rate: u32,
}

impl ChunkAssembler {
    pub fn new(chunk_size: usize, sample_rate: u32) -> Result<Self, CaptureError> {
        if chunk_size == 0 {
            return Err(CaptureError::InvalidChunkSize(chunk_size));
        }

        debug!("Creating chunk assembler: {} samples per chunk", chunk_size);

        // Two chunks of headroom so a push always has vacant slots after draining
        let (producer, consumer) = RingBuffer::new(chunk_size * 2).split();

        Ok(Self {
            producer,
            consumer,
            chunk_size,
            sample_rate,
        })
    }

    /// Push a driver block; returns every chunk it completed, oldest first
    pub fn push(&mut self, samples: &[f32], captured_at: DateTime<Utc>) -> Vec<AudioChunk> {
        let mut ready = Vec::new();
        let mut remaining = samples;

        while !remaining.is_empty() {
            let written = self.producer.push_slice(remaining);
            remaining = &remaining[written..];

            while self.consumer.occupied_len() >= self.chunk_size {
                let mut chunk = vec![0.0; self.chunk_size];
                self.consumer.pop_slice(&mut chunk);
                ready.push(AudioChunk::new(chunk, captured_at, self.sample_rate));
            }
        }

        ready
    }

    /// Samples waiting for the next chunk to complete
    pub fn pending(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// Result of probing the capture subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureAvailability {
    Available { device_name: String },
    Unavailable { reason: String },
}

impl CaptureAvailability {
    pub fn is_available(&self) -> bool {
        matches!(self, CaptureAvailability::Available { .. })
    }
}

/// Check whether an input device can be opened on the default host
pub fn probe_capture(device: Option<&str>) -> CaptureAvailability {
    let host = cpal::default_host();

    match find_input_device(&host, device) {
        Ok(device) => CaptureAvailability::Available {
            device_name: device.name().unwrap_or_else(|_| "Unknown Device".to_string()),
        },
        Err(e) => CaptureAvailability::Unavailable {
            reason: e.to_string(),
        },
    }
}

/// Input device description for listings
#[derive(Debug, Clone)]
pub struct InputDeviceInfo {
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

pub fn list_input_devices() -> Result<Vec<InputDeviceInfo>, CaptureError> {
    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let devices = host
        .input_devices()
        .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {}", e)))?;

    Ok(devices
        .enumerate()
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown Device".to_string());
            InputDeviceInfo {
                index,
                is_default: default_name.as_deref() == Some(name.as_str()),
                name,
            }
        })
        .collect())
}

/// Resolve a device by index or name substring; `None` means the host default
fn find_input_device(host: &Host, selector: Option<&str>) -> Result<Device, CaptureError> {
    let Some(selector) = selector else {
        return host
            .default_input_device()
            .ok_or_else(|| CaptureError::DeviceNotFound("no default input device".to_string()));
    };

    let mut devices = host
        .input_devices()
        .map_err(|e| CaptureError::Device(format!("Failed to enumerate devices: {}", e)))?;

    let found = match selector.parse::<usize>() {
        Ok(index) => devices.nth(index),
        Err(_) => devices.find(|d| d.name().map(|n| n.contains(selector)).unwrap_or(false)),
    };

    found.ok_or_else(|| CaptureError::DeviceNotFound(selector.to_string()))
}

/// Producer side of a monitoring session
pub trait AudioSource: Send {
    /// Begin delivering chunks into `tx`; must not block for the life of the stream
    fn start(&mut self, tx: ChunkSender) -> Result<(), CaptureError>;

    /// Stop delivering chunks; idempotent
    fn stop(&mut self);
}

struct CaptureWorker {
    stop_tx: std_mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

/// Microphone input through cpal
///
/// cpal streams are not `Send`, so the stream lives on a dedicated thread
/// that parks until `stop()`.
pub struct CpalSource {
    device: Option<String>,
    device_name: String,
    sample_rate: u32,
    chunk_size: usize,
    worker: Option<CaptureWorker>,
}

impl CpalSource {
    /// Probe the capture subsystem and prepare a source for the given device
    pub fn new(
        device: Option<String>,
        sample_rate: u32,
        chunk_size: usize,
    ) -> Result<Self, CaptureError> {
        if chunk_size == 0 {
            return Err(CaptureError::InvalidChunkSize(chunk_size));
        }

        let device_name = match probe_capture(device.as_deref()) {
            CaptureAvailability::Available { device_name } => device_name,
            CaptureAvailability::Unavailable { reason } => {
                return Err(CaptureError::Unavailable(reason));
            }
        };

        info!("Audio input device: {}", device_name);

        Ok(Self {
            device,
            device_name,
            sample_rate,
            chunk_size,
            worker: None,
        })
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    fn open_stream(
        device: Option<&str>,
        sample_rate: u32,
        chunk_size: usize,
        tx: ChunkSender,
    ) -> Result<cpal::Stream, CaptureError> {
        let host = cpal::default_host();
        let device = find_input_device(&host, device)?;

        let supported = device
            .default_input_config()
            .map_err(|e| CaptureError::Device(format!("Failed to get input config: {}", e)))?;

        let config = StreamConfig {
            channels: supported.channels(),
            sample_rate: cpal::SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        debug!(
            "Opening input stream: {} Hz, {} channel(s), {:?}",
            sample_rate,
            config.channels,
            supported.sample_format()
        );

        let assembler = ChunkAssembler::new(chunk_size, sample_rate)?;

        match supported.sample_format() {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, assembler, tx),
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, assembler, tx),
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, assembler, tx),
            other => Err(CaptureError::UnsupportedFormat(format!("{:?}", other))),
        }
    }

    fn build_stream<T>(
        device: &Device,
        config: &StreamConfig,
        mut assembler: ChunkAssembler,
        tx: ChunkSender,
    ) -> Result<cpal::Stream, CaptureError>
    where
        T: cpal::Sample + cpal::SizedSample + Send + 'static,
        f32: cpal::FromSample<T>,
    {
        let channels = config.channels.max(1) as usize;
        let mut mono: Vec<f32> = Vec::new();

        device
            .build_input_stream(
                config,
                move |data: &[T], _: &cpal::InputCallbackInfo| {
                    // First channel only
                    mono.clear();
                    mono.extend(data.iter().step_by(channels).map(|&sample| {
                        let value: f32 = cpal::Sample::from_sample(sample);
                        value
                    }));

                    for chunk in assembler.push(&mono, Utc::now()) {
                        if tx.send(chunk).is_err() {
                            trace!("Chunk receiver closed, dropping chunk");
                        }
                    }
                },
                |err| {
                    error!("Audio input stream error: {}", err);
                },
                None,
            )
            .map_err(|e| CaptureError::Stream(e.to_string()))
    }
}

impl AudioSource for CpalSource {
    fn start(&mut self, tx: ChunkSender) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<(), CaptureError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device = self.device.clone();
        let sample_rate = self.sample_rate;
        let chunk_size = self.chunk_size;

        let thread = std::thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let opened = Self::open_stream(device.as_deref(), sample_rate, chunk_size, tx);
                let stream = match opened {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    let _ = ready_tx.send(Err(CaptureError::Stream(e.to_string())));
                    return;
                }
                let _ = ready_tx.send(Ok(()));

                // Parked until stop() or the source is dropped
                let _ = stop_rx.recv();
                drop(stream);
                debug!("Capture thread exiting");
            })
            .map_err(|e| CaptureError::Stream(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(STREAM_OPEN_TIMEOUT) {
            Ok(Ok(())) => {
                info!("Audio stream started on {}", self.device_name);
                self.worker = Some(CaptureWorker { stop_tx, thread });
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = stop_tx.send(());
                Err(CaptureError::Stream("Timed out opening input stream".to_string()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.stop_tx.send(());
            if worker.thread.join().is_err() {
                warn!("Capture thread panicked");
            }
            info!("Audio stream stopped");
        }
    }
}

impl Drop for CpalSource {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Replays prepared chunks at a fixed cadence, e.g. from a WAV file
pub struct ReplaySource {
    chunks: Vec<AudioChunk>,
    interval: Duration,
    worker: Option<JoinHandle<()>>,
}

impl ReplaySource {
    pub fn new(chunks: Vec<AudioChunk>, interval: Duration) -> Self {
        Self {
            chunks,
            interval,
            worker: None,
        }
    }

    /// Split a mono (or first-channel) WAV file into chunks of
    /// `chunk_duration_secs` at the file's own sample rate, stamped at their
    /// position relative to `start`
    pub fn from_wav(
        path: impl AsRef<Path>,
        chunk_duration_secs: f64,
        start: DateTime<Utc>,
        interval: Duration,
    ) -> Result<Self, CaptureError> {
        let mut reader = hound::WavReader::open(path.as_ref())?;
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let chunk_size = (chunk_duration_secs * spec.sample_rate as f64) as usize;

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<_, _>>()?,
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };
        let mono: Vec<f32> = interleaved.into_iter().step_by(channels).collect();

        let mut assembler = ChunkAssembler::new(chunk_size, spec.sample_rate)?;
        let mut chunks = Vec::new();
        for (i, block) in mono.chunks(chunk_size).enumerate() {
            let offset = chrono::Duration::milliseconds(
                (i as f64 * chunk_size as f64 * 1000.0 / spec.sample_rate as f64) as i64,
            );
            chunks.extend(assembler.push(block, start + offset));
        }

        info!(
            "Loaded {} chunks from {} ({} Hz)",
            chunks.len(),
            path.as_ref().display(),
            spec.sample_rate
        );

        Ok(Self::new(chunks, interval))
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

impl AudioSource for ReplaySource {
    fn start(&mut self, tx: ChunkSender) -> Result<(), CaptureError> {
        if self.worker.is_some() {
            return Err(CaptureError::AlreadyRunning);
        }

        let chunks = std::mem::take(&mut self.chunks);
        let interval = self.interval;

        let handle = std::thread::Builder::new()
            .name("audio-replay".to_string())
            .spawn(move || {
                for chunk in chunks {
                    if tx.send(chunk).is_err() {
                        break;
                    }
                    if !interval.is_zero() {
                        std::thread::sleep(interval);
                    }
                }
                // Dropping tx closes the channel and ends the session
            })
            .map_err(|e| CaptureError::Stream(format!("Failed to spawn replay thread: {}", e)))?;

        self.worker = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        // The replay thread exits on its own once the receiver is gone
        self.worker.take();
    }
}
