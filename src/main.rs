/// Environmental listening service binary
///
/// Runs one monitoring session against the microphone (or a WAV replay),
/// logs events as they are raised and exports the session at the end.

use acoustic_monitor::{
    list_input_devices, AudioMonitor, AudioSource, CpalSource, LogSink, MonitorConfig, ReplaySource,
};
use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "acoustic-monitor", version, about = "Real-time environmental listening session")]
struct Cli {
    /// JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Duration to listen in seconds (default: until Ctrl+C)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Audio input device index or name (default: system default)
    #[arg(long)]
    device: Option<String>,

    /// Sample rate in Hz
    #[arg(long)]
    sample_rate: Option<u32>,

    /// Analysis chunk duration in seconds
    #[arg(long)]
    chunk_duration: Option<f64>,

    /// Save audio snippets of detected events
    #[arg(long)]
    record_events: bool,

    /// Directory for event recordings
    #[arg(long, default_value = "recordings")]
    output_dir: PathBuf,

    /// Session export file (default: session_<timestamp>.json)
    #[arg(long)]
    export: Option<PathBuf>,

    /// Replay a WAV file instead of capturing from a device
    #[arg(long)]
    input: Option<PathBuf>,

    #[arg(long)]
    amplitude_threshold: Option<f64>,

    #[arg(long)]
    frequency_change_threshold: Option<f64>,

    #[arg(long)]
    silence_duration_threshold: Option<f64>,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("acoustic_monitor=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Err(e) = run(Cli::parse()).await {
        error!("Error during listening session: {:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    if cli.list_devices {
        for device in list_input_devices()? {
            info!(
                "[{}] {}{}",
                device.index,
                device.name,
                if device.is_default { " (default)" } else { "" }
            );
        }
        return Ok(());
    }

    // Load configuration
    let config = load_config(&cli)?;

    // Open the audio source
    let mut source: Box<dyn AudioSource> = match &cli.input {
        Some(path) => {
            let interval = Duration::from_secs_f64(config.chunk_duration_secs);
            Box::new(
                ReplaySource::from_wav(path, config.chunk_duration_secs, Utc::now(), interval)
                    .with_context(|| format!("Failed to load {}", path.display()))?,
            )
        }
        None => Box::new(
            CpalSource::new(config.device.clone(), config.sample_rate, config.chunk_size())
                .context("Real-time monitoring requires a working audio input device")?,
        ),
    };

    // Create monitor
    let mut monitor = AudioMonitor::new(config)?;
    monitor.add_sink(Box::new(LogSink));

    // Ctrl+C ends the session after the chunk in flight
    let handle = monitor.handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Stopping listening session...");
            handle.stop();
        }
    });

    let session = monitor.run(source.as_mut()).await?;

    // Report
    let summary = session.summary();

    info!("Session summary");
    info!("  Duration: {:.1}s", summary.duration_seconds);
    info!("  Total events: {}", summary.total_events);
    for (event_type, count) in &summary.events_by_type {
        info!("  {}: {}", event_type, count);
    }
    for (severity, count) in &summary.events_by_severity {
        info!("  severity {}: {}", severity, count);
    }
    match &summary.baseline {
        Some(baseline) => info!(
            "  Baseline: amplitude={:.6}, frequency={:.1} Hz, spectral_centroid={:.1} Hz",
            baseline.amplitude, baseline.frequency, baseline.spectral_centroid
        ),
        None => warn!("  Baseline: not established"),
    }

    // Export session data
    let export_path = cli.export.clone().unwrap_or_else(|| {
        PathBuf::from(format!("session_{}.json", Utc::now().format("%Y%m%d_%H%M%S")))
    });
    session
        .export_to_file(&export_path)
        .with_context(|| format!("Failed to export session to {}", export_path.display()))?;

    Ok(())
}

/// Defaults, then config file, then environment, then command-line flags
fn load_config(cli: &Cli) -> Result<MonitorConfig> {
    let mut config = match &cli.config {
        Some(path) => MonitorConfig::from_json_file(path)?,
        None => MonitorConfig::default(),
    };
    config.apply_env()?;

    if let Some(duration) = cli.duration {
        config.max_duration_secs = Some(duration);
    }
    if let Some(device) = &cli.device {
        config.device = Some(device.clone());
    }
    if let Some(rate) = cli.sample_rate {
        config.sample_rate = rate;
    }
    if let Some(chunk) = cli.chunk_duration {
        config.chunk_duration_secs = chunk;
    }
    if cli.record_events {
        config.recording_dir = Some(cli.output_dir.clone());
    }
    if let Some(v) = cli.amplitude_threshold {
        config.thresholds.amplitude_threshold = v;
    }
    if let Some(v) = cli.frequency_change_threshold {
        config.thresholds.frequency_change_threshold = v;
    }
    if let Some(v) = cli.silence_duration_threshold {
        config.thresholds.silence_duration_threshold = v;
    }

    config.validate()?;
    Ok(config)
}
