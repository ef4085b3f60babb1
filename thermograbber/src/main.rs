/*!
# Thermal Grabber Application

Streams frames from a thermal camera over TCP, decodes them into raw or
calibrated temperature images, and optionally records them to frame-sequence
files.

## Features

- TCP capture with bounded connect retries
- Raw envelope-wrapped frames or structured "GFRA" packets
- Recording of raw or Celsius frames on a background writer thread
- Live JSON output for downstream processing
- Synthetic data mode for running without hardware
- Offline packet parsing and recording inspection

## Usage

### Stream and record
```bash
thermograbber stream --host 192.168.4.1 --port 3333 --record
```

### Live JSON output, structured packets
```bash
thermograbber stream --format packet --live
```

### Without hardware
```bash
thermograbber stream --debug --max-frames 20 --record --celsius
```
*/

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use shared::{
    parse_packet, read_frame_sequence, Calibration, FrameSequence, ImageMatrix, Sample,
    StructuredPacketConfig, WireFormat,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::time::Duration;
use tracing::{info, info_span, warn};
use tracing_subscriber::EnvFilter;

mod capture;
mod config;
mod reassembly;
mod recorder;
mod source;

use capture::{ConnectionManager, StopReason};
use config::AppConfig;
use recorder::{RecordMode, Recorder};
use source::{Connector, SyntheticConnector, SyntheticSource};

#[derive(Parser)]
#[command(name = "thermograbber")]
#[command(about = "Thermal camera TCP frame capture and decoding")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults are used when it does not exist)
    #[arg(short, long, default_value = "thermograbber.toml")]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum WireFormatArg {
    /// Raw frames with envelope strip bytes
    Frame,
    /// Structured GFRA packets
    Packet,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the camera and stream frames
    Stream {
        /// Camera address
        #[arg(long)]
        host: Option<String>,

        /// Camera TCP port
        #[arg(short, long)]
        port: Option<u16>,

        /// Wire format spoken by the camera
        #[arg(short, long, value_enum, default_value = "frame")]
        format: WireFormatArg,

        /// Connect attempts after the first
        #[arg(long)]
        max_retries: Option<u32>,

        /// Stop after this many frames
        #[arg(short = 'n', long)]
        max_frames: Option<u64>,

        /// Record valid frames to a frame-sequence file
        #[arg(long)]
        record: bool,

        /// Directory for recordings
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Record calibrated Celsius values instead of raw samples
        #[arg(long)]
        celsius: bool,

        /// Print one JSON line per frame to stdout
        #[arg(long)]
        live: bool,

        /// Generate synthetic frames instead of connecting
        #[arg(long)]
        debug: bool,

        /// Synthetic frame rate
        #[arg(long, default_value = "8.0")]
        fps: f64,
    },

    /// Parse a single structured packet stored in a file
    Parse {
        /// File holding exactly one packet
        file: PathBuf,

        #[arg(long)]
        width: Option<usize>,

        #[arg(long)]
        height: Option<usize>,

        /// Expected packet size in bytes
        #[arg(long)]
        packet_size: Option<usize>,
    },

    /// Summarise a recorded frame-sequence file
    Inspect {
        file: PathBuf,

        /// The file holds Celsius (f32) samples
        #[arg(long)]
        celsius: bool,
    },

    /// Generate configuration file
    Config {
        /// Output path for configuration file
        #[arg(short, long, default_value = "thermograbber.toml")]
        output: PathBuf,
    },
}

/// Streaming options resolved from the command line
struct StreamOptions {
    synthetic: bool,
    max_frames: Option<u64>,
    record_mode: Option<RecordMode>,
    output_dir: PathBuf,
    live: bool,
    calibration: Calibration,
    channel_size: usize,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so stdout stays clean for live output
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();

    info!("🚀 Thermal grabber v{}", shared::VERSION);
    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Stream {
            host,
            port,
            format,
            max_retries,
            max_frames,
            record,
            output_dir,
            celsius,
            live,
            debug,
            fps,
        } => {
            let mut config = config;
            if let Some(host) = host {
                config.connection.server_ip = host;
            }
            if let Some(port) = port {
                config.connection.server_port = port;
            }
            if let Some(max_retries) = max_retries {
                config.connection.max_retries = max_retries;
            }

            let celsius = celsius || config.storage.save_celsius;
            let options = StreamOptions {
                synthetic: debug,
                max_frames,
                record_mode: record.then(|| {
                    if celsius {
                        RecordMode::Celsius(config.calibration)
                    } else {
                        RecordMode::Raw
                    }
                }),
                output_dir: output_dir
                    .unwrap_or_else(|| PathBuf::from(&config.storage.output_directory)),
                live,
                calibration: config.calibration,
                channel_size: config.storage.channel_buffer_size,
            };

            let interval = Duration::from_secs_f64(1.0 / fps.max(0.001));
            match (format, debug) {
                (WireFormatArg::Frame, false) => {
                    let format = config.stream_config()?;
                    run_stream(format, config.connection.tcp_connector(), &config, &options)
                }
                (WireFormatArg::Frame, true) => {
                    let format = config.stream_config()?;
                    let source = SyntheticSource::frames(format.clone(), interval, max_frames);
                    run_stream(format, SyntheticConnector::new(source), &config, &options)
                }
                (WireFormatArg::Packet, false) => {
                    let format = config.packet_config()?;
                    run_stream(format, config.connection.tcp_connector(), &config, &options)
                }
                (WireFormatArg::Packet, true) => {
                    let format = config.packet_config()?;
                    let source = SyntheticSource::packets(format.clone(), interval, max_frames);
                    run_stream(format, SyntheticConnector::new(source), &config, &options)
                }
            }
        }

        Commands::Parse {
            file,
            width,
            height,
            packet_size,
        } => {
            let base = config.packet_config()?;
            let packet_config = StructuredPacketConfig::new(
                base.server_ip(),
                base.server_port(),
                width.unwrap_or(base.width()),
                height.unwrap_or(base.height()),
                packet_size.unwrap_or(base.expected_packet_size()),
            )?;
            parse_packet_file(&file, &packet_config, &config.calibration)
        }

        Commands::Inspect { file, celsius } => {
            if celsius {
                inspect_file::<f32>(&file)
            } else {
                inspect_file::<u16>(&file)
            }
        }

        Commands::Config { output } => generate_config_file(output),
    }
}

/// Load the config file, falling back to defaults when it is missing
fn load_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        AppConfig::load_from_file(path)
    } else {
        Ok(AppConfig::new())
    }
}

/// Connect and stream until the camera, the user or `max_frames` stops us
fn run_stream<C, W>(
    format: W,
    connector: C,
    config: &AppConfig,
    options: &StreamOptions,
) -> Result<()>
where
    C: Connector,
    W: WireFormat,
{
    let (width, height) = format.image_shape();
    let (host, port) = format.endpoint();
    let addr = format!("{}:{}", host, port);
    let span = info_span!(
        "stream",
        wire_format = format.name(),
        addr = %addr,
        synthetic = options.synthetic
    );
    let mut manager = ConnectionManager::new(format, connector)?
        .with_retry_policy(config.connection.retry_policy())
        .with_read_chunk_size(config.connection.read_chunk_size)
        .with_span(span);

    // Set up Ctrl+C handler
    let running = manager.running_flag();
    ctrlc::set_handler(move || {
        eprintln!("\n🛑 Received Ctrl+C, shutting down gracefully...");
        running.store(false, Ordering::SeqCst);
    })?;

    let recorder = match options.record_mode {
        Some(mode) => Some(Recorder::start(
            &options.output_dir,
            width,
            height,
            mode,
            options.channel_size,
        )?),
        None => None,
    };

    let mut frame_number = 0u64;
    let summary = manager.run(|decoded| {
        frame_number += 1;
        let valid = W::is_valid(&decoded);

        if let Some(image) = W::image(&decoded) {
            if options.live {
                print_live_frame(frame_number, valid, image, &options.calibration);
            }
            if let Some(recorder) = &recorder {
                if valid && !recorder.send(image.clone()) {
                    return false;
                }
            }
        }

        !options.max_frames.is_some_and(|max| frame_number >= max)
    })?;

    if let Some(recorder) = recorder {
        let path = recorder.path().to_path_buf();
        let written = recorder.finish()?;
        info!("💾 Recorded {} frames to {}", written, path.display());
    }

    match &summary.stop_reason {
        StopReason::TransportError(e) => info!("Stream ended after a transport error: {}", e),
        reason => info!("Stream ended: {:?}", reason),
    }
    info!(
        "✅ {} frames ({} invalid) in {:.1}s, {} bytes received",
        summary.units_delivered,
        summary.invalid_units,
        summary.duration.as_secs_f64(),
        summary.bytes_received
    );
    info!(
        "📊 Connected after {} attempt(s), final state {:?}",
        manager.attempts(),
        manager.state()
    );
    if summary.trailing_bytes > 0 {
        warn!("⚠️ Discarded {} bytes of an incomplete frame", summary.trailing_bytes);
    }

    Ok(())
}

/// One JSON line per frame on stdout
fn print_live_frame(
    frame_number: u64,
    valid: bool,
    image: &ImageMatrix<u16>,
    calibration: &Calibration,
) {
    let (raw_min, raw_max) = image.min_max().unwrap_or((0, 0));
    let center = image
        .get(image.height() / 2, image.width() / 2)
        .map(|raw| calibration.to_celsius(raw));

    let line = serde_json::json!({
        "frame_number": frame_number,
        "valid": valid,
        "width": image.width(),
        "height": image.height(),
        "raw_min": raw_min,
        "raw_max": raw_max,
        "min_celsius": calibration.to_celsius(raw_min),
        "max_celsius": calibration.to_celsius(raw_max),
        "center_celsius": center,
    });
    println!("{}", line);
}

/// Parse one packet from disk and print a JSON report
fn parse_packet_file(
    path: &Path,
    config: &StructuredPacketConfig,
    calibration: &Calibration,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read packet file: {}", path.display()))?;
    let packet = parse_packet(&bytes, config);

    let temperature_range = packet
        .temperatures(calibration)
        .and_then(|celsius| celsius.min_max());

    let report = serde_json::json!({
        "file": path.display().to_string(),
        "bytes": bytes.len(),
        "packet": packet.summary(),
        "metadata_hex": packet.metadata.as_ref().map(hex::encode),
        "raw_range": packet.thermal_image.as_ref().and_then(|image| image.min_max()),
        "celsius_range": temperature_range,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Print the geometry and value range of a recording
fn inspect_file<T>(path: &Path) -> Result<()>
where
    T: Sample + PartialOrd + serde::Serialize,
{
    let sequence: FrameSequence<T> = read_frame_sequence(path)
        .with_context(|| format!("Failed to read recording: {}", path.display()))?;

    let range = sequence
        .frames
        .iter()
        .filter_map(|frame| frame.min_max())
        .reduce(|(lo, hi), (a, b)| {
            (
                if a < lo { a } else { lo },
                if b > hi { b } else { hi },
            )
        });

    let report = serde_json::json!({
        "file": path.display().to_string(),
        "width": sequence.width,
        "height": sequence.height,
        "frames": sequence.frames.len(),
        "range": range,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}

/// Generate a default configuration file
fn generate_config_file(output_path: PathBuf) -> Result<()> {
    let config = AppConfig::new();
    config.save_to_file(&output_path)?;

    println!("✅ Generated configuration file: {}", output_path.display());
    println!("📝 Edit the file to customize settings, then run:");
    println!("   thermograbber --config {} stream", output_path.display());

    Ok(())
}
