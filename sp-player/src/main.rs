//! Simple Player (sp-play) - Main entry point
//!
//! Plays one media file through one of the three backend sinks and logs
//! playback status until the stream ends.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, ValueEnum};
use sp_player::audio::CpalDevice;
use sp_player::config::{LoggingConfig, PlayerConfig};
use sp_player::player::{open_player, DeviceSelection};
use sp_player::sink::SinkKind;
use sp_player::AudioPlayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Backend sink style
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Backend {
    /// Buffer queue, completions on the render thread
    Queue,
    /// Pull-model render callback
    Render,
    /// Polled source
    Source,
}

impl From<Backend> for SinkKind {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Queue => SinkKind::Queue,
            Backend::Render => SinkKind::Render,
            Backend::Source => SinkKind::Source,
        }
    }
}

/// Command-line arguments for sp-play
#[derive(Parser, Debug)]
#[command(name = "sp-play")]
#[command(about = "Stream a media file to an audio output device")]
#[command(version)]
struct Args {
    /// Media file path or file:// URL
    #[arg(required_unless_present = "list_devices")]
    url: Option<String>,

    /// Backend sink style
    #[arg(short, long, value_enum, default_value_t = Backend::Queue, env = "SP_PLAY_BACKEND")]
    backend: Backend,

    /// TOML configuration file
    #[arg(short, long, env = "SP_PLAY_CONFIG")]
    config: Option<PathBuf>,

    /// Output device name (overrides config)
    #[arg(short, long, env = "SP_PLAY_DEVICE")]
    device: Option<String>,

    /// Render on a software clock instead of audio hardware
    #[arg(long)]
    null_device: bool,

    /// Number of pool buffers (overrides config)
    #[arg(long)]
    pool_size: Option<usize>,

    /// Frames per pool buffer (overrides config)
    #[arg(long)]
    frames_per_buffer: Option<usize>,

    /// Interval between status lines
    #[arg(long, default_value = "1000")]
    status_interval_ms: u64,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => PlayerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PlayerConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate().context("Invalid configuration")?;

    init_logging(&config.logging)?;

    if args.list_devices {
        for name in CpalDevice::list_devices().context("Failed to list devices")? {
            println!("{}", name);
        }
        return Ok(());
    }

    let url = args
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("No media URL given"))?;
    let selection = if args.null_device {
        DeviceSelection::Clocked
    } else {
        DeviceSelection::Hardware
    };

    info!("Starting sp-play ({:?} backend): {}", args.backend, url);

    let player = open_player(args.backend.into(), url, &config, selection)
        .with_context(|| format!("Failed to start playback of {}", url))?;

    if let Some(duration) = player.duration() {
        info!("Duration: {:.1}s", duration.as_secs_f64());
    }

    let interval = Duration::from_millis(args.status_interval_ms.max(10));
    while !player.wait_until_stopped(interval) {
        let pool = player.pool_stats();
        info!(
            "{} {:.1}s | {:.0} frames/s | pool {}/{} free | underruns {}",
            player.state(),
            player.position().as_secs_f64(),
            player.frames_per_second(),
            pool.free,
            pool.size,
            player.sink_stats().underruns
        );
    }

    let fps = player.frames_per_second();
    let fault = player.fault();
    drop(player);

    match fault {
        Some(fault) => Err(anyhow::Error::new(fault).context("Playback failed")),
        None => {
            info!("Playback complete ({:.0} frames/s)", fps);
            Ok(())
        }
    }
}

/// CLI flags take precedence over file values
fn apply_overrides(config: &mut PlayerConfig, args: &Args) {
    if let Some(device) = &args.device {
        config.output.device = Some(device.clone());
    }
    if let Some(pool_size) = args.pool_size {
        config.engine.pool_size = pool_size;
    }
    if let Some(frames) = args.frames_per_buffer {
        config.engine.frames_per_buffer = frames;
    }
}

/// Initialize tracing: RUST_LOG first, configured level otherwise
fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("sp_player={0},sp_play={0}", logging.level).into());

    let file_layer = match &logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(Mutex::new(file))
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();

    if let Some(path) = &logging.file {
        info!("Also logging to {}", path.display());
    }
    Ok(())
}
