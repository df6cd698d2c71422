//! Public player types
//!
//! Three interchangeable players share one contract, [`AudioPlayer`]:
//! construct from a media URL, read the frame rate, read the stopped flag.
//! Each wraps the same [`PlaybackEngine`] over a different backend sink:
//!
//! - [`QueuePlayer`]: buffer queue, completions on the render thread
//! - [`RenderPlayer`]: pull-model render callback over staged samples
//! - [`SourcePlayer`]: polled source with a processed-buffer list
//!
//! Every read-only accessor is lock-free and safe to call from any thread
//! while playback runs.

use crate::audio::decoder::{Decoder, MediaLocation, SymphoniaDecoder};
use crate::audio::null::ClockedDevice;
use crate::audio::output::{CpalDevice, OutputDevice};
use crate::audio::types::AudioFormat;
use crate::config::{EngineConfig, PlayerConfig};
use crate::error::Result;
use crate::playback::buffer_pool::PoolStats;
use crate::playback::engine::PlaybackEngine;
use crate::playback::state::{PlaybackFault, PlaybackState};
use crate::sink::{OutputSink, QueueSink, RenderSink, SinkKind, SinkStats, SourceSink};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where a URL-constructed player sends its audio
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelection {
    /// cpal output device from `[output]` config
    Hardware,
    /// Software clock, no audio hardware needed
    Clocked,
}

/// Contract shared by all player types.
pub trait AudioPlayer: Send + Sync {
    /// Engine behind this player
    fn engine(&self) -> &PlaybackEngine;

    /// Frames rendered per second since playback start.
    ///
    /// 0 before the first buffer completes; never decreases; frozen once
    /// stopped.
    fn frames_per_second(&self) -> f64 {
        self.engine().frames_per_second()
    }

    /// True once playback has ended or been stopped. Never reverts.
    fn is_stopped(&self) -> bool {
        self.engine().is_stopped()
    }

    /// Stop now. Idempotent.
    fn stop(&self) {
        self.engine().stop()
    }

    fn state(&self) -> PlaybackState {
        self.engine().state()
    }

    /// Error that ended playback, if any
    fn fault(&self) -> Option<PlaybackFault> {
        self.engine().fault()
    }

    fn position(&self) -> Duration {
        self.engine().position()
    }

    fn frames_rendered(&self) -> u64 {
        self.engine().frames_rendered()
    }

    fn decoded_frames(&self) -> u64 {
        self.engine().decoded_frames()
    }

    /// Stream length, when the container reports it
    fn duration(&self) -> Option<Duration> {
        self.engine().duration()
    }

    fn completed_buffers(&self) -> u64 {
        self.engine().completed_buffers()
    }

    fn format(&self) -> AudioFormat {
        self.engine().format()
    }

    fn pool_stats(&self) -> PoolStats {
        self.engine().pool_stats()
    }

    fn sink_stats(&self) -> SinkStats {
        self.engine().sink_stats()
    }

    fn sink_kind(&self) -> SinkKind {
        self.engine().sink_kind()
    }

    /// Block until stopped or `timeout`. Returns the stopped flag.
    fn wait_until_stopped(&self, timeout: Duration) -> bool {
        self.engine().wait_until_stopped(timeout)
    }
}

/// Build the sink for `kind` around `device`.
fn build_sink(kind: SinkKind, device: Box<dyn OutputDevice>, config: &EngineConfig) -> Arc<dyn OutputSink> {
    match kind {
        SinkKind::Queue => Arc::new(QueueSink::new(device)),
        SinkKind::Render => Arc::new(RenderSink::new(device)),
        SinkKind::Source => Arc::new(SourceSink::new(device, config.source_poll_interval())),
    }
}

fn build_engine(
    kind: SinkKind,
    decoder: Box<dyn Decoder>,
    device: Box<dyn OutputDevice>,
    config: &EngineConfig,
) -> Result<PlaybackEngine> {
    let sink = build_sink(kind, device, config);
    PlaybackEngine::new(decoder, sink, config)
}

/// Resolve `url`, open the decoder and the device, and start the engine.
///
/// # Errors
/// - `NotFound`: URL does not resolve to a readable file
/// - `UnsupportedFormat`: decoder cannot read it, or the device cannot play its format
/// - `DeviceInitFailed`: no usable output device
fn open_engine(
    kind: SinkKind,
    url: &str,
    config: &PlayerConfig,
    selection: DeviceSelection,
) -> Result<PlaybackEngine> {
    config.validate()?;

    let location = MediaLocation::parse(url)?;
    let decoder = SymphoniaDecoder::open(&location)?;
    let format = decoder.format();
    debug!("Opened {} as {}", location.url(), format);

    let device: Box<dyn OutputDevice> = match selection {
        DeviceSelection::Hardware => Box::new(CpalDevice::open(
            config.output.device.as_deref(),
            format,
            config.output.buffer_frames,
        )?),
        DeviceSelection::Clocked => Box::new(ClockedDevice::new(format)),
    };

    build_engine(kind, Box::new(decoder), device, &config.engine)
}

/// Open a player of the given backend style behind the common contract.
pub fn open_player(
    kind: SinkKind,
    url: &str,
    config: &PlayerConfig,
    selection: DeviceSelection,
) -> Result<Box<dyn AudioPlayer>> {
    let engine = open_engine(kind, url, config, selection)?;
    Ok(match kind {
        SinkKind::Queue => Box::new(QueuePlayer { engine }),
        SinkKind::Render => Box::new(RenderPlayer { engine }),
        SinkKind::Source => Box::new(SourcePlayer { engine }),
    })
}

macro_rules! player_type {
    ($(#[$meta:meta])* $name:ident, $kind:expr) => {
        $(#[$meta])*
        pub struct $name {
            engine: PlaybackEngine,
        }

        impl $name {
            /// Open `url` on the configured hardware output device.
            pub fn open(url: &str, config: &PlayerConfig) -> Result<Self> {
                Self::open_with(url, config, DeviceSelection::Hardware)
            }

            pub fn open_with(
                url: &str,
                config: &PlayerConfig,
                selection: DeviceSelection,
            ) -> Result<Self> {
                let engine = open_engine($kind, url, config, selection)?;
                Ok(Self { engine })
            }

            /// Build from an already opened decoder and device.
            pub fn with_parts(
                decoder: Box<dyn Decoder>,
                device: Box<dyn OutputDevice>,
                config: &EngineConfig,
            ) -> Result<Self> {
                let engine = build_engine($kind, decoder, device, config)?;
                Ok(Self { engine })
            }
        }

        impl AudioPlayer for $name {
            fn engine(&self) -> &PlaybackEngine {
                &self.engine
            }
        }
    };
}

player_type!(
    /// Player over the buffer-queue sink.
    QueuePlayer,
    SinkKind::Queue
);

player_type!(
    /// Player over the pull-model render sink.
    RenderPlayer,
    SinkKind::Render
);

player_type!(
    /// Player over the polled source sink.
    SourcePlayer,
    SinkKind::Source
);
