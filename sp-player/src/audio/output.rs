//! Audio output devices
//!
//! An [`OutputDevice`] is the hardware render clock: once started it calls
//! the render callback on its own real-time context, asking for the next
//! block of interleaved f32 samples.
//!
//! [`CpalDevice`] drives real hardware through cpal. Because `cpal::Stream`
//! is not `Send` on every host, the stream lives on a dedicated keeper thread
//! and is controlled through a command channel.

use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{
    BufferSize, Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig,
};
use crossbeam::channel::{bounded, Receiver, Sender};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

/// Render callback: fill the slice with interleaved samples.
///
/// Runs on the device's real-time context. Must not block, allocate or log.
pub type RenderFn = Box<dyn FnMut(&mut [f32]) + Send + 'static>;

/// Device error callback, invoked off the render path when the stream fails.
pub type ErrorFn = Box<dyn FnMut(String) + Send + 'static>;

/// Minimum frames preallocated for format conversion in the cpal callback
const SCRATCH_FRAMES: usize = 8192;

/// Hardware (or simulated) render clock.
pub trait OutputDevice: Send {
    /// Human-readable device name
    fn name(&self) -> String;

    /// Sample rate and channel layout the device renders
    fn format(&self) -> AudioFormat;

    /// Begin calling `render` on the device context.
    fn start(&mut self, render: RenderFn, on_error: ErrorFn) -> Result<()>;

    /// Stop rendering and drop the render callback. Idempotent.
    fn stop(&mut self);

    fn is_running(&self) -> bool;
}

enum Command {
    Start(RenderFn, ErrorFn),
    Stop,
    Shutdown,
}

/// Output device backed by cpal.
pub struct CpalDevice {
    name: String,
    format: AudioFormat,
    running: bool,
    commands: Sender<Command>,
    replies: Receiver<Result<()>>,
    keeper: Option<JoinHandle<()>>,
}

impl CpalDevice {
    /// List available audio output devices.
    pub fn list_devices() -> Result<Vec<String>> {
        let host = cpal::default_host();

        let devices: Vec<String> = host
            .output_devices()
            .map_err(|e| Error::DeviceInitFailed(format!("Failed to enumerate devices: {}", e)))?
            .filter_map(|device| device.name().ok())
            .collect();

        debug!("Found {} output devices", devices.len());
        Ok(devices)
    }

    /// Open an output device.
    ///
    /// # Arguments
    /// - `device_name`: Optional device name (None = default device). Falls
    ///   back to the default device if the name is not found.
    /// - `preferred`: Stream format to negotiate (rate and channels)
    /// - `buffer_frames`: Optional fixed period in frames
    ///
    /// # Errors
    /// - `DeviceInitFailed`: no usable device or configuration
    pub fn open(
        device_name: Option<&str>,
        preferred: AudioFormat,
        buffer_frames: Option<u32>,
    ) -> Result<Self> {
        let (command_tx, command_rx) = bounded::<Command>(1);
        let (reply_tx, reply_rx) = bounded::<Result<()>>(1);
        let (opened_tx, opened_rx) = bounded::<Result<(String, AudioFormat)>>(1);
        let requested = device_name.map(str::to_string);

        let keeper = thread::Builder::new()
            .name("cpal-output".to_string())
            .spawn(move || {
                let opened = open_device(requested.as_deref(), preferred, buffer_frames);
                let (device, config, sample_format) = match opened {
                    Ok(parts) => parts,
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
                let format = AudioFormat::new(
                    config.sample_rate.0,
                    config.channels,
                    (sample_format.sample_size() * 8) as u16,
                );
                if opened_tx.send(Ok((name, format))).is_err() {
                    return;
                }

                keep_stream(device, config, sample_format, command_rx, reply_tx);
            })
            .map_err(|e| Error::DeviceInitFailed(format!("Failed to spawn output thread: {}", e)))?;

        let (name, format) = opened_rx
            .recv()
            .map_err(|_| Error::DeviceInitFailed("Output thread exited during open".to_string()))??;

        info!("Using audio device: {} ({})", name, format);

        Ok(Self {
            name,
            format,
            running: false,
            commands: command_tx,
            replies: reply_rx,
            keeper: Some(keeper),
        })
    }

    fn request(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::AudioOutput("Output thread is gone".to_string()))?;
        self.replies
            .recv()
            .map_err(|_| Error::AudioOutput("Output thread is gone".to_string()))?
    }
}

/// Resolve device and stream configuration.
fn open_device(
    device_name: Option<&str>,
    preferred: AudioFormat,
    buffer_frames: Option<u32>,
) -> Result<(Device, StreamConfig, SampleFormat)> {
    let host = cpal::default_host();

    let device = match device_name {
        Some(name) => {
            let mut devices = host.output_devices().map_err(|e| {
                Error::DeviceInitFailed(format!("Failed to enumerate devices: {}", e))
            })?;

            match devices.find(|d| d.name().ok().as_deref() == Some(name)) {
                Some(dev) => dev,
                None => {
                    warn!("Requested device '{}' not found, falling back to default device", name);
                    host.default_output_device().ok_or_else(|| {
                        Error::DeviceInitFailed(format!(
                            "Device '{}' not found and no default device available",
                            name
                        ))
                    })?
                }
            }
        }
        None => host
            .default_output_device()
            .ok_or_else(|| Error::DeviceInitFailed("No default output device found".to_string()))?,
    };

    let (mut config, sample_format) = best_config(&device, preferred)?;

    if let Some(size) = buffer_frames {
        config.buffer_size = cpal::BufferSize::Fixed(size);
        debug!("Using requested buffer size: {} frames", size);
    }

    Ok((device, config, sample_format))
}

/// Pick a configuration matching the stream's rate and channels, preferring f32.
///
/// Falls back to the device default; a mismatch is then reported by the
/// engine's format check.
fn best_config(device: &Device, preferred: AudioFormat) -> Result<(StreamConfig, SampleFormat)> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err(|e| Error::DeviceInitFailed(format!("Failed to get device configs: {}", e)))?
        .filter(|config| {
            config.channels() == preferred.channels
                && config.min_sample_rate().0 <= preferred.sample_rate
                && config.max_sample_rate().0 >= preferred.sample_rate
        })
        .collect();

    let usable = |f: SampleFormat| matches!(f, SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16);

    let chosen = supported
        .iter()
        .find(|c| c.sample_format() == SampleFormat::F32)
        .or_else(|| supported.iter().find(|c| usable(c.sample_format())));

    if let Some(range) = chosen {
        let sample_format = range.sample_format();
        let config = range
            .clone()
            .with_sample_rate(cpal::SampleRate(preferred.sample_rate))
            .config();
        return Ok((config, sample_format));
    }

    warn!(
        "No device configuration matches {}, using device default",
        preferred
    );
    let default = device
        .default_output_config()
        .map_err(|e| Error::DeviceInitFailed(format!("Failed to get default config: {}", e)))?;
    Ok((default.config(), default.sample_format()))
}

/// Keeper thread body: owns the stream until shutdown.
fn keep_stream(
    device: Device,
    config: StreamConfig,
    sample_format: SampleFormat,
    commands: Receiver<Command>,
    replies: Sender<Result<()>>,
) {
    let mut stream: Option<Stream> = None;

    while let Ok(command) = commands.recv() {
        match command {
            Command::Start(render, on_error) => {
                let result = build_stream_for(&device, &config, sample_format, render, on_error)
                    .and_then(|s| {
                        s.play().map_err(|e| {
                            Error::DeviceInitFailed(format!("Failed to start stream: {}", e))
                        })?;
                        Ok(s)
                    });
                let reply = match result {
                    Ok(s) => {
                        stream = Some(s);
                        info!("Audio stream started");
                        Ok(())
                    }
                    Err(e) => Err(e),
                };
                let _ = replies.send(reply);
            }
            Command::Stop => {
                if let Some(s) = stream.take() {
                    if let Err(e) = s.pause() {
                        warn!("Failed to pause stream: {}", e);
                    }
                    drop(s);
                    info!("Audio stream stopped");
                }
                let _ = replies.send(Ok(()));
            }
            Command::Shutdown => break,
        }
    }

    drop(stream);
    debug!("Output thread exiting");
}

fn build_stream_for(
    device: &Device,
    config: &StreamConfig,
    sample_format: SampleFormat,
    render: RenderFn,
    on_error: ErrorFn,
) -> Result<Stream> {
    match sample_format {
        SampleFormat::F32 => build_stream::<f32>(device, config, render, on_error),
        SampleFormat::I16 => build_stream::<i16>(device, config, render, on_error),
        SampleFormat::U16 => build_stream::<u16>(device, config, render, on_error),
        other => Err(Error::DeviceInitFailed(format!(
            "Unsupported sample format: {:?}",
            other
        ))),
    }
}

/// Scratch size in frames: the fixed period if one was requested, never
/// less than `SCRATCH_FRAMES`.
fn scratch_frames(config: &StreamConfig) -> usize {
    match config.buffer_size {
        BufferSize::Fixed(frames) => (frames as usize).max(SCRATCH_FRAMES),
        BufferSize::Default => SCRATCH_FRAMES,
    }
}

/// Render `data` through `scratch`, one scratch-sized chunk at a time.
///
/// `scratch` holds whole frames, so chunks never split a frame.
fn render_converted<T, R>(data: &mut [T], scratch: &mut [f32], render: &mut R)
where
    T: Sample + FromSample<f32>,
    R: FnMut(&mut [f32]) + ?Sized,
{
    for chunk in data.chunks_mut(scratch.len().max(1)) {
        let block = &mut scratch[..chunk.len()];
        render(block);
        for (out, sample) in chunk.iter_mut().zip(block.iter()) {
            *out = T::from_sample(sample.clamp(-1.0, 1.0));
        }
    }
}

/// Build an output stream converting rendered f32 samples to the device type.
fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    mut render: RenderFn,
    mut on_error: ErrorFn,
) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels.max(1) as usize;
    let mut scratch = vec![0.0f32; scratch_frames(config) * channels];

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                render_converted(data, &mut scratch, &mut render);
            },
            move |err| {
                error!("Audio stream error: {}", err);
                on_error(err.to_string());
            },
            None,
        )
        .map_err(|e| Error::DeviceInitFailed(format!("Failed to build stream: {}", e)))
}

impl OutputDevice for CpalDevice {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, render: RenderFn, on_error: ErrorFn) -> Result<()> {
        if self.running {
            return Err(Error::InvalidState("Device already started".to_string()));
        }
        self.request(Command::Start(render, on_error))?;
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) {
        if !self.running {
            return;
        }
        if let Err(e) = self.request(Command::Stop) {
            warn!("Failed to stop audio stream: {}", e);
        }
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }
}

impl Drop for CpalDevice {
    fn drop(&mut self) {
        self.stop();
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.keeper.take() {
            let _ = handle.join();
        }
    }
}
