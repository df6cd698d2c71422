//! Headless output devices
//!
//! - [`ClockedDevice`]: renders on a software clock thread at the real-time
//!   rate of its format and discards the output. Used by `--null-device`.
//! - [`ManualDevice`]: renders only when the paired [`ManualDriver`] asks
//!   for a block, so tests control exactly when buffers are consumed.

use crate::audio::output::{ErrorFn, OutputDevice, RenderFn};
use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Default period of the software clock in frames (~23ms at 44.1kHz)
pub const DEFAULT_PERIOD_FRAMES: usize = 1024;

/// Output device driven by a software real-time clock.
pub struct ClockedDevice {
    format: AudioFormat,
    period_frames: usize,
    stop_flag: Arc<AtomicBool>,
    frames_rendered: Arc<AtomicU64>,
    handle: Option<JoinHandle<()>>,
}

impl ClockedDevice {
    pub fn new(format: AudioFormat) -> Self {
        Self::with_period(format, DEFAULT_PERIOD_FRAMES)
    }

    /// Clock that renders `period_frames` frames per tick.
    pub fn with_period(format: AudioFormat, period_frames: usize) -> Self {
        Self {
            format,
            period_frames: period_frames.max(1),
            stop_flag: Arc::new(AtomicBool::new(false)),
            frames_rendered: Arc::new(AtomicU64::new(0)),
            handle: None,
        }
    }

    /// Frames pulled from the render callback so far
    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered.load(Ordering::Relaxed)
    }

    fn period(&self) -> Duration {
        if self.format.sample_rate == 0 {
            return Duration::from_millis(10);
        }
        Duration::from_nanos(self.period_frames as u64 * 1_000_000_000 / self.format.sample_rate as u64)
    }
}

impl OutputDevice for ClockedDevice {
    fn name(&self) -> String {
        "null (software clock)".to_string()
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, mut render: RenderFn, _on_error: ErrorFn) -> Result<()> {
        if self.handle.is_some() {
            return Err(Error::InvalidState("Device already started".to_string()));
        }

        self.stop_flag.store(false, Ordering::Release);
        let stop_flag = Arc::clone(&self.stop_flag);
        let frames_rendered = Arc::clone(&self.frames_rendered);
        let period = self.period();
        let mut block = vec![0.0f32; self.format.samples_for(self.period_frames)];
        let frames = self.period_frames as u64;

        let handle = thread::Builder::new()
            .name("clocked-output".to_string())
            .spawn(move || {
                let mut deadline = Instant::now();
                while !stop_flag.load(Ordering::Acquire) {
                    render(&mut block);
                    frames_rendered.fetch_add(frames, Ordering::Relaxed);

                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        thread::sleep(deadline - now);
                    } else {
                        // Fell behind; restart the schedule rather than burst
                        deadline = now;
                    }
                }
                debug!("Clocked output thread exiting");
            })
            .map_err(|e| Error::DeviceInitFailed(format!("Failed to spawn clock thread: {}", e)))?;

        info!(
            "Software clock started: {} frames every {:?}",
            self.period_frames, period
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.stop_flag.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            info!("Software clock stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.handle.is_some()
    }
}

impl Drop for ClockedDevice {
    fn drop(&mut self) {
        self.stop();
    }
}

struct ManualShared {
    render: Mutex<Option<RenderFn>>,
    on_error: Mutex<Option<ErrorFn>>,
    running: AtomicBool,
}

/// Output device rendered on demand by a [`ManualDriver`].
pub struct ManualDevice {
    format: AudioFormat,
    shared: Arc<ManualShared>,
}

/// Test-side handle that pumps a [`ManualDevice`].
#[derive(Clone)]
pub struct ManualDriver {
    format: AudioFormat,
    shared: Arc<ManualShared>,
}

impl ManualDevice {
    /// Create a device and the driver that renders it.
    pub fn new(format: AudioFormat) -> (Self, ManualDriver) {
        let shared = Arc::new(ManualShared {
            render: Mutex::new(None),
            on_error: Mutex::new(None),
            running: AtomicBool::new(false),
        });
        let driver = ManualDriver {
            format,
            shared: Arc::clone(&shared),
        };
        (Self { format, shared }, driver)
    }
}

impl OutputDevice for ManualDevice {
    fn name(&self) -> String {
        "manual".to_string()
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn start(&mut self, render: RenderFn, on_error: ErrorFn) -> Result<()> {
        if self.shared.running.load(Ordering::Acquire) {
            return Err(Error::InvalidState("Device already started".to_string()));
        }
        *self.shared.render.lock().unwrap_or_else(PoisonError::into_inner) = Some(render);
        *self.shared.on_error.lock().unwrap_or_else(PoisonError::into_inner) = Some(on_error);
        self.shared.running.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        // Waits for an in-progress render to return
        self.shared.render.lock().unwrap_or_else(PoisonError::into_inner).take();
        self.shared.on_error.lock().unwrap_or_else(PoisonError::into_inner).take();
    }

    fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl ManualDriver {
    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Render `frames` frames. Returns None if the device is not running.
    pub fn render(&self, frames: usize) -> Option<Vec<f32>> {
        let mut block = vec![0.0f32; self.format.samples_for(frames)];
        if self.render_into(&mut block) {
            Some(block)
        } else {
            None
        }
    }

    /// Render into `block`. Returns false (block untouched) if not running.
    pub fn render_into(&self, block: &mut [f32]) -> bool {
        let mut guard = self.shared.render.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(render) => {
                render(block);
                true
            }
            None => false,
        }
    }

    /// Simulate an asynchronous device failure.
    pub fn raise_error(&self, message: &str) -> bool {
        let mut guard = self.shared.on_error.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(on_error) => {
                on_error(message.to_string());
                true
            }
            None => false,
        }
    }
}
