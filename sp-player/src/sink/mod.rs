//! Backend output sinks
//!
//! An [`OutputSink`] takes filled pool buffers from the fill scheduler,
//! renders them through an [`OutputDevice`](crate::audio::output::OutputDevice)
//! and reports each consumed buffer exactly once through the engine's
//! [`CompletionHandle`].
//!
//! | Sink | Buffer hand-off | Completion context |
//! |------|-----------------|--------------------|
//! | [`QueueSink`] | slot ids in a lock-free queue | render thread |
//! | [`RenderSink`] | samples staged in a ring buffer | render thread |
//! | [`SourceSink`] | slot ids, processed list polled | poll thread |
//!
//! After `abandon()` a sink renders nothing, accepts no buffers, and makes
//! no further completion calls on its own; the engine reclaims whatever was
//! still queued.

mod playhead;
mod queue;
mod render;
mod source;

pub use playhead::{Playhead, RenderOutcome};
pub use queue::QueueSink;
pub use render::RenderSink;
pub use source::SourceSink;

use crate::audio::output::OutputDevice;
use crate::audio::types::{AudioFormat, SlotId};
use crate::error::{Error, Result};
use crate::playback::buffer_pool::BufferPool;
use crate::playback::engine::CompletionHandle;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

/// Which backend style a sink implements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Buffer queue with callbacks on the render thread
    Queue,
    /// Pull-model render callback over staged samples
    Render,
    /// Source with a polled processed-buffer list
    Source,
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SinkKind::Queue => "queue",
            SinkKind::Render => "render",
            SinkKind::Source => "source",
        };
        f.write_str(name)
    }
}

/// Render-path counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Render callbacks since start
    pub callbacks: u64,

    /// Callbacks that could not fill the whole block (includes the silent
    /// tail after the last buffer)
    pub underruns: u64,

    /// Frames of audio rendered
    pub frames_rendered: u64,

    /// Buffers passed back to the completion handle
    pub buffers_completed: u64,
}

/// Backend output capability the engine is written against.
pub trait OutputSink: Send + Sync {
    fn kind(&self) -> SinkKind;

    /// Format of the underlying device
    fn format(&self) -> AudioFormat;

    fn device_name(&self) -> String;

    /// Wire the sink to the pool and completion path. Called once, before
    /// any `enqueue`.
    fn prepare(&self, pool: Arc<BufferPool>, completion: CompletionHandle) -> Result<()>;

    /// Hand a Queued slot to the backend. Accepted before `start()`.
    fn enqueue(&self, slot: SlotId) -> Result<()>;

    /// Start the device render callback.
    fn start(&self) -> Result<()>;

    /// Stop rendering and drop every queued buffer without completing it.
    /// Idempotent.
    fn abandon(&self);

    fn stats(&self) -> SinkStats;
}

/// Atomic counters bumped from the render path
#[derive(Debug, Default)]
pub(crate) struct SinkCounters {
    callbacks: AtomicU64,
    underruns: AtomicU64,
    frames: AtomicU64,
    completed: AtomicU64,
}

impl SinkCounters {
    pub(crate) fn record(&self, outcome: &RenderOutcome) {
        self.callbacks.fetch_add(1, Ordering::Relaxed);
        if outcome.underrun {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
        self.frames.fetch_add(outcome.frames as u64, Ordering::Relaxed);
        self.completed
            .fetch_add(outcome.buffers_completed as u64, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> SinkStats {
        SinkStats {
            callbacks: self.callbacks.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
            frames_rendered: self.frames.load(Ordering::Relaxed),
            buffers_completed: self.completed.load(Ordering::Relaxed),
        }
    }
}

/// Pool and completion handle captured by `prepare()`
#[derive(Clone)]
pub(crate) struct Wiring {
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) completion: CompletionHandle,
}

/// Device plus the once-only wiring every sink variant carries
pub(crate) struct SinkCore {
    device: Mutex<Box<dyn OutputDevice>>,
    format: AudioFormat,
    name: String,
    wiring: OnceLock<Wiring>,
}

impl SinkCore {
    pub(crate) fn new(device: Box<dyn OutputDevice>) -> Self {
        let format = device.format();
        let name = device.name();
        Self {
            device: Mutex::new(device),
            format,
            name,
            wiring: OnceLock::new(),
        }
    }

    pub(crate) fn format(&self) -> AudioFormat {
        self.format
    }

    pub(crate) fn name(&self) -> String {
        self.name.clone()
    }

    pub(crate) fn wire(&self, pool: Arc<BufferPool>, completion: CompletionHandle) -> Result<()> {
        self.wiring
            .set(Wiring { pool, completion })
            .map_err(|_| Error::InvalidState("Sink already prepared".to_string()))
    }

    pub(crate) fn wiring(&self) -> Result<&Wiring> {
        self.wiring
            .get()
            .ok_or_else(|| Error::InvalidState("Sink not prepared".to_string()))
    }

    pub(crate) fn device(&self) -> MutexGuard<'_, Box<dyn OutputDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Device error callback that turns a device failure into an engine fault
pub(crate) fn fault_reporter(completion: &CompletionHandle) -> crate::audio::output::ErrorFn {
    let completion = completion.clone();
    Box::new(move |message| completion.fault(message))
}
