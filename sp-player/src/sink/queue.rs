//! Buffer-queue sink
//!
//! Filled slots are appended to a lock-free queue; the render callback plays
//! them in order and reports each one as soon as its last frame has been
//! copied to the device, directly from the render thread.

use super::{fault_reporter, OutputSink, Playhead, SinkCore, SinkCounters, SinkKind, SinkStats};
use crate::audio::output::OutputDevice;
use crate::audio::types::{AudioFormat, SlotId};
use crate::error::{Error, Result};
use crate::playback::buffer_pool::BufferPool;
use crate::playback::engine::CompletionHandle;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

pub struct QueueSink {
    core: SinkCore,
    queue: OnceLock<Arc<ArrayQueue<SlotId>>>,
    abandoned: Arc<AtomicBool>,
    counters: Arc<SinkCounters>,
}

impl QueueSink {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            core: SinkCore::new(device),
            queue: OnceLock::new(),
            abandoned: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SinkCounters::default()),
        }
    }

    /// Buffers waiting to be rendered
    pub fn queued(&self) -> usize {
        self.queue.get().map_or(0, |q| q.len())
    }

    fn queue(&self) -> Result<&Arc<ArrayQueue<SlotId>>> {
        self.queue
            .get()
            .ok_or_else(|| Error::InvalidState("Sink not prepared".to_string()))
    }
}

impl OutputSink for QueueSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Queue
    }

    fn format(&self) -> AudioFormat {
        self.core.format()
    }

    fn device_name(&self) -> String {
        self.core.name()
    }

    fn prepare(&self, pool: Arc<BufferPool>, completion: CompletionHandle) -> Result<()> {
        let capacity = pool.size();
        self.core.wire(pool, completion)?;
        let _ = self.queue.set(Arc::new(ArrayQueue::new(capacity)));
        Ok(())
    }

    fn enqueue(&self, slot: SlotId) -> Result<()> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(Error::InvalidState("Sink abandoned".to_string()));
        }
        self.queue()?
            .push(slot)
            .map_err(|slot| Error::AudioOutput(format!("Queue full, cannot enqueue {}", slot)))
    }

    fn start(&self) -> Result<()> {
        let wiring = self.core.wiring()?.clone();
        let queue = Arc::clone(self.queue()?);
        let abandoned = Arc::clone(&self.abandoned);
        let counters = Arc::clone(&self.counters);
        let completion = wiring.completion.clone();
        let mut playhead = Playhead::new(wiring.pool);

        let render = move |out: &mut [f32]| {
            if abandoned.load(Ordering::Acquire) {
                out.fill(0.0);
                return;
            }
            let outcome = playhead.render(
                out,
                || queue.pop(),
                |slot, frames| completion.complete(slot, frames),
            );
            counters.record(&outcome);
        };

        self.core
            .device()
            .start(Box::new(render), fault_reporter(&wiring.completion))
    }

    fn abandon(&self) {
        if self.abandoned.swap(true, Ordering::AcqRel) {
            return;
        }
        self.core.device().stop();

        let mut dropped = 0;
        if let Some(queue) = self.queue.get() {
            while queue.pop().is_some() {
                dropped += 1;
            }
        }
        debug!("Queue sink abandoned ({} buffers dropped)", dropped);
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}
