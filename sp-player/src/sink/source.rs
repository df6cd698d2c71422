//! Polled source sink
//!
//! Works like a positional-audio source: buffers are queued on the source,
//! the render callback plays them and moves each exhausted buffer to a
//! "processed" list, and a poll thread unqueues processed buffers every
//! `source_poll_interval_ms`. Completions are reported from the poll
//! thread, never from the render thread.

use super::{fault_reporter, OutputSink, Playhead, SinkCore, SinkCounters, SinkKind, SinkStats};
use crate::audio::output::OutputDevice;
use crate::audio::types::{AudioFormat, SlotId};
use crate::error::{Error, Result};
use crate::playback::buffer_pool::BufferPool;
use crate::playback::engine::CompletionHandle;
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error};

/// Queued and processed buffer lists
struct SourceQueues {
    queued: ArrayQueue<SlotId>,
    processed: ArrayQueue<(SlotId, usize)>,
}

pub struct SourceSink {
    core: SinkCore,
    poll_interval: Duration,
    queues: OnceLock<Arc<SourceQueues>>,
    abandoned: Arc<AtomicBool>,
    counters: Arc<SinkCounters>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SourceSink {
    pub fn new(device: Box<dyn OutputDevice>, poll_interval: Duration) -> Self {
        Self {
            core: SinkCore::new(device),
            poll_interval,
            queues: OnceLock::new(),
            abandoned: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SinkCounters::default()),
            poller: Mutex::new(None),
        }
    }

    fn queues(&self) -> Result<&Arc<SourceQueues>> {
        self.queues
            .get()
            .ok_or_else(|| Error::InvalidState("Sink not prepared".to_string()))
    }

    /// Rendered buffers not yet unqueued by the poll thread
    pub fn processed(&self) -> usize {
        self.queues.get().map_or(0, |q| q.processed.len())
    }
}

impl OutputSink for SourceSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Source
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
        let _ = self.queues.set(Arc::new(SourceQueues {
            queued: ArrayQueue::new(capacity),
            processed: ArrayQueue::new(capacity),
        }));
        Ok(())
    }

    fn enqueue(&self, slot: SlotId) -> Result<()> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(Error::InvalidState("Sink abandoned".to_string()));
        }
        self.queues()?
            .queued
            .push(slot)
            .map_err(|slot| Error::AudioOutput(format!("Source queue full, cannot enqueue {}", slot)))
    }

    fn start(&self) -> Result<()> {
        let wiring = self.core.wiring()?.clone();
        let queues = Arc::clone(self.queues()?);

        let poller = {
            let queues = Arc::clone(&queues);
            let abandoned = Arc::clone(&self.abandoned);
            let completion = wiring.completion.clone();
            let interval = self.poll_interval;

            thread::Builder::new()
                .name("source-poll".to_string())
                .spawn(move || {
                    while !abandoned.load(Ordering::Acquire) {
                        while let Some((slot, frames)) = queues.processed.pop() {
                            completion.complete(slot, frames);
                        }
                        thread::sleep(interval);
                    }
                    debug!("Source poll thread exiting");
                })
                .map_err(|e| {
                    Error::DeviceInitFailed(format!("Failed to spawn source poll thread: {}", e))
                })?
        };
        *self.poller.lock().unwrap_or_else(PoisonError::into_inner) = Some(poller);

        let abandoned = Arc::clone(&self.abandoned);
        let counters = Arc::clone(&self.counters);
        let mut playhead = Playhead::new(wiring.pool);

        let render = move |out: &mut [f32]| {
            if abandoned.load(Ordering::Acquire) {
                out.fill(0.0);
                return;
            }
            let outcome = playhead.render(
                out,
                || queues.queued.pop(),
                |slot, frames| {
                    // Capacity equals pool size, each slot appears at most once
                    let _ = queues.processed.push((slot, frames));
                },
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

        let poller = self
            .poller
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = poller {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                error!("Source poll thread panicked");
            }
        }

        let mut dropped = 0;
        if let Some(queues) = self.queues.get() {
            while queues.queued.pop().is_some() {
                dropped += 1;
            }
            while queues.processed.pop().is_some() {
                dropped += 1;
            }
        }
        debug!("Source sink abandoned ({} buffers dropped)", dropped);
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}
