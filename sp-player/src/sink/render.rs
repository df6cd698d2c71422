//! Pull-model render sink
//!
//! `enqueue` copies a filled buffer's samples into a lock-free sample ring
//! and records where the buffer ends in the sample stream. The render
//! callback pulls samples from the ring and completes a buffer once the
//! device has consumed past its end mark.
//!
//! ## Thread Safety
//!
//! - Producer half of the ring is behind a `Mutex`, touched only by the fill
//!   scheduler (`HeapProd::push_slice` needs `&mut self`)
//! - Consumer half is moved into the render closure at `start()`
//! - End marks cross threads through a lock-free `ArrayQueue`

use super::{
    fault_reporter, OutputSink, RenderOutcome, SinkCore, SinkCounters, SinkKind, SinkStats,
};
use crate::audio::output::OutputDevice;
use crate::audio::types::{AudioFormat, SlotId};
use crate::error::{Error, Result};
use crate::playback::buffer_pool::BufferPool;
use crate::playback::engine::CompletionHandle;
use crossbeam::queue::ArrayQueue;
use ringbuf::{traits::*, HeapCons, HeapProd, HeapRb};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tracing::debug;

/// Position in the staged sample stream where a buffer ends
#[derive(Debug, Clone, Copy)]
struct EndMark {
    slot: SlotId,
    end: u64,
    frames: usize,
}

struct Staging {
    producer: HeapProd<f32>,

    /// Samples pushed so far
    written: u64,
}

pub struct RenderSink {
    core: SinkCore,
    staging: Mutex<Option<Staging>>,
    consumer: Mutex<Option<HeapCons<f32>>>,
    marks: OnceLock<Arc<ArrayQueue<EndMark>>>,
    abandoned: Arc<AtomicBool>,
    counters: Arc<SinkCounters>,
}

impl RenderSink {
    pub fn new(device: Box<dyn OutputDevice>) -> Self {
        Self {
            core: SinkCore::new(device),
            staging: Mutex::new(None),
            consumer: Mutex::new(None),
            marks: OnceLock::new(),
            abandoned: Arc::new(AtomicBool::new(false)),
            counters: Arc::new(SinkCounters::default()),
        }
    }

    fn marks(&self) -> Result<&Arc<ArrayQueue<EndMark>>> {
        self.marks
            .get()
            .ok_or_else(|| Error::InvalidState("Sink not prepared".to_string()))
    }

    /// Samples staged but not yet rendered
    pub fn staged_samples(&self) -> usize {
        self.staging
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map_or(0, |s| s.producer.occupied_len())
    }
}

impl OutputSink for RenderSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Render
    }

    fn format(&self) -> AudioFormat {
        self.core.format()
    }

    fn device_name(&self) -> String {
        self.core.name()
    }

    fn prepare(&self, pool: Arc<BufferPool>, completion: CompletionHandle) -> Result<()> {
        // Room for every pool buffer at once
        let capacity = pool.size() * pool.format().samples_for(pool.frames_per_buffer());
        let marks = Arc::new(ArrayQueue::new(pool.size()));
        self.core.wire(pool, completion)?;

        let (producer, consumer) = HeapRb::<f32>::new(capacity.max(1)).split();
        *self.staging.lock().unwrap_or_else(PoisonError::into_inner) = Some(Staging {
            producer,
            written: 0,
        });
        *self.consumer.lock().unwrap_or_else(PoisonError::into_inner) = Some(consumer);
        let _ = self.marks.set(marks);

        debug!("Render sink staging ring: {} samples", capacity);
        Ok(())
    }

    fn enqueue(&self, slot: SlotId) -> Result<()> {
        if self.abandoned.load(Ordering::Acquire) {
            return Err(Error::InvalidState("Sink abandoned".to_string()));
        }
        let wiring = self.core.wiring()?;
        let marks = self.marks()?;

        let mut guard = self.staging.lock().unwrap_or_else(PoisonError::into_inner);
        let staging = guard
            .as_mut()
            .ok_or_else(|| Error::InvalidState("Sink not prepared".to_string()))?;

        let buffer = wiring
            .pool
            .buffer(slot)
            .ok_or_else(|| Error::InvalidState(format!("{} out of range", slot)))?;
        let samples = buffer.samples();

        if staging.producer.vacant_len() < samples.len() {
            return Err(Error::AudioOutput(format!(
                "Staging ring full: {} samples needed, {} free",
                samples.len(),
                staging.producer.vacant_len()
            )));
        }

        let pushed = staging.producer.push_slice(samples);
        staging.written += pushed as u64;

        marks
            .push(EndMark {
                slot,
                end: staging.written,
                frames: buffer.valid_frames(),
            })
            .map_err(|mark| {
                Error::AudioOutput(format!("End mark queue full, cannot enqueue {}", mark.slot))
            })
    }

    fn start(&self) -> Result<()> {
        let wiring = self.core.wiring()?.clone();
        let marks = Arc::clone(self.marks()?);
        let mut consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or_else(|| Error::InvalidState("Render sink already started".to_string()))?;

        let abandoned = Arc::clone(&self.abandoned);
        let counters = Arc::clone(&self.counters);
        let completion = wiring.completion.clone();
        let channels = self.core.format().channels.max(1) as usize;
        let mut consumed: u64 = 0;
        let mut pending: Option<EndMark> = None;

        let render = move |out: &mut [f32]| {
            if abandoned.load(Ordering::Acquire) {
                out.fill(0.0);
                return;
            }

            let n = consumer.pop_slice(out);
            out[n..].fill(0.0);
            consumed += n as u64;

            let mut completed = 0;
            loop {
                if pending.is_none() {
                    pending = marks.pop();
                }
                match pending {
                    Some(mark) if consumed >= mark.end => {
                        completion.complete(mark.slot, mark.frames);
                        completed += 1;
                        pending = None;
                    }
                    _ => break,
                }
            }

            counters.record(&RenderOutcome {
                frames: n / channels,
                buffers_completed: completed,
                underrun: n < out.len(),
            });
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
        if let Some(marks) = self.marks.get() {
            while marks.pop().is_some() {
                dropped += 1;
            }
        }
        debug!("Render sink abandoned ({} buffers dropped)", dropped);
    }

    fn stats(&self) -> SinkStats {
        self.counters.snapshot()
    }
}
