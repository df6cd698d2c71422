//! Render-side cursor over queued pool buffers
//!
//! Copies samples from the buffer currently playing into the device block,
//! moving on to the next queued slot when one runs out. Shared by the queue
//! and source sinks; they differ only in where the next slot comes from and
//! what happens to an exhausted one.
//!
//! Runs on the render thread: no allocation, no blocking. The slot buffer is
//! taken with `try_buffer()`; if it is momentarily locked the rest of the
//! block is silence and playback resumes from the same offset next time.

use crate::audio::types::SlotId;
use crate::playback::buffer_pool::BufferPool;
use std::sync::Arc;

/// Result of one render call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOutcome {
    /// Frames of audio written (the rest of the block is silence)
    pub frames: usize,

    /// Buffers that finished during this call
    pub buffers_completed: usize,

    /// Block could not be filled completely
    pub underrun: bool,
}

/// Playback cursor: current slot and frame offset within it.
pub struct Playhead {
    pool: Arc<BufferPool>,
    channels: usize,
    current: Option<SlotId>,
    offset: usize,
}

impl Playhead {
    pub fn new(pool: Arc<BufferPool>) -> Self {
        let channels = pool.format().channels.max(1) as usize;
        Self {
            pool,
            channels,
            current: None,
            offset: 0,
        }
    }

    /// Slot currently being rendered
    pub fn current(&self) -> Option<SlotId> {
        self.current
    }

    /// Forget the current slot without completing it.
    pub fn reset(&mut self) {
        self.current = None;
        self.offset = 0;
    }

    /// Fill `out` (interleaved) from queued buffers.
    ///
    /// `next` yields the next queued slot; `done` receives each slot whose
    /// frames have all been copied, with its frame count.
    pub fn render<N, D>(&mut self, out: &mut [f32], mut next: N, mut done: D) -> RenderOutcome
    where
        N: FnMut() -> Option<SlotId>,
        D: FnMut(SlotId, usize),
    {
        let mut written = 0;
        let mut completed = 0;

        while written < out.len() {
            let slot = match self.current {
                Some(slot) => slot,
                None => match next() {
                    Some(slot) => {
                        self.current = Some(slot);
                        self.offset = 0;
                        slot
                    }
                    None => break,
                },
            };

            let Some(buffer) = self.pool.try_buffer(slot) else {
                break;
            };

            let src = buffer.samples_from(self.offset);
            let n = src.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&src[..n]);
            written += n;
            self.offset += n / self.channels;

            let frames = buffer.valid_frames();
            drop(buffer);

            if self.offset >= frames {
                self.current = None;
                self.offset = 0;
                completed += 1;
                done(slot, frames);
            }
        }

        out[written..].fill(0.0);

        RenderOutcome {
            frames: written / self.channels,
            buffers_completed: completed,
            underrun: written < out.len(),
        }
    }
}
