//! Decoder that replays a fixed script of chunks and failures
//!
//! Sample values are a deterministic function of the frame index, so tests
//! can check rendered output against what was decoded.

use sp_player::audio::{AudioFormat, Decoder};
use sp_player::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

/// One scripted `read_next` result
#[derive(Debug, Clone)]
pub enum Step {
    /// Produce this many frames (capped by the request)
    Chunk(usize),
    /// Fail the read
    Fail(String),
}

/// Value of every channel of frame `index`. Never zero.
pub fn sample_value(index: u64) -> f32 {
    0.001 * (1 + index % 500) as f32
}

pub struct ScriptedDecoder {
    format: AudioFormat,
    total_frames: Option<u64>,
    steps: VecDeque<Step>,

    /// Keep producing `Chunk(endless)` after the script runs out
    endless: Option<usize>,

    next_frame: u64,
    reads: Arc<AtomicUsize>,
    closed: Arc<AtomicBool>,
}

impl ScriptedDecoder {
    pub fn new(format: AudioFormat, steps: Vec<Step>) -> Self {
        let total = steps
            .iter()
            .map(|s| match s {
                Step::Chunk(n) => *n as u64,
                Step::Fail(_) => 0,
            })
            .sum();
        Self {
            format,
            total_frames: Some(total),
            steps: steps.into(),
            endless: None,
            next_frame: 0,
            reads: Arc::new(AtomicUsize::new(0)),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `count` chunks of `frames` frames, then end of stream
    pub fn chunks(format: AudioFormat, count: usize, frames: usize) -> Self {
        Self::new(format, vec![Step::Chunk(frames); count])
    }

    /// Never reaches end of stream
    pub fn endless(format: AudioFormat, frames: usize) -> Self {
        let mut decoder = Self::new(format, Vec::new());
        decoder.endless = Some(frames);
        decoder.total_frames = None;
        decoder
    }

    /// Shared count of `read_next` calls
    pub fn reads(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.reads)
    }

    /// Shared flag set by `close()`
    pub fn closed(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.closed)
    }
}

impl Decoder for ScriptedDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read_next(&mut self, out: &mut [f32], max_frames: usize) -> Result<usize> {
        self.reads.fetch_add(1, Ordering::SeqCst);

        let step = match self.steps.pop_front() {
            Some(step) => step,
            None => match self.endless {
                Some(frames) => Step::Chunk(frames),
                None => return Ok(0),
            },
        };

        match step {
            Step::Chunk(frames) => {
                let channels = self.format.channels as usize;
                let frames = frames.min(max_frames).min(out.len() / channels);
                for frame in out[..frames * channels].chunks_mut(channels) {
                    frame.fill(sample_value(self.next_frame));
                    self.next_frame += 1;
                }
                Ok(frames)
            }
            Step::Fail(message) => Err(Error::DecodeRead(message)),
        }
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
