//! Core audio data types
//!
//! Defines the PCM format tag and the fixed-capacity buffers recycled by the
//! buffer pool.
//!
//! **Format:**
//! - Samples are f32 (floating point -1.0 to 1.0)
//! - Interleaved by channel: [L, R, L, R, ...] for stereo
//! - Sample rate and channel layout match the output device; no resampling

use std::fmt;
use std::time::Duration;

/// PCM format tag: sample rate, channel count and source bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AudioFormat {
    /// Frames per second
    pub sample_rate: u32,

    /// Samples per frame
    pub channels: u16,

    /// Bit depth of the source material (informational; buffers are always f32)
    pub bits_per_sample: u16,
}

impl AudioFormat {
    pub fn new(sample_rate: u32, channels: u16, bits_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bits_per_sample,
        }
    }

    /// 44.1kHz stereo, 16-bit source
    pub fn cd_quality() -> Self {
        Self::new(44_100, 2, 16)
    }

    /// True if frames in `self` can be rendered unchanged by a device running `other`.
    ///
    /// Bit depth is ignored: decoders always deliver f32 samples.
    pub fn is_compatible(&self, other: &AudioFormat) -> bool {
        self.sample_rate == other.sample_rate && self.channels == other.channels
    }

    /// Number of interleaved samples for `frames` frames
    pub fn samples_for(&self, frames: usize) -> usize {
        frames * self.channels as usize
    }

    /// Playback time of `frames` frames
    pub fn frames_to_duration(&self, frames: u64) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let secs = frames / self.sample_rate as u64;
        let rem = frames % self.sample_rate as u64;
        Duration::from_secs(secs)
            + Duration::from_nanos(rem * 1_000_000_000 / self.sample_rate as u64)
    }
}

impl fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}Hz/{}ch/{}bit",
            self.sample_rate, self.channels, self.bits_per_sample
        )
    }
}

/// Index of a buffer slot inside the pool arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl SlotId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

/// Fixed-capacity block of interleaved PCM samples.
///
/// Allocated once when the engine is built and reused for every chunk; the
/// sample storage is never resized afterwards.
#[derive(Debug)]
pub struct AudioBuffer {
    /// Interleaved samples, `capacity_frames * channels` long
    samples: Box<[f32]>,

    /// Frames written by the last fill
    valid_frames: usize,

    /// Format of the contained frames
    format: AudioFormat,
}

impl AudioBuffer {
    /// Allocate a silent buffer holding `capacity_frames` frames of `format`.
    pub fn new(format: AudioFormat, capacity_frames: usize) -> Self {
        Self {
            samples: vec![0.0; format.samples_for(capacity_frames)].into_boxed_slice(),
            valid_frames: 0,
            format,
        }
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn capacity_frames(&self) -> usize {
        self.samples.len() / self.format.channels.max(1) as usize
    }

    pub fn valid_frames(&self) -> usize {
        self.valid_frames
    }

    /// Record how many frames the last fill produced (clamped to capacity).
    pub fn set_valid_frames(&mut self, frames: usize) {
        self.valid_frames = frames.min(self.capacity_frames());
    }

    /// Valid interleaved samples
    pub fn samples(&self) -> &[f32] {
        let end = self.format.samples_for(self.valid_frames);
        &self.samples[..end]
    }

    /// Whole backing storage, for the decoder to write into
    pub fn storage_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    /// Valid samples starting at frame `offset`
    pub fn samples_from(&self, offset: usize) -> &[f32] {
        let start = self.format.samples_for(offset.min(self.valid_frames));
        &self.samples()[start..]
    }

    /// Mark the buffer empty (storage is kept)
    pub fn clear(&mut self) {
        self.valid_frames = 0;
    }

    /// Playback time of the valid frames
    pub fn duration(&self) -> Duration {
        self.format.frames_to_duration(self.valid_frames as u64)
    }
}
