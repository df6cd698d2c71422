//! Playback state shared across threads
//!
//! Everything here is read without locks by any thread (status loops, UI)
//! and written by the completion path, the fill scheduler, or an explicit
//! stop. Transitions are compare-and-swap so racing writers agree on a
//! single winner.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::OnceLock;
use std::time::Instant;
use thiserror::Error;

/// Engine lifecycle.
///
/// ```text
/// Initializing ──► Playing ──► Draining ──► Stopped
///                     │            │           ▲
///                     └────────────┴── stop ───┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PlaybackState {
    /// Decoder opened, pool being primed
    Initializing = 0,
    /// Decoder still producing chunks
    Playing = 1,
    /// End of stream reached, queued buffers still rendering
    Draining = 2,
    /// Terminal
    Stopped = 3,
}

impl PlaybackState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => PlaybackState::Initializing,
            1 => PlaybackState::Playing,
            2 => PlaybackState::Draining,
            _ => PlaybackState::Stopped,
        }
    }

    pub fn is_stopped(self) -> bool {
        self == PlaybackState::Stopped
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Initializing => "initializing",
            PlaybackState::Playing => "playing",
            PlaybackState::Draining => "draining",
            PlaybackState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Atomic holder of the [`PlaybackState`].
///
/// Stopped is absorbing: no transition leaves it.
#[derive(Debug)]
pub struct StateCell {
    value: AtomicU8,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            value: AtomicU8::new(PlaybackState::Initializing as u8),
        }
    }

    pub fn load(&self) -> PlaybackState {
        PlaybackState::from_u8(self.value.load(Ordering::SeqCst))
    }

    pub fn is_stopped(&self) -> bool {
        self.load().is_stopped()
    }

    /// Move `from` → `to`. Returns false if the current state is not `from`.
    pub fn transition(&self, from: PlaybackState, to: PlaybackState) -> bool {
        if from == PlaybackState::Stopped {
            return false;
        }
        self.value
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Force Stopped from any state.
    ///
    /// Returns the previous state if this call performed the transition,
    /// None if already stopped.
    pub fn stop(&self) -> Option<PlaybackState> {
        let mut current = self.value.load(Ordering::SeqCst);
        loop {
            if current == PlaybackState::Stopped as u8 {
                return None;
            }
            match self.value.compare_exchange(
                current,
                PlaybackState::Stopped as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(previous) => return Some(PlaybackState::from_u8(previous)),
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

/// Why playback stopped abnormally.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlaybackFault {
    /// Decoder reads kept failing after the retry budget
    #[error("Decode read failed: {0}")]
    DecodeRead(String),

    /// Output device reported an error
    #[error("Audio output failed: {0}")]
    Output(String),
}

/// Frames rendered per second of wall-clock time since playback start.
///
/// **Publication:** updated by the completion path only, read by anyone.
/// The value is an f64 stored as bits in an `AtomicU64` and published with
/// `fetch_max`; non-negative f64 bit patterns order like the integers, so
/// the published estimate never decreases.
///
/// **Bounds:** elapsed time is floored at the playback time of the frames
/// rendered, so the estimate never exceeds the nominal sample rate even if
/// the device pulls its first buffers faster than real time.
///
/// **Freezing:** once playback stops the value is captured in a `OnceLock`
/// and no later completion can change what readers see.
#[derive(Debug)]
pub struct FrameRateEstimate {
    sample_rate: u32,
    started: OnceLock<Instant>,
    frames: AtomicU64,
    published: AtomicU64,
    frozen: OnceLock<f64>,
}

impl FrameRateEstimate {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            started: OnceLock::new(),
            frames: AtomicU64::new(0),
            published: AtomicU64::new(0f64.to_bits()),
            frozen: OnceLock::new(),
        }
    }

    /// Anchor wall-clock time. Later calls keep the first instant.
    pub fn mark_started(&self) {
        self.started.get_or_init(Instant::now);
    }

    /// Account `frames` newly rendered frames and publish the new estimate.
    pub fn record(&self, frames: u64) {
        let total = self.frames.fetch_add(frames, Ordering::AcqRel) + frames;
        let started = *self.started.get_or_init(Instant::now);

        let wall = started.elapsed().as_secs_f64();
        let audio = if self.sample_rate > 0 {
            total as f64 / self.sample_rate as f64
        } else {
            0.0
        };
        let elapsed = wall.max(audio);
        if elapsed <= 0.0 {
            return;
        }

        let rate = total as f64 / elapsed;
        self.published.fetch_max(rate.to_bits(), Ordering::AcqRel);
    }

    /// Current estimate: 0 before the first completion, frozen once stopped.
    pub fn get(&self) -> f64 {
        match self.frozen.get() {
            Some(value) => *value,
            None => f64::from_bits(self.published.load(Ordering::Acquire)),
        }
    }

    /// Capture the current value permanently.
    pub fn freeze(&self) -> f64 {
        *self
            .frozen
            .get_or_init(|| f64::from_bits(self.published.load(Ordering::Acquire)))
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    /// Frames accounted so far (the playback position)
    pub fn frames_rendered(&self) -> u64 {
        self.frames.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_state_transitions() {
        let cell = StateCell::new();
        assert_eq!(cell.load(), PlaybackState::Initializing);

        assert!(!cell.transition(PlaybackState::Playing, PlaybackState::Draining));
        assert!(cell.transition(PlaybackState::Initializing, PlaybackState::Playing));
        assert!(cell.transition(PlaybackState::Playing, PlaybackState::Draining));
        assert_eq!(cell.load(), PlaybackState::Draining);
        assert!(!cell.is_stopped());
    }

    #[test]
    fn test_stopped_is_absorbing() {
        let cell = StateCell::new();
        assert!(cell.transition(PlaybackState::Initializing, PlaybackState::Playing));

        assert_eq!(cell.stop(), Some(PlaybackState::Playing));
        assert_eq!(cell.stop(), None);
        assert!(cell.is_stopped());

        assert!(!cell.transition(PlaybackState::Stopped, PlaybackState::Playing));
        assert!(!cell.transition(PlaybackState::Playing, PlaybackState::Draining));
        assert_eq!(cell.load(), PlaybackState::Stopped);
    }

    #[test]
    fn test_concurrent_stop_has_one_winner() {
        let cell = std::sync::Arc::new(StateCell::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cell = cell.clone();
                thread::spawn(move || cell.stop().is_some())
            })
            .collect();

        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn test_frame_rate_zero_before_first_record() {
        let fps = FrameRateEstimate::new(44_100);
        fps.mark_started();
        assert_eq!(fps.get(), 0.0);
        assert_eq!(fps.frames_rendered(), 0);
    }

    #[test]
    fn test_frame_rate_capped_at_sample_rate() {
        let fps = FrameRateEstimate::new(1_000);
        fps.mark_started();
        // Far faster than real time
        fps.record(10_000);
        let value = fps.get();
        assert!(value > 0.0);
        assert!(value <= 1_000.0 + f64::EPSILON, "got {}", value);
    }

    #[test]
    fn test_frame_rate_never_decreases() {
        let fps = FrameRateEstimate::new(48_000);
        fps.mark_started();
        fps.record(480);
        let first = fps.get();

        thread::sleep(Duration::from_millis(50));
        // Slow completion would lower the raw ratio
        fps.record(1);
        assert!(fps.get() >= first);
    }

    #[test]
    fn test_freeze_holds_value() {
        let fps = FrameRateEstimate::new(48_000);
        fps.mark_started();
        fps.record(4_800);

        let frozen = fps.freeze();
        assert!(fps.is_frozen());
        fps.record(48_000);
        assert_eq!(fps.get(), frozen);
        assert_eq!(fps.freeze(), frozen);
    }

    #[test]
    fn test_fault_display() {
        let fault = PlaybackFault::DecodeRead("disk gone".to_string());
        assert_eq!(fault.to_string(), "Decode read failed: disk gone");
    }
}
