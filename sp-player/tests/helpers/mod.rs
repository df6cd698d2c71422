//! Test helper modules for sp-player integration tests
//!
//! - ScriptedDecoder: scripted chunks and read failures
//! - RecordingSink: records enqueues, completes buffers on demand
//! - audio_generator: hound WAV files in temp directories
#![allow(dead_code)]

pub mod audio_generator;
pub mod recording_sink;
pub mod scripted_decoder;

pub use audio_generator::{garbage_file, sine_file, TestFile, TEST_SAMPLE_RATE};
pub use recording_sink::RecordingSink;
pub use scripted_decoder::{sample_value, ScriptedDecoder, Step};

use sp_player::audio::AudioFormat;
use sp_player::config::EngineConfig;
use std::thread;
use std::time::{Duration, Instant};

/// Upper bound for any wait in the integration tests
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

pub fn stereo_format() -> AudioFormat {
    AudioFormat::new(TEST_SAMPLE_RATE, 2, 16)
}

/// Engine config with fast retries and polling
pub fn engine_config(pool_size: usize, frames_per_buffer: usize) -> EngineConfig {
    EngineConfig {
        pool_size,
        frames_per_buffer,
        max_read_retries: 3,
        retry_backoff_ms: 1,
        fill_poll_interval_ms: 20,
        source_poll_interval_ms: 1,
    }
}

/// Poll `condition` every millisecond until true or `timeout`.
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(1));
    }
}
