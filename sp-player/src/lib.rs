//! # Simple Player Library (sp-player)
//!
//! Streaming decode-buffer-playback engine behind three interchangeable
//! player types.
//!
//! **Purpose:** Decode a media file in chunks on a worker thread, recycle a
//! small fixed pool of PCM buffers through a backend output sink, and expose
//! playback state (stopped flag, frame rate, position) to any thread without
//! locks.
//!
//! **Architecture:** symphonia decoder → fill scheduler → buffer pool →
//! output sink (queue / render / source) → cpal device callback

pub mod audio;
pub mod config;
pub mod error;
pub mod playback;
pub mod player;
pub mod sink;

pub use config::PlayerConfig;
pub use error::{Error, Result};
pub use player::{AudioPlayer, QueuePlayer, RenderPlayer, SourcePlayer};
