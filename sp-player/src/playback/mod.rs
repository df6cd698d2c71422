//! Playback core: buffer pool, fill scheduler and engine state machine

pub mod buffer_pool;
pub mod engine;
pub mod fill_scheduler;
pub mod state;

pub use buffer_pool::{BufferPool, PoolStats, SlotState};
pub use engine::{CompletionHandle, PlaybackEngine};
pub use fill_scheduler::FillTrigger;
pub use state::{FrameRateEstimate, PlaybackFault, PlaybackState};
