//! Audio decoding, data types and output devices

pub mod decoder;
pub mod null;
pub mod output;
pub mod types;

pub use decoder::{Decoder, MediaLocation, SymphoniaDecoder};
pub use null::{ClockedDevice, ManualDevice, ManualDriver};
pub use output::{CpalDevice, ErrorFn, OutputDevice, RenderFn};
pub use types::{AudioBuffer, AudioFormat, SlotId};
