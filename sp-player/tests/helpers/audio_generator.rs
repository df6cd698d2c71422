//! WAV test file generation
//!
//! Writes deterministic 16-bit PCM files with hound into a temporary
//! directory that lives as long as the returned handle.

use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Standard test sample rate (44.1 kHz)
pub const TEST_SAMPLE_RATE: u32 = 44_100;

/// Generated file plus the directory keeping it alive
pub struct TestFile {
    pub dir: TempDir,
    pub path: PathBuf,
}

/// Write a stereo sine wave of `frames` frames to `path`.
pub fn write_sine_wav(
    path: &Path,
    sample_rate: u32,
    frames: u32,
    frequency_hz: f32,
) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 2,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec)?;
    for i in 0..frames {
        let t = i as f32 / sample_rate as f32;
        let sample = ((2.0 * PI * frequency_hz * t).sin() * 0.5 * i16::MAX as f32) as i16;
        writer.write_sample(sample)?;
        writer.write_sample(sample)?;
    }
    writer.finalize()
}

/// Sine WAV named `name` in a fresh temp directory
pub fn sine_file(name: &str, sample_rate: u32, frames: u32) -> TestFile {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    write_sine_wav(&path, sample_rate, frames, 440.0).expect("write wav");
    TestFile { dir, path }
}

/// File with a .wav extension that is not audio
pub fn garbage_file(name: &str) -> TestFile {
    let dir = tempfile::tempdir().expect("create temp dir");
    let path = dir.path().join(name);
    std::fs::write(&path, b"this is definitely not a RIFF header, just text").expect("write file");
    TestFile { dir, path }
}
