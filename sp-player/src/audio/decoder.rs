//! Streaming audio decoder using symphonia
//!
//! The engine consumes decoders through the [`Decoder`] trait: open once,
//! report format and length, then hand out successive chunks of interleaved
//! f32 frames until a read returns 0 (end of stream).
//!
//! Reads block on file I/O and are only ever issued from the fill scheduler
//! thread, never from an audio callback.

use crate::audio::types::AudioFormat;
use crate::error::{Error, Result};
use std::fs::File;
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};
use url::Url;

/// Corrupt packets skipped within a single read before it fails
const MAX_SKIPPED_PACKETS: usize = 8;

/// Pull-based source of PCM frames.
pub trait Decoder: Send {
    /// Format of the frames produced by `read_next`
    fn format(&self) -> AudioFormat;

    /// Total stream length in frames, if the container reports it
    fn total_frames(&self) -> Option<u64>;

    /// Decode up to `max_frames` frames into `out` (interleaved).
    ///
    /// Returns the number of frames written. 0 means end of stream.
    fn read_next(&mut self, out: &mut [f32], max_frames: usize) -> Result<usize>;

    /// Release decoder resources. Further reads return 0.
    fn close(&mut self) {}
}

/// Resolved location of a media file.
///
/// Accepts `file:` URLs and plain filesystem paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaLocation {
    url: String,
    path: PathBuf,
}

impl MediaLocation {
    /// Resolve `url` to an existing file.
    ///
    /// `file:` URLs must name a local file (no host, or `localhost`); their
    /// query and fragment are ignored. Input that does not parse as a URL,
    /// or whose "scheme" is a single drive letter, is taken as a path.
    ///
    /// # Errors
    /// - `NotFound` for non-file schemes, remote hosts and missing files
    pub fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        if trimmed.is_empty() {
            return Err(Error::NotFound("empty media URL".to_string()));
        }

        let path = match Url::parse(trimmed) {
            Ok(parsed) if parsed.scheme() == "file" => parsed.to_file_path().map_err(|_| {
                Error::NotFound(format!("not a local file URL: {}", trimmed))
            })?,
            Ok(parsed) if parsed.scheme().len() > 1 => {
                return Err(Error::NotFound(format!(
                    "unsupported URL scheme '{}': {}",
                    parsed.scheme(),
                    trimmed
                )));
            }
            _ => PathBuf::from(trimmed),
        };

        if !path.is_file() {
            return Err(Error::NotFound(format!("{}", path.display())));
        }

        Ok(Self {
            url: trimmed.to_string(),
            path,
        })
    }

    /// Location for an existing path (no existence check)
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            url: path.display().to_string(),
            path,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lowercase file extension, used as a probe hint
    pub fn extension(&self) -> Option<String> {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

/// Streaming decoder backed by symphonia.
///
/// Decodes one packet at a time and keeps the unconsumed remainder of the
/// last packet between reads, so chunk boundaries never drop samples.
pub struct SymphoniaDecoder {
    location: MediaLocation,
    source: PacketSource,
    cursor: PacketCursor,
    format: AudioFormat,
    total_frames: Option<u64>,
}

/// Symphonia reader and codec for one track, yielding interleaved packets.
struct PacketSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn symphonia::core::codecs::Decoder>,
    track_id: u32,
    channels: usize,

    /// Conversion buffer, reallocated only when a packet outgrows it
    sample_buf: Option<SampleBuffer<f32>>,
    sample_buf_frames: usize,
}

/// Read position over decoded packets.
///
/// Hands out samples across packet boundaries. A packet error hit after
/// some samples were already copied is held back and returned by the next
/// read, so those samples still reach the caller.
#[derive(Default)]
struct PacketCursor {
    /// Interleaved samples of the last decoded packet
    pending: Vec<f32>,

    /// Samples of `pending` already handed out
    offset: usize,

    finished: bool,
    deferred: Option<Error>,
}

impl PacketCursor {
    /// Copy up to `wanted` samples into `out`, pulling packets from `next`.
    ///
    /// `next` refills `pending` and returns false at end of stream.
    fn read<F>(&mut self, out: &mut [f32], wanted: usize, mut next: F) -> Result<usize>
    where
        F: FnMut(&mut Vec<f32>) -> Result<bool>,
    {
        if let Some(e) = self.deferred.take() {
            return Err(e);
        }

        let mut written = 0;
        while written < wanted {
            if self.offset < self.pending.len() {
                let n = (self.pending.len() - self.offset).min(wanted - written);
                out[written..written + n]
                    .copy_from_slice(&self.pending[self.offset..self.offset + n]);
                self.offset += n;
                written += n;
                continue;
            }
            if self.finished {
                break;
            }

            self.pending.clear();
            self.offset = 0;
            match next(&mut self.pending) {
                Ok(true) => {}
                Ok(false) => self.finished = true,
                Err(e) if written > 0 => {
                    self.deferred = Some(e);
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    fn close(&mut self) {
        self.finished = true;
        self.pending = Vec::new();
        self.offset = 0;
        self.deferred = None;
    }
}

impl SymphoniaDecoder {
    /// Open and probe a media file.
    ///
    /// # Errors
    /// - `NotFound`: file cannot be opened
    /// - `UnsupportedFormat`: container or codec not recognized, no audio track,
    ///   or missing sample rate / channel layout
    pub fn open(location: &MediaLocation) -> Result<Self> {
        debug!("Opening media: {}", location.path().display());

        let file = File::open(location.path()).map_err(|e| {
            Error::NotFound(format!("{}: {}", location.path().display(), e))
        })?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = location.extension() {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to probe format: {}", e)))?;

        let reader = probed.format;

        let track = reader
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| Error::UnsupportedFormat("No audio track found".to_string()))?;

        let track_id = track.id;
        let params = &track.codec_params;

        let sample_rate = params
            .sample_rate
            .ok_or_else(|| Error::UnsupportedFormat("Sample rate not found".to_string()))?;

        let channels = params
            .channels
            .map(|c| c.count() as u16)
            .ok_or_else(|| Error::UnsupportedFormat("Channel count not found".to_string()))?;

        let bits_per_sample = params.bits_per_sample.unwrap_or(16) as u16;
        let total_frames = params.n_frames;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| Error::UnsupportedFormat(format!("Failed to create decoder: {}", e)))?;

        let format = AudioFormat::new(sample_rate, channels, bits_per_sample);

        debug!(
            "Audio format: {} total_frames={:?}",
            format, total_frames
        );

        Ok(Self {
            location: location.clone(),
            source: PacketSource {
                reader,
                decoder,
                track_id,
                channels: channels as usize,
                sample_buf: None,
                sample_buf_frames: 0,
            },
            cursor: PacketCursor::default(),
            format,
            total_frames,
        })
    }

    pub fn location(&self) -> &MediaLocation {
        &self.location
    }
}

impl PacketSource {
    /// Decode the next packet of our track into `pending`.
    ///
    /// Returns false at end of stream instead of failing.
    fn next_packet(&mut self, pending: &mut Vec<f32>) -> Result<bool> {
        let mut skipped = 0;

        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    debug!("Reached end of stream");
                    return Ok(false);
                }
                Err(SymphoniaError::ResetRequired) => {
                    // Chained streams with a new layout are not followed
                    warn!("Stream reset required, treating as end of stream");
                    return Ok(false);
                }
                Err(e) => {
                    return Err(Error::DecodeRead(format!("Error reading packet: {}", e)));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            match self.decoder.decode(&packet) {
                Ok(decoded) => {
                    if decoded.frames() == 0 {
                        continue;
                    }

                    let spec = *decoded.spec();
                    if spec.channels.count() != self.channels {
                        return Err(Error::DecodeRead(format!(
                            "Channel count changed mid-stream: {} -> {}",
                            self.channels,
                            spec.channels.count()
                        )));
                    }

                    let capacity = decoded.capacity();
                    if self.sample_buf.is_none() || capacity > self.sample_buf_frames {
                        self.sample_buf = Some(SampleBuffer::<f32>::new(capacity as u64, spec));
                        self.sample_buf_frames = capacity;
                    }

                    if let Some(buf) = self.sample_buf.as_mut() {
                        buf.copy_interleaved_ref(decoded);
                        pending.extend_from_slice(buf.samples());
                    }
                    return Ok(true);
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    // Corrupt packet: skip it and keep going
                    skipped += 1;
                    warn!("Decode error (packet skipped): {}", e);
                    if skipped > MAX_SKIPPED_PACKETS {
                        return Err(Error::DecodeRead(format!(
                            "{} consecutive corrupt packets",
                            skipped
                        )));
                    }
                }
                Err(e) => {
                    return Err(Error::DecodeRead(format!("Decoder failure: {}", e)));
                }
            }
        }
    }
}

impl Decoder for SymphoniaDecoder {
    fn format(&self) -> AudioFormat {
        self.format
    }

    fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    fn read_next(&mut self, out: &mut [f32], max_frames: usize) -> Result<usize> {
        let channels = self.format.channels.max(1) as usize;
        let wanted = (max_frames * channels).min(out.len() / channels * channels);

        let source = &mut self.source;
        let written = self
            .cursor
            .read(out, wanted, |pending| source.next_packet(pending))?;

        if self.cursor.finished && written == 0 {
            debug!("Reached end of {}", self.location.path().display());
        }
        Ok(written / channels)
    }

    fn close(&mut self) {
        self.cursor.close();
        self.source.sample_buf = None;
    }
}
