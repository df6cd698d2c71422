//! Playback Engine
//!
//! Owns the buffer pool, the playback state and the fill scheduler, and
//! bridges them to one [`OutputSink`]. Written once against the sink
//! capability; the three player types differ only in the sink they build.
//!
//! ## Construction
//!
//! 1. Check decoder format against the sink's device format
//! 2. Allocate the pool and wire the sink to it
//! 3. Prime: fill and enqueue the first buffers synchronously
//! 4. Initializing → Playing, start the sink, spawn the fill worker
//!
//! ## Completion path
//!
//! The sink calls [`CompletionHandle::complete`] once per consumed buffer,
//! possibly on the real-time render thread. It only touches atomics: release
//! the slot, account frames, wake the worker, and finish draining when the
//! last buffer comes back. It never logs, allocates or blocks.

use crate::audio::decoder::Decoder;
use crate::audio::types::{AudioFormat, SlotId};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::buffer_pool::{BufferPool, PoolStats};
use crate::playback::fill_scheduler::{FillOutcome, FillScheduler, FillTrigger};
use crate::playback::state::{FrameRateEstimate, PlaybackFault, PlaybackState, StateCell};
use crate::sink::{OutputSink, SinkKind, SinkStats};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

/// Poll period of [`PlaybackEngine::wait_until_stopped`]
const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// State shared between the engine, the fill worker and the completion path.
pub struct EngineShared {
    pub(crate) pool: Arc<BufferPool>,
    pub(crate) state: StateCell,
    pub(crate) fps: FrameRateEstimate,
    pub(crate) trigger: FillTrigger,

    /// Decoder returned end of stream
    pub(crate) exhausted: AtomicBool,

    /// Decode cursor: frames handed to the sink so far
    pub(crate) decoded_frames: AtomicU64,

    /// Buffers released by the completion path
    pub(crate) completed: AtomicU64,

    fault: OnceLock<PlaybackFault>,

    /// Device error posted from the output context, picked up by the worker
    output_fault: ArrayQueue<String>,
}

impl EngineShared {
    fn new(pool: Arc<BufferPool>, sample_rate: u32) -> Self {
        Self {
            pool,
            state: StateCell::new(),
            fps: FrameRateEstimate::new(sample_rate),
            trigger: FillTrigger::new(),
            exhausted: AtomicBool::new(false),
            decoded_frames: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            fault: OnceLock::new(),
            output_fault: ArrayQueue::new(1),
        }
    }

    pub fn fault(&self) -> Option<&PlaybackFault> {
        self.fault.get()
    }

    /// Record end of stream and start draining if already playing.
    pub(crate) fn mark_exhausted(&self) {
        self.exhausted.store(true, Ordering::SeqCst);
        self.begin_drain();
    }

    /// Playing → Draining, and straight on to Stopped if nothing is in flight.
    fn begin_drain(&self) {
        if self.state.transition(PlaybackState::Playing, PlaybackState::Draining) {
            debug!("Draining {} queued buffers", self.pool.in_flight_count());
        }
        self.finish_drain_if_idle();
    }

    /// Draining → Stopped once every buffer is back in the pool.
    ///
    /// Reached from both the completion path and the worker; the SeqCst
    /// state CAS picks one winner.
    fn finish_drain_if_idle(&self) {
        if self.state.load() == PlaybackState::Draining
            && self.pool.in_flight_count() == 0
            && self.state.transition(PlaybackState::Draining, PlaybackState::Stopped)
        {
            self.fps.freeze();
            self.trigger.notify();
        }
    }

    /// Stop with a fault. The first fault wins.
    pub(crate) fn fail(&self, fault: PlaybackFault) {
        let _ = self.fault.set(fault);
        if self.state.stop().is_some() {
            self.fps.freeze();
            if let Some(fault) = self.fault.get() {
                error!("Stopping playback: {}", fault);
            }
        }
        self.trigger.notify();
    }

    pub(crate) fn take_output_fault(&self) -> Option<String> {
        self.output_fault.pop()
    }
}

/// Handle given to the output sink for reporting consumed buffers.
///
/// Cheap to clone; every method is non-blocking and safe on the render thread.
#[derive(Clone)]
pub struct CompletionHandle {
    shared: Arc<EngineShared>,
}

impl CompletionHandle {
    /// Report that `slot` (holding `frames` frames) was fully rendered.
    ///
    /// Ignored after Stopped, and ignored for a slot that is not in flight,
    /// so a late or repeated callback never releases a buffer twice.
    pub fn complete(&self, slot: SlotId, frames: usize) {
        let shared = &self.shared;
        if shared.state.is_stopped() {
            return;
        }
        if !shared.pool.release_queued(slot) {
            return;
        }

        shared.completed.fetch_add(1, Ordering::SeqCst);
        shared.fps.record(frames as u64);
        shared.trigger.notify();
        shared.finish_drain_if_idle();
    }

    /// Report an asynchronous device failure. Converted to a stop by the worker.
    pub fn fault(&self, message: String) {
        let _ = self.shared.output_fault.force_push(message);
        self.shared.trigger.notify();
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.is_stopped()
    }
}

/// Streaming decode-buffer-playback engine.
pub struct PlaybackEngine {
    shared: Arc<EngineShared>,
    sink: Arc<dyn OutputSink>,
    format: AudioFormat,
    total_frames: Option<u64>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PlaybackEngine {
    /// Build the engine and start playback.
    ///
    /// # Errors
    /// - `Config`: invalid engine parameters
    /// - `UnsupportedFormat`: decoder rate/channels differ from the device
    /// - `DecodeRead`: the decoder failed while priming the pool
    /// - `DeviceInitFailed`: the sink could not start its device
    pub fn new(
        decoder: Box<dyn Decoder>,
        sink: Arc<dyn OutputSink>,
        config: &EngineConfig,
    ) -> Result<Self> {
        config.validate()?;

        let format = decoder.format();
        let device_format = sink.format();
        if !format.is_compatible(&device_format) {
            return Err(Error::UnsupportedFormat(format!(
                "stream is {} but {} device renders {}",
                format,
                sink.kind(),
                device_format
            )));
        }
        let total_frames = decoder.total_frames();

        let pool = Arc::new(BufferPool::new(
            config.pool_size,
            format,
            config.frames_per_buffer,
        ));
        let shared = Arc::new(EngineShared::new(Arc::clone(&pool), format.sample_rate));
        let completion = CompletionHandle {
            shared: Arc::clone(&shared),
        };

        sink.prepare(Arc::clone(&pool), completion)?;

        let mut scheduler =
            FillScheduler::new(decoder, Arc::clone(&sink), Arc::clone(&shared), config);

        if scheduler.fill_available() == FillOutcome::Stopped {
            sink.abandon();
            pool.reclaim_queued();
            let message = match shared.fault() {
                Some(PlaybackFault::DecodeRead(msg)) => msg.clone(),
                Some(other) => other.to_string(),
                None => "stopped while priming".to_string(),
            };
            return Err(Error::DecodeRead(message));
        }

        shared
            .state
            .transition(PlaybackState::Initializing, PlaybackState::Playing);
        shared.fps.mark_started();

        if let Err(e) = sink.start() {
            shared.state.stop();
            sink.abandon();
            pool.reclaim_queued();
            return Err(e);
        }

        info!(
            "Playback started: {} via {} sink on '{}' ({} buffers x {} frames)",
            format,
            sink.kind(),
            sink.device_name(),
            pool.size(),
            pool.frames_per_buffer()
        );

        let worker = match scheduler.spawn() {
            Ok(handle) => handle,
            Err(e) => {
                shared.state.stop();
                sink.abandon();
                pool.reclaim_queued();
                return Err(e);
            }
        };

        // Stream shorter than the pool: end of stream was seen while priming
        if shared.exhausted.load(Ordering::SeqCst) {
            shared.begin_drain();
        }

        Ok(Self {
            shared,
            sink,
            format,
            total_frames,
            worker: Mutex::new(Some(worker)),
        })
    }

    /// Stop immediately. Idempotent and safe from any thread.
    ///
    /// Queued buffers are returned to the pool without waiting for the
    /// device; completions arriving afterwards are ignored.
    pub fn stop(&self) {
        if let Some(previous) = self.shared.state.stop() {
            self.shared.fps.freeze();
            self.sink.abandon();
            let reclaimed = self.shared.pool.reclaim_queued();
            info!(
                "Playback stopped while {} ({} queued buffers reclaimed)",
                previous, reclaimed
            );
        }
        self.shared.trigger.notify();
        self.join_worker();
    }

    fn join_worker(&self) {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();

        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                error!("Fill scheduler thread panicked");
            }
        }
    }

    /// Block until Stopped or `timeout` elapses. Returns the stopped flag.
    pub fn wait_until_stopped(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while !self.is_stopped() {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            thread::sleep(WAIT_POLL_INTERVAL.min(deadline - now));
        }
        true
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.state.load()
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.state.is_stopped()
    }

    pub fn frames_per_second(&self) -> f64 {
        self.shared.fps.get()
    }

    pub fn fault(&self) -> Option<PlaybackFault> {
        self.shared.fault().cloned()
    }

    /// Frames the device has finished rendering
    pub fn frames_rendered(&self) -> u64 {
        self.shared.fps.frames_rendered()
    }

    pub fn position(&self) -> Duration {
        self.format.frames_to_duration(self.frames_rendered())
    }

    /// Frames decoded and handed to the sink
    pub fn decoded_frames(&self) -> u64 {
        self.shared.decoded_frames.load(Ordering::SeqCst)
    }

    pub fn total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    pub fn duration(&self) -> Option<Duration> {
        self.total_frames
            .map(|frames| self.format.frames_to_duration(frames))
    }

    pub fn completed_buffers(&self) -> u64 {
        self.shared.completed.load(Ordering::SeqCst)
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.shared.pool.stats()
    }

    pub fn sink_kind(&self) -> SinkKind {
        self.sink.kind()
    }

    pub fn sink_stats(&self) -> SinkStats {
        self.sink.stats()
    }

    pub fn device_name(&self) -> String {
        self.sink.device_name()
    }
}

impl Drop for PlaybackEngine {
    fn drop(&mut self) {
        self.stop();
    }
}
