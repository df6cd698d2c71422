//! Fill Scheduler
//!
//! Keeps the buffer pool supplied: while a free buffer exists and the decoder
//! has not reached end of stream, acquire a buffer, decode a chunk into it and
//! hand it to the output sink.
//!
//! Runs on a dedicated worker thread because decoder reads may block on I/O.
//! The worker sleeps on a [`FillTrigger`] that is signaled whenever a buffer
//! is released, with a periodic timeout as a fallback.

use crate::audio::decoder::Decoder;
use crate::audio::types::SlotId;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::playback::engine::EngineShared;
use crate::playback::state::PlaybackFault;
use crate::sink::OutputSink;
use crossbeam::channel::{bounded, Receiver, Sender};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Wake-up signal for the fill worker.
///
/// A single-slot channel: any number of notifications between two waits
/// collapse into one wake-up. `notify()` never blocks, so it is safe on the
/// render path.
#[derive(Clone)]
pub struct FillTrigger {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl FillTrigger {
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx }
    }

    pub fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Wait for a notification. Returns false on timeout.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for FillTrigger {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one fill pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillOutcome {
    /// No free buffer left; wait for a release
    Starved,
    /// Decoder signaled end of stream
    Exhausted,
    /// Playback stopped (explicitly or by a fault)
    Stopped,
}

/// Producer side of the engine: decoder → pool → sink.
pub struct FillScheduler {
    decoder: Box<dyn Decoder>,
    sink: Arc<dyn OutputSink>,
    shared: Arc<EngineShared>,
    max_read_retries: u32,
    retry_backoff: Duration,
    poll_interval: Duration,
}

impl FillScheduler {
    pub fn new(
        decoder: Box<dyn Decoder>,
        sink: Arc<dyn OutputSink>,
        shared: Arc<EngineShared>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            decoder,
            sink,
            shared,
            max_read_retries: config.max_read_retries,
            retry_backoff: config.retry_backoff(),
            poll_interval: config.fill_poll_interval(),
        }
    }

    /// Fill every free buffer the pool currently has.
    ///
    /// Called once synchronously at construction to prime the sink, then
    /// repeatedly from the worker loop.
    pub fn fill_available(&mut self) -> FillOutcome {
        let shared = Arc::clone(&self.shared);

        loop {
            if shared.state.is_stopped() {
                return FillOutcome::Stopped;
            }
            if shared.exhausted.load(Ordering::SeqCst) {
                return FillOutcome::Exhausted;
            }

            let Some(slot) = shared.pool.acquire_free() else {
                return FillOutcome::Starved;
            };

            let frames = match self.read_with_retry(slot) {
                Ok(frames) => frames,
                Err(e) => {
                    shared.pool.release(slot);
                    shared.fail(PlaybackFault::DecodeRead(e.to_string()));
                    return FillOutcome::Stopped;
                }
            };

            if frames == 0 {
                shared.pool.release(slot);
                debug!(
                    "Decoder exhausted after {} frames",
                    shared.decoded_frames.load(Ordering::SeqCst)
                );
                shared.mark_exhausted();
                return FillOutcome::Exhausted;
            }

            shared.decoded_frames.fetch_add(frames as u64, Ordering::SeqCst);
            shared.pool.mark_queued(slot);

            if let Err(e) = self.sink.enqueue(slot) {
                shared.pool.release(slot);
                if shared.state.is_stopped() {
                    return FillOutcome::Stopped;
                }
                shared.fail(PlaybackFault::Output(e.to_string()));
                return FillOutcome::Stopped;
            }

            // A stop that raced this enqueue may have missed the slot
            if shared.state.is_stopped() {
                shared.pool.reclaim_queued();
                return FillOutcome::Stopped;
            }
        }
    }

    /// Decode one chunk into `slot`, retrying failed reads with linear backoff.
    fn read_with_retry(&mut self, slot: SlotId) -> Result<usize> {
        let shared = Arc::clone(&self.shared);
        let Some(mut buffer) = shared.pool.buffer(slot) else {
            return Err(Error::InvalidState(format!("{} out of range", slot)));
        };
        let capacity = buffer.capacity_frames();
        let mut attempt = 0;

        loop {
            match self.decoder.read_next(buffer.storage_mut(), capacity) {
                Ok(frames) => {
                    buffer.set_valid_frames(frames);
                    return Ok(frames);
                }
                Err(e) if attempt < self.max_read_retries && !shared.state.is_stopped() => {
                    attempt += 1;
                    warn!(
                        "Decode read failed (attempt {}/{}): {}",
                        attempt, self.max_read_retries, e
                    );
                    thread::sleep(self.retry_backoff * attempt);
                }
                Err(e) => {
                    buffer.clear();
                    return Err(e);
                }
            }
        }
    }

    /// Move the scheduler onto its worker thread.
    pub fn spawn(self) -> Result<JoinHandle<()>> {
        let handle = thread::Builder::new()
            .name("fill-scheduler".to_string())
            .spawn(move || self.run())?;
        Ok(handle)
    }

    fn run(mut self) {
        debug!("Fill scheduler started");

        loop {
            if let Some(message) = self.shared.take_output_fault() {
                self.shared.fail(PlaybackFault::Output(message));
            }
            if self.shared.state.is_stopped() {
                break;
            }

            match self.fill_available() {
                FillOutcome::Stopped => break,
                FillOutcome::Starved | FillOutcome::Exhausted => {}
            }

            self.shared.trigger.wait(self.poll_interval);
        }

        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.sink.abandon();
        let reclaimed = self.shared.pool.reclaim_queued();
        self.decoder.close();

        match self.shared.fault() {
            Some(fault) => error!("Playback stopped with fault: {}", fault),
            None => info!(
                "Playback finished: {} frames decoded, {} buffers completed",
                self.shared.decoded_frames.load(Ordering::SeqCst),
                self.shared.completed.load(Ordering::SeqCst)
            ),
        }
        debug!("Fill scheduler exiting ({} buffers reclaimed)", reclaimed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_trigger_collapses_notifications() {
        let trigger = FillTrigger::new();
        trigger.notify();
        trigger.notify();
        trigger.notify();

        assert!(trigger.wait(Duration::from_millis(10)));
        assert!(!trigger.wait(Duration::from_millis(10)));
    }

    #[test]
    fn test_trigger_wakes_waiting_thread() {
        let trigger = FillTrigger::new();
        let remote = trigger.clone();

        let waiter = thread::spawn(move || {
            let start = Instant::now();
            let woke = remote.wait(Duration::from_secs(5));
            (woke, start.elapsed())
        });

        thread::sleep(Duration::from_millis(20));
        trigger.notify();

        let (woke, elapsed) = waiter.join().unwrap();
        assert!(woke);
        assert!(elapsed < Duration::from_secs(5));
    }
}
