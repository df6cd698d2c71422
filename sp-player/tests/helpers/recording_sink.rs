//! Output sink that records every hand-off and completes buffers on demand
//!
//! Stands in for a backend whose completion callbacks the test fires
//! explicitly, one buffer at a time.

use sp_player::audio::{AudioFormat, SlotId};
use sp_player::playback::{BufferPool, CompletionHandle};
use sp_player::sink::{OutputSink, SinkKind, SinkStats};
use sp_player::{Error, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};

pub struct RecordingSink {
    format: AudioFormat,
    fail_start: bool,
    wiring: OnceLock<(Arc<BufferPool>, CompletionHandle)>,

    /// Every enqueued slot, in order
    enqueued: Mutex<Vec<SlotId>>,

    /// Enqueued but not yet completed by the test
    pending: Mutex<VecDeque<SlotId>>,

    /// Enqueue of a slot that was still pending
    double_queued: AtomicUsize,

    started: AtomicBool,
    abandoned: AtomicBool,
    completions: AtomicUsize,
}

impl RecordingSink {
    pub fn new(format: AudioFormat) -> Self {
        Self {
            format,
            fail_start: false,
            wiring: OnceLock::new(),
            enqueued: Mutex::new(Vec::new()),
            pending: Mutex::new(VecDeque::new()),
            double_queued: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            abandoned: AtomicBool::new(false),
            completions: AtomicUsize::new(0),
        }
    }

    /// Sink whose device refuses to start
    pub fn failing_start(format: AudioFormat) -> Self {
        Self {
            fail_start: true,
            ..Self::new(format)
        }
    }

    pub fn enqueued(&self) -> Vec<SlotId> {
        self.enqueued.lock().unwrap().clone()
    }

    pub fn enqueued_count(&self) -> usize {
        self.enqueued.lock().unwrap().len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn double_queued(&self) -> usize {
        self.double_queued.load(Ordering::SeqCst)
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    pub fn is_abandoned(&self) -> bool {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Completion callbacks fired by the test
    pub fn completions(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    pub fn pool(&self) -> Arc<BufferPool> {
        Arc::clone(&self.wiring.get().expect("sink not prepared").0)
    }

    /// Fire the completion callback for the oldest pending buffer.
    ///
    /// Returns the slot, or None if nothing is pending.
    pub fn complete_next(&self) -> Option<SlotId> {
        let slot = self.pending.lock().unwrap().pop_front()?;
        self.complete_slot(slot);
        Some(slot)
    }

    /// Fire the completion callback for `slot`, pending or not.
    pub fn complete_slot(&self, slot: SlotId) {
        let (pool, completion) = self.wiring.get().expect("sink not prepared");
        let frames = pool.buffer(slot).map_or(0, |b| b.valid_frames());
        self.completions.fetch_add(1, Ordering::SeqCst);
        completion.complete(slot, frames);
    }

    /// Report a device failure through the completion handle
    pub fn raise_fault(&self, message: &str) {
        let (_, completion) = self.wiring.get().expect("sink not prepared");
        completion.fault(message.to_string());
    }
}

impl OutputSink for RecordingSink {
    fn kind(&self) -> SinkKind {
        SinkKind::Queue
    }

    fn format(&self) -> AudioFormat {
        self.format
    }

    fn device_name(&self) -> String {
        "recording".to_string()
    }

    fn prepare(&self, pool: Arc<BufferPool>, completion: CompletionHandle) -> Result<()> {
        self.wiring
            .set((pool, completion))
            .map_err(|_| Error::InvalidState("prepared twice".to_string()))
    }

    fn enqueue(&self, slot: SlotId) -> Result<()> {
        if self.is_abandoned() {
            return Err(Error::InvalidState("abandoned".to_string()));
        }
        let mut pending = self.pending.lock().unwrap();
        if pending.contains(&slot) {
            self.double_queued.fetch_add(1, Ordering::SeqCst);
        }
        pending.push_back(slot);
        self.enqueued.lock().unwrap().push(slot);
        Ok(())
    }

    fn start(&self) -> Result<()> {
        if self.fail_start {
            return Err(Error::DeviceInitFailed("no device".to_string()));
        }
        self.started.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Pending buffers are kept so tests can fire late callbacks
    fn abandon(&self) {
        self.abandoned.store(true, Ordering::SeqCst);
    }

    fn stats(&self) -> SinkStats {
        SinkStats {
            buffers_completed: self.completions() as u64,
            ..SinkStats::default()
        }
    }
}
