//! Fixed pool of reusable audio buffers
//!
//! All buffers are allocated once when the engine is built and referenced by
//! [`SlotId`] afterwards; nothing is allocated per chunk.
//!
//! ## Slot lifecycle
//!
//! ```text
//!   Free ──acquire_free()──► Filling ──mark_queued()──► Queued
//!    ▲                          │                          │
//!    └────────── release() ─────┴──────── release() ───────┘
//! ```
//!
//! ## Thread Safety
//!
//! - Free slot ids live in a lock-free `ArrayQueue`
//! - Each slot's state is an `AtomicU8`; every transition is a
//!   compare-and-swap, so a slot is released exactly once even when the
//!   completion path and an explicit stop race for it
//! - `in_flight` counts Filling + Queued slots. The free count is derived
//!   as `size - in_flight`, so the two always sum to the pool size
//! - Sample storage sits behind a per-slot `Mutex`. Only the slot's current
//!   owner touches it, so the lock is uncontended; the render path uses
//!   `try_buffer()` and never waits

use crate::audio::types::{AudioBuffer, AudioFormat, SlotId};
use crossbeam::queue::ArrayQueue;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

/// Ownership partition of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SlotState {
    /// Owned by the pool
    Free = 0,
    /// Owned by the fill scheduler
    Filling = 1,
    /// Owned by the output sink
    Queued = 2,
}

impl SlotState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => SlotState::Free,
            1 => SlotState::Filling,
            _ => SlotState::Queued,
        }
    }
}

struct Slot {
    state: AtomicU8,
    buffer: Mutex<AudioBuffer>,
}

/// Snapshot of pool occupancy and lifetime counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    pub free: usize,
    pub in_flight: usize,
    pub filling: usize,
    pub queued: usize,

    /// Successful releases over the pool lifetime
    pub releases: u64,

    /// `acquire_free()` calls that found no free slot
    pub starvations: u64,
}

/// Arena of fixed-capacity buffers recycled between decoder and sink.
pub struct BufferPool {
    slots: Box<[Slot]>,
    free_list: ArrayQueue<usize>,
    in_flight: AtomicUsize,
    format: AudioFormat,
    frames_per_buffer: usize,
    releases: AtomicU64,
    starvations: AtomicU64,
}

impl BufferPool {
    /// Allocate `size` buffers of `frames_per_buffer` frames each.
    ///
    /// A zero size is raised to 1.
    pub fn new(size: usize, format: AudioFormat, frames_per_buffer: usize) -> Self {
        let size = size.max(1);
        let slots: Box<[Slot]> = (0..size)
            .map(|_| Slot {
                state: AtomicU8::new(SlotState::Free as u8),
                buffer: Mutex::new(AudioBuffer::new(format, frames_per_buffer)),
            })
            .collect();

        let free_list = ArrayQueue::new(size);
        for index in 0..size {
            // Capacity equals size, so this cannot fail
            let _ = free_list.push(index);
        }

        Self {
            slots,
            free_list,
            in_flight: AtomicUsize::new(0),
            format,
            frames_per_buffer,
            releases: AtomicU64::new(0),
            starvations: AtomicU64::new(0),
        }
    }

    pub fn size(&self) -> usize {
        self.slots.len()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn frames_per_buffer(&self) -> usize {
        self.frames_per_buffer
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn free_count(&self) -> usize {
        self.size() - self.in_flight_count()
    }

    /// Take a free slot for filling. None is backpressure, not an error.
    pub fn acquire_free(&self) -> Option<SlotId> {
        match self.free_list.pop() {
            Some(index) => {
                self.in_flight.fetch_add(1, Ordering::SeqCst);
                let swapped = self.slots[index].state.compare_exchange(
                    SlotState::Free as u8,
                    SlotState::Filling as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                );
                debug_assert!(swapped.is_ok(), "slot {} on free list was not free", index);
                Some(SlotId(index))
            }
            None => {
                self.starvations.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Hand a filled slot over to the sink (Filling → Queued).
    pub fn mark_queued(&self, slot: SlotId) -> bool {
        self.slot(slot).is_some_and(|s| {
            s.state
                .compare_exchange(
                    SlotState::Filling as u8,
                    SlotState::Queued as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        })
    }

    /// Return an in-flight slot (Filling or Queued) to the free set.
    ///
    /// Safe from any thread, never blocks. Returns false if the slot was
    /// already free (a repeated release is ignored).
    pub fn release(&self, slot: SlotId) -> bool {
        self.release_from(slot, &[SlotState::Queued, SlotState::Filling])
    }

    /// Return a slot only if the sink owns it (Queued → Free).
    ///
    /// Used by the completion path so a stray callback can never take a
    /// slot away from the fill scheduler.
    pub fn release_queued(&self, slot: SlotId) -> bool {
        self.release_from(slot, &[SlotState::Queued])
    }

    fn release_from(&self, slot: SlotId, from: &[SlotState]) -> bool {
        let Some(entry) = self.slot(slot) else {
            return false;
        };

        let released = from.iter().any(|state| {
            entry
                .state
                .compare_exchange(
                    *state as u8,
                    SlotState::Free as u8,
                    Ordering::SeqCst,
                    Ordering::SeqCst,
                )
                .is_ok()
        });
        if !released {
            return false;
        }

        // Decrement before publishing the id so in_flight never exceeds size
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        let _ = self.free_list.push(slot.index());
        self.releases.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Release every Queued slot. Returns the number released by this call.
    pub fn reclaim_queued(&self) -> usize {
        (0..self.size())
            .filter(|&index| self.release_queued(SlotId(index)))
            .count()
    }

    pub fn slot_state(&self, slot: SlotId) -> Option<SlotState> {
        self.slot(slot)
            .map(|s| SlotState::from_u8(s.state.load(Ordering::SeqCst)))
    }

    /// Lock a slot's buffer. For the slot's current owner off the render path.
    pub fn buffer(&self, slot: SlotId) -> Option<MutexGuard<'_, AudioBuffer>> {
        self.slot(slot)
            .map(|s| s.buffer.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lock a slot's buffer without waiting. Used on the render path.
    pub fn try_buffer(&self, slot: SlotId) -> Option<MutexGuard<'_, AudioBuffer>> {
        let entry = self.slot(slot)?;
        match entry.buffer.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::Poisoned(poisoned)) => Some(poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => None,
        }
    }

    pub fn stats(&self) -> PoolStats {
        let mut filling = 0;
        let mut queued = 0;
        for slot in self.slots.iter() {
            match SlotState::from_u8(slot.state.load(Ordering::SeqCst)) {
                SlotState::Filling => filling += 1,
                SlotState::Queued => queued += 1,
                SlotState::Free => {}
            }
        }
        let in_flight = self.in_flight_count();

        PoolStats {
            size: self.size(),
            free: self.size() - in_flight,
            in_flight,
            filling,
            queued,
            releases: self.releases.load(Ordering::Relaxed),
            starvations: self.starvations.load(Ordering::Relaxed),
        }
    }

    fn slot(&self, slot: SlotId) -> Option<&Slot> {
        self.slots.get(slot.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(size: usize) -> BufferPool {
        BufferPool::new(size, AudioFormat::cd_quality(), 64)
    }

    #[test]
    fn test_pool_starts_all_free() {
        let pool = pool(4);
        assert_eq!(pool.size(), 4);
        assert_eq!(pool.free_count(), 4);
        assert_eq!(pool.in_flight_count(), 0);
        for i in 0..4 {
            assert_eq!(pool.slot_state(SlotId(i)), Some(SlotState::Free));
        }
        assert_eq!(pool.buffer(SlotId(0)).unwrap().capacity_frames(), 64);
    }

    #[test]
    fn test_zero_size_raised_to_one() {
        assert_eq!(pool(0).size(), 1);
    }

    #[test]
    fn test_acquire_until_starved() {
        let pool = pool(2);
        let a = pool.acquire_free().unwrap();
        let b = pool.acquire_free().unwrap();
        assert_ne!(a, b);
        assert!(pool.acquire_free().is_none());

        let stats = pool.stats();
        assert_eq!(stats.filling, 2);
        assert_eq!(stats.free, 0);
        assert_eq!(stats.starvations, 1);
    }

    #[test]
    fn test_full_cycle() {
        let pool = pool(1);
        let slot = pool.acquire_free().unwrap();
        assert_eq!(pool.slot_state(slot), Some(SlotState::Filling));

        assert!(pool.mark_queued(slot));
        assert_eq!(pool.slot_state(slot), Some(SlotState::Queued));
        assert!(!pool.mark_queued(slot));

        assert!(pool.release(slot));
        assert_eq!(pool.slot_state(slot), Some(SlotState::Free));
        assert_eq!(pool.free_count(), 1);
        assert_eq!(pool.acquire_free(), Some(slot));
    }

    #[test]
    fn test_double_release_ignored() {
        let pool = pool(2);
        let slot = pool.acquire_free().unwrap();
        pool.mark_queued(slot);

        assert!(pool.release(slot));
        assert!(!pool.release(slot));
        assert_eq!(pool.free_count(), 2);
        assert_eq!(pool.in_flight_count(), 0);
        assert_eq!(pool.stats().releases, 1);
    }

    #[test]
    fn test_release_queued_leaves_filling_slot_alone() {
        let pool = pool(1);
        let slot = pool.acquire_free().unwrap();

        assert!(!pool.release_queued(slot));
        assert_eq!(pool.slot_state(slot), Some(SlotState::Filling));

        pool.mark_queued(slot);
        assert!(pool.release_queued(slot));
        assert!(!pool.release_queued(slot));
        assert_eq!(pool.free_count(), 1);
    }

    #[test]
    fn test_release_unknown_slot() {
        let pool = pool(2);
        assert!(!pool.release(SlotId(99)));
        assert!(pool.slot_state(SlotId(99)).is_none());
    }

    #[test]
    fn test_reclaim_only_queued() {
        let pool = pool(3);
        let a = pool.acquire_free().unwrap();
        let b = pool.acquire_free().unwrap();
        let filling = pool.acquire_free().unwrap();
        pool.mark_queued(a);
        pool.mark_queued(b);

        assert_eq!(pool.reclaim_queued(), 2);
        assert_eq!(pool.reclaim_queued(), 0);
        assert_eq!(pool.slot_state(filling), Some(SlotState::Filling));
        assert_eq!(pool.free_count(), 2);
    }

    #[test]
    fn test_try_buffer_does_not_wait() {
        let pool = pool(1);
        let slot = pool.acquire_free().unwrap();
        let held = pool.buffer(slot).unwrap();
        assert!(pool.try_buffer(slot).is_none());
        drop(held);
        assert!(pool.try_buffer(slot).is_some());
    }

    #[test]
    fn test_free_plus_in_flight_is_size() {
        let pool = pool(5);
        let mut held = Vec::new();
        for _ in 0..5 {
            held.push(pool.acquire_free().unwrap());
            let stats = pool.stats();
            assert_eq!(stats.free + stats.in_flight, 5);
        }
        for slot in held {
            pool.release(slot);
            let stats = pool.stats();
            assert_eq!(stats.free + stats.in_flight, 5);
        }
    }
}
