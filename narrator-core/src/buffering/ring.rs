//! Bounded queue of raw audio chunks between the narration producer and the
//! real-time output callback.
//!
//! # Contention model
//!
//! A `parking_lot::Mutex` guards a `VecDeque<Vec<u8>>`. The producer holds it
//! for a push (plus at most one eviction); the callback acquires it with
//! `try_lock` only and holds it for one bounded `copy_from_slice`. The
//! callback therefore never waits on the producer.
//!
//! A partially consumed front chunk is tracked with a read cursor instead of
//! splitting the `Vec`, so carrying a remainder to the next callback neither
//! allocates nor rebuilds the queue.
//!
//! Fully played chunks are parked in a pre-allocated `spent` list rather than
//! dropped, and the producer frees them on its next push outside the ring
//! lock. The callback neither allocates nor frees.

use std::collections::VecDeque;

use parking_lot::{Mutex, MutexGuard};

use crate::error::{NarratorError, Result};

/// Default capacity in chunks.
pub const DEFAULT_RING_CAPACITY: usize = 100;

/// What happened to a chunk offered to the ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Queued,
    /// The ring was full; a chunk of `evicted_len` unplayed bytes was dropped.
    EvictedOldest { evicted_len: usize },
}

#[derive(Debug, Default)]
struct RingState {
    chunks: VecDeque<Vec<u8>>,
    /// Bytes of `chunks[0]` already handed to the output.
    front_offset: usize,
    /// Played chunks awaiting release by the producer. Never grows past its
    /// initial capacity.
    spent: Vec<Vec<u8>>,
}

impl RingState {
    /// Unplayed length and storage of the evicted front chunk.
    fn evict_front(&mut self) -> Option<(usize, Vec<u8>)> {
        let offset = std::mem::take(&mut self.front_offset);
        self.chunks
            .pop_front()
            .map(|chunk| (chunk.len().saturating_sub(offset), chunk))
    }
}

/// Bounded FIFO of audio chunks with evict-oldest admission.
#[derive(Debug)]
pub struct AudioRingBuffer {
    state: Mutex<RingState>,
    /// Producer-only swap partner for `RingState::spent`.
    recycle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
}

impl AudioRingBuffer {
    /// # Errors
    /// `NarratorError::InvalidConfig` when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(NarratorError::InvalidConfig(
                "audio ring capacity must be greater than 0".into(),
            ));
        }
        Ok(Self {
            state: Mutex::new(RingState {
                chunks: VecDeque::with_capacity(capacity),
                front_offset: 0,
                spent: Vec::with_capacity(capacity),
            }),
            recycle: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        })
    }

    /// Append a chunk. At capacity the oldest queued chunk is dropped first,
    /// so the producer never waits and the newest audio is always kept.
    ///
    /// Also releases chunks the callback finished since the last push.
    pub fn push(&self, chunk: Vec<u8>) -> PushOutcome {
        let mut recycled = self.recycle.lock();
        let mut evicted = None;
        let outcome = {
            let mut state = self.state.lock();
            std::mem::swap(&mut state.spent, &mut *recycled);
            let outcome = if state.chunks.len() >= self.capacity {
                let (evicted_len, storage) = state.evict_front().unwrap_or_default();
                evicted = Some(storage);
                PushOutcome::EvictedOldest { evicted_len }
            } else {
                PushOutcome::Queued
            };
            state.chunks.push_back(chunk);
            outcome
        };
        recycled.clear();
        drop(evicted);
        outcome
    }

    /// Remove and return the unplayed bytes of the front chunk.
    #[cfg(test)]
    fn pop_front(&self) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let offset = std::mem::take(&mut state.front_offset);
        let mut chunk = state.chunks.pop_front()?;
        if offset > 0 {
            chunk.drain(..offset.min(chunk.len()));
        }
        Some(chunk)
    }

    /// Non-blocking access for the real-time callback.
    ///
    /// Returns `None` when the producer currently holds the lock.
    pub fn try_lock(&self) -> Option<RingGuard<'_>> {
        self.state.try_lock().map(|state| RingGuard { state })
    }

    /// Number of queued chunks (a partially played chunk counts as one).
    pub fn len(&self) -> usize {
        self.state.lock().chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().chunks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Unplayed bytes across all chunks.
    pub fn queued_bytes(&self) -> usize {
        let state = self.state.lock();
        state
            .chunks
            .iter()
            .map(Vec::len)
            .sum::<usize>()
            .saturating_sub(state.front_offset)
    }

    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.chunks.clear();
        state.spent.clear();
        state.front_offset = 0;
    }
}

/// Exclusive view of the ring held by the callback for one invocation.
pub struct RingGuard<'a> {
    state: MutexGuard<'a, RingState>,
}

impl RingGuard<'_> {
    /// Unplayed bytes of the oldest chunk.
    pub fn front(&self) -> Option<&[u8]> {
        let offset = self.state.front_offset;
        self.state.chunks.front().map(|chunk| &chunk[offset.min(chunk.len())..])
    }

    /// Mark `n` bytes of the front chunk as played. Once a chunk is fully
    /// played it leaves the ring; otherwise its remainder stays in front.
    pub fn consume_front(&mut self, n: usize) {
        let Some(front_len) = self.state.chunks.front().map(Vec::len) else {
            return;
        };
        let consumed = self.state.front_offset.saturating_add(n);
        if consumed >= front_len {
            let state = &mut *self.state;
            state.front_offset = 0;
            if let Some(played) = state.chunks.pop_front() {
                // At most `capacity` chunks are played between two pushes.
                if state.spent.len() < state.spent.capacity() {
                    state.spent.push(played);
                }
            }
        } else {
            self.state.front_offset = consumed;
        }
    }

    pub fn len(&self) -> usize {
        self.state.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.chunks.is_empty()
    }
}
