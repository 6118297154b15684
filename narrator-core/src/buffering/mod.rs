//! Bounded buffers shared by the narration loop and the playback path.
//!
//! - [`SlidingWindow`]: fixed-capacity FIFO history (events, commentary).
//! - [`ring::AudioRingBuffer`]: bounded chunk queue drained by the
//!   real-time callback.

pub mod ring;

use std::collections::VecDeque;

use crate::error::{NarratorError, Result};

pub use ring::{AudioRingBuffer, PushOutcome, RingGuard};

/// Ordered buffer of at most `capacity` entries; the oldest entry is
/// evicted first. Owned by a single task, so it carries no locking.
#[derive(Debug, Clone)]
pub struct SlidingWindow<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> SlidingWindow<T> {
    /// # Errors
    /// `NarratorError::InvalidConfig` when `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(NarratorError::InvalidConfig(
                "sliding window capacity must be greater than 0".into(),
            ));
        }
        Ok(Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Append `entry`, returning the evicted oldest entry when full.
    pub fn push(&mut self, entry: T) -> Option<T> {
        let evicted = if self.entries.len() == self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&T> {
        self.entries.back()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: Clone> SlidingWindow<T> {
    /// Copy of the last `min(k, len)` entries, most recent last.
    pub fn snapshot_last(&self, k: usize) -> Vec<T> {
        let skip = self.entries.len().saturating_sub(k);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_zero_capacity() {
        assert!(SlidingWindow::<String>::new(0).is_err());
    }

    #[test]
    fn keeps_last_n_in_order_after_overflow() {
        let n = 5;
        let k = 7;
        let mut window = SlidingWindow::new(n).unwrap();
        for i in 0..(n + k) {
            window.push(i);
            assert!(window.len() <= n);
        }
        assert_eq!(window.len(), n);
        let kept: Vec<_> = window.iter().copied().collect();
        assert_eq!(kept, vec![7, 8, 9, 10, 11]);
    }

    #[test]
    fn push_reports_evicted_entry() {
        let mut window = SlidingWindow::new(2).unwrap();
        assert_eq!(window.push("a"), None);
        assert_eq!(window.push("b"), None);
        assert_eq!(window.push("c"), Some("a"));
        assert_eq!(window.latest(), Some(&"c"));
    }

    #[test]
    fn snapshot_lists_events_most_recent_last() {
        let mut window = SlidingWindow::new(50).unwrap();
        for name in ["E1", "E2", "E3", "E4", "E5"] {
            window.push(name.to_string());
        }
        assert_eq!(window.snapshot_last(50), vec!["E1", "E2", "E3", "E4", "E5"]);
        assert_eq!(window.snapshot_last(2), vec!["E4", "E5"]);
        assert!(window.snapshot_last(0).is_empty());
    }

    #[test]
    fn identical_entries_are_kept() {
        let mut window = SlidingWindow::new(3).unwrap();
        window.push("same");
        window.push("same");
        assert_eq!(window.len(), 2);
    }
}
