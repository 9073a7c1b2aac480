//! Key-indexed metric timeline
//!
//! Entries are `(key, value)` pairs where the key is normally a block height.
//! The timeline supports refining the value at the newest key, dropping
//! entries above a rollback point, and dropping entries at or below a
//! retention horizon.

use std::collections::VecDeque;

/// One `(key, value)` point of a timeline
pub type Point = (i64, f64);

/// An ordered sequence of keyed samples
#[derive(Debug, Clone, Default)]
pub struct KeyedTimeline {
    entries: VecDeque<Point>,
}

impl KeyedTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the value of the last entry when it has `key`, otherwise append.
    ///
    /// Key order is the caller's responsibility.
    pub fn upsert(&mut self, key: i64, value: f64) {
        match self.entries.back_mut() {
            Some(last) if last.0 == key => last.1 = value,
            _ => self.entries.push_back((key, value)),
        }
    }

    /// Remove trailing entries with a key greater than `key`.
    ///
    /// Returns the number of entries removed.
    pub fn truncate_above(&mut self, key: i64) -> usize {
        let mut removed = 0;
        while matches!(self.entries.back(), Some(&(k, _)) if k > key) {
            self.entries.pop_back();
            removed += 1;
        }
        removed
    }

    /// Remove leading entries with a key less than or equal to `key`.
    ///
    /// Returns the number of entries removed.
    pub fn evict_below(&mut self, key: i64) -> usize {
        let mut removed = 0;
        while matches!(self.entries.front(), Some(&(k, _)) if k <= key) {
            self.entries.pop_front();
            removed += 1;
        }
        removed
    }

    pub fn last_key(&self) -> Option<i64> {
        self.entries.back().map(|&(k, _)| k)
    }

    pub fn last_value(&self) -> Option<f64> {
        self.entries.back().map(|&(_, v)| v)
    }

    /// Iterate entries in insertion order
    pub fn iter(&self) -> impl Iterator<Item = Point> + Clone + '_ {
        self.entries.iter().copied()
    }

    /// Copy of the newest `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<Point> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
