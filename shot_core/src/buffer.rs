//! Bounded, time-ordered sample store for one extraction.
//!
//! A ring buffer: once full, each push overwrites the oldest slot and moves
//! the head forward. Logical index 0 is always the oldest retained sample and
//! every read is bounds-checked against the logical length.

use crate::error::SampleRejected;

/// One scale reading, timestamped from the start of the shot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub time_s: f32,
    pub weight_g: f32,
}

impl Sample {
    #[inline]
    pub const fn new(time_s: f32, weight_g: f32) -> Self {
        Self { time_s, weight_g }
    }
}

#[derive(Debug, Clone)]
pub struct SampleBuffer {
    slots: Vec<Sample>,
    head: usize,
    cap: usize,
}

impl SampleBuffer {
    /// Create an empty buffer holding at most `capacity` samples (minimum 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = capacity.max(1);
        Self {
            slots: Vec::with_capacity(cap),
            head: 0,
            cap,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.cap
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.slots.len() == self.cap
    }

    /// Append a sample, evicting the oldest one first when full.
    ///
    /// Returns the evicted sample, if any. Non-finite values and samples older
    /// than the newest retained one are refused and leave the buffer untouched.
    pub fn push(&mut self, sample: Sample) -> Result<Option<Sample>, SampleRejected> {
        if !(sample.time_s.is_finite() && sample.weight_g.is_finite()) {
            return Err(SampleRejected::NonFinite);
        }
        if let Some(last) = self.last() {
            if sample.time_s < last.time_s {
                return Err(SampleRejected::OutOfOrder {
                    last_s: last.time_s,
                    got_s: sample.time_s,
                });
            }
        }
        if self.slots.len() < self.cap {
            self.slots.push(sample);
            return Ok(None);
        }
        let evicted = std::mem::replace(&mut self.slots[self.head], sample);
        self.head = (self.head + 1) % self.cap;
        Ok(Some(evicted))
    }

    /// Sample at logical index `i` (0 = oldest).
    pub fn get(&self, i: usize) -> Option<Sample> {
        let len = self.slots.len();
        if i >= len {
            return None;
        }
        self.slots.get((self.head + i) % len).copied()
    }

    pub fn last(&self) -> Option<Sample> {
        self.len().checked_sub(1).and_then(|i| self.get(i))
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = Sample> + '_ {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter()).copied()
    }

    /// The `n` most recent samples in time order, or `None` when fewer exist.
    pub fn last_n(&self, n: usize) -> Option<impl Iterator<Item = Sample> + '_> {
        let skip = self.len().checked_sub(n)?;
        Some(self.iter().skip(skip))
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.head = 0;
    }

    pub fn to_vec(&self) -> Vec<Sample> {
        self.iter().collect()
    }
}
