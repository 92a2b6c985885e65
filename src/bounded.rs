//! Fixed-capacity ring buffer addressed by logical stream position.
//!
//! A stream is unbounded, the buffer is not: only the last `capacity` values
//! are retained, but each one keeps the index it had in the stream. Index `0`
//! is the first value ever added; indices grow monotonically and never wrap.

use crate::error::{Error, Result};

/// Retains the newest `capacity` values of a stream.
#[derive(Clone, Debug)]
pub struct BoundedStream<T> {
    slots: Vec<Option<T>>,
    /// Physical slot holding the oldest retained value.
    head: usize,
    len: usize,
    /// Logical index of the oldest retained value.
    start: u64,
}

impl<T> BoundedStream<T> {
    /// Create an empty buffer. A capacity of zero is rejected.
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::InvalidConfig("bounded stream capacity must be non-zero"));
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            head: 0,
            len: 0,
            start: 0,
        })
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.capacity()
    }

    /// Logical index of the oldest retained value.
    #[inline]
    pub fn start_index(&self) -> u64 {
        self.start
    }

    /// Logical index the next `add` will be assigned.
    #[inline]
    pub fn next_index(&self) -> u64 {
        self.start + self.len as u64
    }

    #[inline]
    fn slot(&self, offset: usize) -> usize {
        (self.head + offset) % self.capacity()
    }

    /// Append a value, evicting the oldest one when full.
    ///
    /// Returns the evicted value (if any) and the logical index of `value`.
    pub fn add(&mut self, value: T) -> (Option<T>, u64) {
        if self.is_full() {
            let evicted = self.slots[self.head].replace(value);
            self.head = self.slot(1);
            self.start += 1;
            (evicted, self.next_index() - 1)
        } else {
            let at = self.slot(self.len);
            self.slots[at] = Some(value);
            self.len += 1;
            (None, self.next_index() - 1)
        }
    }

    /// Value at a logical stream index.
    pub fn get(&self, index: u64) -> Result<&T> {
        if index < self.start || index >= self.next_index() {
            return Err(Error::OutOfRange {
                index,
                start: self.start,
                end: self.next_index(),
            });
        }
        let at = self.slot((index - self.start) as usize);
        self.slots[at].as_ref().ok_or(Error::OutOfRange {
            index,
            start: self.start,
            end: self.next_index(),
        })
    }

    /// Retained values, oldest first.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &T> + '_ {
        let first_end = (self.head + self.len).min(self.capacity());
        let wrapped = self.len - (first_end - self.head);
        self.slots[self.head..first_end]
            .iter()
            .chain(self.slots[..wrapped].iter())
            .filter_map(Option::as_ref)
    }

    /// The newest `n` values, oldest first. `None` until `n` values are retained.
    pub fn latest(&self, n: usize) -> Option<impl Iterator<Item = &T> + '_> {
        if n > self.len {
            return None;
        }
        let skip = self.len - n;
        Some((skip..self.len).filter_map(move |i| self.slots[self.slot(i)].as_ref()))
    }
}
