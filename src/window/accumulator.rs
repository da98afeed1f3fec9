//! Per-bucket atomic state shared by every metric.

use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use dashmap::DashMap;

use super::bucket::BucketId;

/// A single atomically updated 32-bit value.
#[derive(Debug, Default)]
pub struct Accumulator {
    value: AtomicI32,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` and return the resulting value.
    pub fn add(&self, delta: i32) -> i32 {
        self.value.fetch_add(delta, Ordering::AcqRel).wrapping_add(delta)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Release);
    }

    pub fn read(&self) -> i32 {
        self.value.load(Ordering::Acquire)
    }
}

/// Accumulators of one metric, keyed by bucket handle.
///
/// Keys are ring handles, so the table never holds more than
/// `num_buckets` entries. Entries are created on first touch.
#[derive(Debug, Default)]
pub(crate) struct Slots {
    latest: AtomicUsize,
    values: DashMap<BucketId, Accumulator>,
}

impl Slots {
    pub(crate) fn latest(&self) -> BucketId {
        BucketId::new(self.latest.load(Ordering::Acquire))
    }

    /// Run `f` against the accumulator of the current bucket.
    pub(crate) fn with_latest<R>(&self, f: impl FnOnce(&Accumulator) -> R) -> R {
        let id = self.latest();
        if let Some(value) = self.values.get(&id) {
            return f(&value);
        }
        let value = self.values.entry(id).or_default();
        f(&value)
    }

    /// Zero (or create) the accumulator for `id`, then make it current.
    pub(crate) fn rotate(&self, id: BucketId) {
        match self.values.get(&id) {
            Some(value) => value.reset(),
            None => {
                self.values.entry(id).or_default().reset();
            }
        }
        self.latest.store(id.index(), Ordering::Release);
    }

    pub(crate) fn total(&self) -> i32 {
        self.values
            .iter()
            .fold(0i32, |sum, entry| sum.wrapping_add(entry.value().read()))
    }

    pub(crate) fn value(&self, id: BucketId) -> Option<i32> {
        self.values.get(&id).map(|value| value.read())
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    /// Drop every accumulator and point back at bucket 0.
    pub(crate) fn clear(&self) {
        self.values.clear();
        self.latest.store(0, Ordering::Release);
    }
}
