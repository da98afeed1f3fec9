//! Windowed running total.

use crate::error::Result;

use super::accumulator::Slots;
use super::bucket::BucketId;
use super::metric::Metric;

/// Sums additions over the trailing window.
///
/// `add` only touches the shard of the slot map that holds the current
/// bucket, so concurrent callers rarely contend.
#[derive(Debug, Default)]
pub struct Counter {
    slots: Slots,
}

impl Counter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` to the current bucket and return that bucket's new value.
    pub fn add(&self, delta: i32) -> i32 {
        self.slots.with_latest(|value| value.add(delta))
    }

    /// Sum of every tracked bucket.
    pub fn total(&self) -> i32 {
        self.slots.total()
    }

    /// Number of buckets with an accumulator.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Get the value held for `bucket`, if it has been touched.
    pub fn value(&self, bucket: BucketId) -> Option<i32> {
        self.slots.value(bucket)
    }

    /// Get the bucket that `add` currently writes to.
    pub fn latest(&self) -> BucketId {
        self.slots.latest()
    }
}

impl Metric for Counter {
    fn init(&self, _window_ms: u64, _num_buckets: usize) -> Result<()> {
        Ok(())
    }

    fn on_start(&self) {
        self.slots.clear();
    }

    fn on_rotate(&self, bucket: BucketId) {
        self.slots.rotate(bucket);
    }

    fn name(&self) -> &'static str {
        "counter"
    }
}
