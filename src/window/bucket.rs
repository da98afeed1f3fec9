//! The bucket ring a rolling window rotates through.
//!
//! The ring is allocated once per `start` and never changes cardinality.
//! Buckets link to their neighbours by [`BucketId`] rather than by address,
//! so metrics can key their per-slice state on a small, stable handle.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::time::Instant;

/// Stable handle of a bucket within its ring (`0..num_buckets`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketId(usize);

impl BucketId {
    pub(crate) const fn new(index: usize) -> Self {
        Self(index)
    }

    /// Position of this bucket in the ring.
    pub fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BucketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bucket#{}", self.0)
    }
}

/// One time slice of the window.
#[derive(Debug)]
pub struct Bucket {
    id: BucketId,
    prev: BucketId,
    next: BucketId,
    /// When rotation last moved onto this bucket
    start: Mutex<Instant>,
    resets: AtomicU64,
}

impl Bucket {
    fn new(id: BucketId, prev: BucketId, next: BucketId, now: Instant) -> Self {
        Self {
            id,
            prev,
            next,
            start: Mutex::new(now),
            resets: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> BucketId {
        self.id
    }

    pub fn prev(&self) -> BucketId {
        self.prev
    }

    pub fn next(&self) -> BucketId {
        self.next
    }

    /// Timestamp of the last reset (construction time if never revisited).
    pub fn start(&self) -> Instant {
        *self.start.lock()
    }

    /// Milliseconds elapsed since the last reset.
    pub fn since(&self) -> u64 {
        self.start().elapsed().as_millis() as u64
    }

    /// How many times rotation has reset this bucket.
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::Acquire)
    }

    fn reset(&self) {
        *self.start.lock() = Instant::now();
        self.resets.fetch_add(1, Ordering::AcqRel);
    }
}

/// Fixed-size circular doubly-linked ring of buckets.
#[derive(Debug)]
pub struct BucketRing {
    buckets: Box<[Bucket]>,
    /// Index of the current bucket; written only by the rotation worker
    latest: AtomicUsize,
}

impl BucketRing {
    /// Allocate `num_buckets` buckets and link them into a ring.
    ///
    /// `latest` starts on bucket 0. Callers must pass a non-zero count.
    pub(crate) fn new(num_buckets: usize) -> Self {
        debug_assert!(num_buckets > 0, "a bucket ring needs at least one bucket");

        let now = Instant::now();
        let buckets = (0..num_buckets)
            .map(|i| {
                let prev = (i + num_buckets - 1) % num_buckets;
                let next = (i + 1) % num_buckets;
                Bucket::new(BucketId(i), BucketId(prev), BucketId(next), now)
            })
            .collect();

        Self {
            buckets,
            latest: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn get(&self, id: BucketId) -> &Bucket {
        &self.buckets[id.0]
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bucket> {
        self.buckets.iter()
    }

    /// The bucket currently accruing data.
    pub fn latest(&self) -> BucketId {
        BucketId(self.latest.load(Ordering::Acquire))
    }

    /// Move `latest` one step forward, reset the bucket it lands on and
    /// return its handle.
    pub(crate) fn advance(&self) -> BucketId {
        let next = self.get(self.latest()).next;
        self.get(next).reset();
        self.latest.store(next.0, Ordering::Release);
        next
    }
}
