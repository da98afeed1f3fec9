//! The capability every windowed metric implements.

use crate::error::Result;

use super::bucket::BucketId;

/// A measurement strategy driven by a [`RollingWindow`](super::RollingWindow).
///
/// Implementations own their per-bucket storage and must tolerate
/// `on_rotate` racing with their own data-path calls.
pub trait Metric: Send + Sync {
    /// Receive the window's timing parameters at registration.
    fn init(&self, window_ms: u64, num_buckets: usize) -> Result<()>;

    /// The window is about to build a fresh ring; forget every slice.
    fn on_start(&self) {}

    /// The window moved onto `bucket`; evict whatever it held.
    fn on_rotate(&self, bucket: BucketId);

    /// Short name used in log output.
    fn name(&self) -> &'static str {
        "metric"
    }
}
