//! Sliding-window metrics engine.
//!
//! A [`RollingWindow`] owns a fixed ring of time buckets and a single
//! rotation task. Registered [`Metric`]s keep one atomic accumulator per
//! bucket; rotating onto a bucket zeroes its accumulator, which is how old
//! data leaves the window.

mod accumulator;
mod bucket;
mod counter;
mod limiter;
mod metric;
mod rolling;

pub use accumulator::Accumulator;
pub use bucket::{Bucket, BucketId, BucketRing};
pub use counter::Counter;
pub use limiter::{RateLimiter, ZeroBudgetPolicy};
pub use metric::Metric;
pub use rolling::{RollingWindow, WindowState};
