//! Per-slice admission gate over a global concurrency budget.

use std::sync::atomic::{AtomicI32, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Result, WindowError};

use super::accumulator::Slots;
use super::bucket::BucketId;
use super::metric::Metric;

/// What `init` does when `concurrency / num_buckets` truncates to zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ZeroBudgetPolicy {
    /// Accept the configuration; every `acquire` is then rejected
    #[default]
    Reject,
    /// Fail registration with [`WindowError::ZeroBudget`]
    Error,
}

/// Discretized sliding-window rate limiter.
///
/// Each bucket admits at most `concurrency / num_buckets` requests and is
/// refilled when rotation comes back around to it.
#[derive(Debug)]
pub struct RateLimiter {
    concurrency: i32,
    policy: ZeroBudgetPolicy,
    /// Set by `init`
    bucket_concurrency: AtomicI32,
    slots: Slots,
}

impl RateLimiter {
    /// Create a limiter that silently rejects everything on a zero budget.
    pub fn new(concurrency: i32) -> Self {
        Self::with_policy(concurrency, ZeroBudgetPolicy::Reject)
    }

    pub fn with_policy(concurrency: i32, policy: ZeroBudgetPolicy) -> Self {
        Self {
            concurrency,
            policy,
            bucket_concurrency: AtomicI32::new(0),
            slots: Slots::default(),
        }
    }

    /// Try to admit one request in the current bucket.
    ///
    /// Returns whether it was admitted and the bucket's value after the
    /// decision. A rejected increment is rolled back.
    pub fn acquire(&self) -> (bool, i32) {
        let budget = self.bucket_concurrency();
        self.slots.with_latest(|value| {
            let admitted = value.add(1);
            if admitted <= budget {
                return (true, admitted);
            }

            let rolled_back = value.add(-1);
            debug!(
                bucket = %self.slots.latest(),
                budget = budget,
                "Admission rejected"
            );
            (false, rolled_back)
        })
    }

    /// Admitted requests across every tracked bucket.
    pub fn total(&self) -> i32 {
        self.slots.total()
    }

    pub fn concurrency(&self) -> i32 {
        self.concurrency
    }

    /// Per-bucket budget; zero until `init` runs.
    pub fn bucket_concurrency(&self) -> i32 {
        self.bucket_concurrency.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> ZeroBudgetPolicy {
        self.policy
    }

    /// Number of buckets with an accumulator.
    pub fn tracked(&self) -> usize {
        self.slots.len()
    }

    /// Get the admitted count held for `bucket`, if it has been touched.
    pub fn value(&self, bucket: BucketId) -> Option<i32> {
        self.slots.value(bucket)
    }

    /// Get the bucket that `acquire` currently admits into.
    pub fn latest(&self) -> BucketId {
        self.slots.latest()
    }
}

impl Metric for RateLimiter {
    fn init(&self, _window_ms: u64, num_buckets: usize) -> Result<()> {
        if num_buckets == 0 {
            return Err(WindowError::InvalidWindow(
                "rate limiter needs at least one bucket".to_string(),
            ));
        }

        let divisor = i32::try_from(num_buckets).unwrap_or(i32::MAX);
        let budget = self.concurrency / divisor;

        if budget <= 0 {
            match self.policy {
                ZeroBudgetPolicy::Error => {
                    return Err(WindowError::ZeroBudget {
                        concurrency: self.concurrency,
                        num_buckets,
                    });
                }
                ZeroBudgetPolicy::Reject => {
                    warn!(
                        concurrency = self.concurrency,
                        num_buckets = num_buckets,
                        "Per-bucket budget is zero, every acquire will be rejected"
                    );
                }
            }
        }

        self.bucket_concurrency.store(budget, Ordering::Release);
        Ok(())
    }

    fn on_start(&self) {
        self.slots.clear();
    }

    fn on_rotate(&self, bucket: BucketId) {
        self.slots.rotate(bucket);
    }

    fn name(&self) -> &'static str {
        "rate_limiter"
    }
}
