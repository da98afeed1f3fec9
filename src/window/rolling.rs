//! Rolling window lifecycle and the rotation worker.

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::error::{Result, WindowError};

use super::bucket::BucketRing;
use super::metric::Metric;

const STOPPED: u8 = 0;
const STARTED: u8 = 1;

/// Lifecycle state of a [`RollingWindow`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowState {
    Stopped,
    Started,
}

/// Handle to a running rotation task.
struct Worker {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

/// A window of `window_ms` split into `num_buckets` rotating buckets.
///
/// Metrics are registered while stopped. `start` builds the ring and spawns
/// one rotation task on the current tokio runtime; the task advances the
/// ring every `window_ms / num_buckets` and notifies each metric in
/// registration order.
pub struct RollingWindow {
    window_ms: u64,
    num_buckets: usize,
    state: AtomicU8,
    metrics: RwLock<Vec<Arc<dyn Metric>>>,
    ring: RwLock<Option<Arc<BucketRing>>>,
    /// Serializes `start`/`stop`
    worker: Mutex<Option<Worker>>,
    /// Cancelled workers not yet awaited by `join`
    exiting: Mutex<Vec<JoinHandle<()>>>,
    rotations: Arc<AtomicU64>,
}

impl std::fmt::Debug for RollingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RollingWindow")
            .field("window_ms", &self.window_ms)
            .field("num_buckets", &self.num_buckets)
            .field("state", &self.state())
            .field("metrics", &self.metric_count())
            .field("rotations", &self.rotations())
            .finish()
    }
}

impl RollingWindow {
    /// Create a stopped window. Timing parameters are validated by `start`.
    pub fn new(window_ms: u64, num_buckets: usize) -> Self {
        Self {
            window_ms,
            num_buckets,
            state: AtomicU8::new(STOPPED),
            metrics: RwLock::new(Vec::with_capacity(2)),
            ring: RwLock::new(None),
            worker: Mutex::new(None),
            exiting: Mutex::new(Vec::new()),
            rotations: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    pub fn num_buckets(&self) -> usize {
        self.num_buckets
    }

    pub fn state(&self) -> WindowState {
        match self.state.load(Ordering::Acquire) {
            STARTED => WindowState::Started,
            _ => WindowState::Stopped,
        }
    }

    pub fn is_started(&self) -> bool {
        self.state() == WindowState::Started
    }

    /// Width of one bucket.
    pub fn period(&self) -> Result<Duration> {
        if self.num_buckets == 0 {
            return Err(WindowError::InvalidWindow(
                "num_buckets must be positive".to_string(),
            ));
        }
        let slice_ms = self.window_ms / self.num_buckets as u64;
        if slice_ms == 0 {
            return Err(WindowError::InvalidWindow(format!(
                "{}ms split into {} buckets leaves a zero-width slice",
                self.window_ms, self.num_buckets
            )));
        }
        Ok(Duration::from_millis(slice_ms))
    }

    /// Register a metric. Only legal while stopped.
    pub fn add_metric(&self, metric: Arc<dyn Metric>) -> Result<()> {
        let mut metrics = self.metrics.write();
        if self.is_started() {
            return Err(WindowError::RegisterWhileStarted);
        }

        metric.init(self.window_ms, self.num_buckets)?;
        debug!(metric = metric.name(), index = metrics.len(), "Registered metric");
        metrics.push(metric);
        Ok(())
    }

    /// Register several metrics, or none of them if any `init` fails.
    pub fn add_metrics<I>(&self, batch: I) -> Result<()>
    where
        I: IntoIterator<Item = Arc<dyn Metric>>,
    {
        let batch: Vec<Arc<dyn Metric>> = batch.into_iter().collect();
        let mut metrics = self.metrics.write();
        if self.is_started() {
            return Err(WindowError::RegisterWhileStarted);
        }

        for metric in &batch {
            metric.init(self.window_ms, self.num_buckets)?;
        }

        debug!(count = batch.len(), "Registered metric batch");
        metrics.extend(batch);
        Ok(())
    }

    pub fn metric_count(&self) -> usize {
        self.metrics.read().len()
    }

    /// Build the ring and spawn the rotation task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let period = self.period()?;
        let runtime = Handle::try_current().map_err(|_| WindowError::NoRuntime)?;

        let mut worker = self.worker.lock();
        if self
            .state
            .compare_exchange(STOPPED, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WindowError::AlreadyStarted);
        }

        let ring = Arc::new(BucketRing::new(self.num_buckets));
        let metrics: Arc<[Arc<dyn Metric>]> = self.metrics.read().iter().cloned().collect();
        for metric in metrics.iter() {
            metric.on_start();
        }
        let shutdown = CancellationToken::new();

        self.rotations.store(0, Ordering::Release);
        let handle = runtime.spawn(rotate(
            Arc::clone(&ring),
            Arc::clone(&metrics),
            period,
            shutdown.clone(),
            Arc::clone(&self.rotations),
        ));

        *self.ring.write() = Some(ring);
        *worker = Some(Worker { shutdown, handle });

        info!(
            window_ms = self.window_ms,
            num_buckets = self.num_buckets,
            period_ms = period.as_millis() as u64,
            metrics = metrics.len(),
            "Rolling window started"
        );
        Ok(())
    }

    /// Signal the rotation task to exit and return without waiting for it.
    ///
    /// Use [`join`](Self::join) to await the task.
    pub fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if self
            .state
            .compare_exchange(STARTED, STOPPED, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(WindowError::AlreadyStopped);
        }

        if let Some(Worker { shutdown, handle }) = worker.take() {
            shutdown.cancel();
            let mut exiting = self.exiting.lock();
            exiting.retain(|h| !h.is_finished());
            exiting.push(handle);
        }
        *self.ring.write() = None;

        info!(rotations = self.rotations(), "Rolling window stopped");
        Ok(())
    }

    /// Wait for every rotation task cancelled by `stop` to finish.
    pub async fn join(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.exiting.lock());
        for handle in handles {
            // JoinError means a metric panicked inside on_rotate.
            if let Err(e) = handle.await {
                debug!(error = %e, "Rotation worker ended abnormally");
            }
        }
    }

    /// The live ring, or `None` while stopped.
    pub fn ring(&self) -> Option<Arc<BucketRing>> {
        self.ring.read().clone()
    }

    /// Rotation passes performed by the current (or last) worker, priming pass included.
    pub fn rotations(&self) -> u64 {
        self.rotations.load(Ordering::Acquire)
    }
}

impl Drop for RollingWindow {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.shutdown.cancel();
        }
    }
}

/// Rotation loop. The interval's first tick fires immediately, which primes
/// every metric with its first bucket.
async fn rotate(
    ring: Arc<BucketRing>,
    metrics: Arc<[Arc<dyn Metric>]>,
    period: Duration,
    shutdown: CancellationToken,
    rotations: Arc<AtomicU64>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                debug!("Rotation worker exiting");
                return;
            }
            _ = ticker.tick() => {
                let latest = ring.advance();
                for metric in metrics.iter() {
                    metric.on_rotate(latest);
                }
                let pass = rotations.fetch_add(1, Ordering::AcqRel) + 1;
                trace!(bucket = %latest, pass = pass, "Rotated");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::{BucketId, Counter, RateLimiter, ZeroBudgetPolicy};
    use tokio_test::{assert_err, assert_ok};

    struct FailingMetric;

    impl Metric for FailingMetric {
        fn init(&self, _window_ms: u64, _num_buckets: usize) -> Result<()> {
            Err(WindowError::Config("refusing to register".to_string()))
        }

        fn on_rotate(&self, _bucket: BucketId) {}
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_builds_circular_ring() {
        let window = RollingWindow::new(1000, 10);
        assert!(window.ring().is_none());

        assert_ok!(window.start());
        let ring = window.ring().unwrap();
        assert_eq!(ring.len(), 10);

        for bucket in ring.iter() {
            let mut cursor = bucket.id();
            for _ in 0..ring.len() {
                cursor = ring.get(cursor).next();
            }
            assert_eq!(cursor, bucket.id());
        }

        assert_ok!(window.stop());
        assert!(window.ring().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_start_rejected() {
        let counter = Arc::new(Counter::new());
        let window = RollingWindow::new(100, 10);
        assert_ok!(window.add_metric(counter.clone()));

        assert_ok!(window.start());
        assert!(matches!(window.start(), Err(WindowError::AlreadyStarted)));
        assert_eq!(window.state(), WindowState::Started);

        // The first worker keeps rotating.
        tokio::time::sleep(Duration::from_millis(35)).await;
        assert_eq!(window.rotations(), 4);
        assert_eq!(counter.latest(), window.ring().unwrap().latest());

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_double_stop_rejected() {
        let window = RollingWindow::new(100, 10);
        assert!(matches!(window.stop(), Err(WindowError::AlreadyStopped)));

        assert_ok!(window.start());
        assert_ok!(window.stop());
        assert!(matches!(window.stop(), Err(WindowError::AlreadyStopped)));
        assert_eq!(window.state(), WindowState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_metric_after_start_rejected() {
        let window = RollingWindow::new(100, 10);
        assert_ok!(window.start());

        let late = Arc::new(Counter::new());
        assert!(matches!(
            window.add_metric(late.clone()),
            Err(WindowError::RegisterWhileStarted)
        ));
        assert_eq!(window.metric_count(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(late.tracked(), 0);

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_window_rotates_on_schedule() {
        let counter = Arc::new(Counter::new());
        let window = RollingWindow::new(1000, 10);
        assert_ok!(window.add_metric(counter.clone()));
        assert_ok!(window.start());

        tokio::time::sleep(Duration::from_millis(250)).await;

        assert_eq!(counter.total(), 0);
        // Priming pass plus the ticks at 100ms and 200ms.
        assert_eq!(window.rotations(), 3);
        let ring = window.ring().unwrap();
        let refreshed: u64 = ring.iter().map(|b| b.reset_count()).sum();
        assert_eq!(refreshed, 3);
        assert_eq!(ring.latest(), BucketId::new(3));

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_metrics_share_the_current_bucket() {
        let counter = Arc::new(Counter::new());
        let limiter = Arc::new(RateLimiter::new(100));
        let window = RollingWindow::new(1000, 10);
        assert_ok!(window.add_metric(counter.clone()));
        assert_ok!(window.add_metric(limiter.clone()));
        assert_ok!(window.start());

        tokio::time::sleep(Duration::from_millis(120)).await;

        let latest = window.ring().unwrap().latest();
        assert_eq!(counter.latest(), latest);
        assert_eq!(limiter.latest(), latest);

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_evicts_after_full_lap() {
        let counter = Arc::new(Counter::new());
        let window = RollingWindow::new(400, 4);
        assert_ok!(window.add_metric(counter.clone()));
        assert_ok!(window.start());

        tokio::time::sleep(Duration::from_millis(10)).await;
        counter.add(7);
        assert_eq!(counter.total(), 7);

        tokio::time::sleep(Duration::from_millis(200)).await;
        counter.add(1);
        assert_eq!(counter.total(), 8);

        // Rotation returns to the first slice at 400ms.
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(counter.total(), 1);
        assert!(counter.tracked() <= 4);

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_limiter_budget_refills_per_slice() {
        let limiter = Arc::new(RateLimiter::new(20));
        let window = RollingWindow::new(1000, 10);
        assert_ok!(window.add_metric(limiter.clone()));
        assert_ok!(window.start());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(limiter.acquire().0);
        assert!(limiter.acquire().0);
        assert!(!limiter.acquire().0);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(limiter.acquire(), (true, 1));
        assert_eq!(limiter.total(), 3);

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_join_awaits_worker_exit() {
        let window = RollingWindow::new(100, 10);
        assert_ok!(window.start());
        tokio::time::sleep(Duration::from_millis(25)).await;

        assert_ok!(window.stop());
        window.join().await;
        let after_stop = window.rotations();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(window.rotations(), after_stop);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let counter = Arc::new(Counter::new());
        let window = RollingWindow::new(100, 10);
        assert_ok!(window.add_metric(counter.clone()));

        assert_ok!(window.start());
        assert_ok!(window.stop());
        window.join().await;

        assert_ok!(window.start());
        tokio::time::sleep(Duration::from_millis(15)).await;
        assert_eq!(window.rotations(), 2);
        assert_eq!(counter.latest(), window.ring().unwrap().latest());
        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_drops_previous_slices() {
        let counter = Arc::new(Counter::new());
        let window = RollingWindow::new(100, 10);
        assert_ok!(window.add_metric(counter.clone()));
        assert_ok!(window.start());

        // One add per slice, across five slices.
        tokio::time::sleep(Duration::from_millis(1)).await;
        for _ in 0..5 {
            counter.add(10);
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(counter.total(), 50);

        assert_ok!(window.stop());
        window.join().await;
        assert_ok!(window.start());
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert_eq!(counter.total(), 0);
        assert_eq!(counter.tracked(), 1);
        assert_eq!(counter.latest(), window.ring().unwrap().latest());

        assert_ok!(window.stop());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_prunes_finished_workers() {
        let window = RollingWindow::new(100, 10);
        for _ in 0..5 {
            assert_ok!(window.start());
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert_ok!(window.stop());
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(window.exiting.lock().len() <= 1);

        window.join().await;
        assert!(window.exiting.lock().is_empty());
    }

    #[tokio::test]
    async fn test_start_rejects_zero_width_slice() {
        let window = RollingWindow::new(5, 10);
        assert!(matches!(window.start(), Err(WindowError::InvalidWindow(_))));
        assert_eq!(window.state(), WindowState::Stopped);

        let window = RollingWindow::new(1000, 0);
        assert_err!(window.start());
    }

    #[test]
    fn test_start_outside_runtime() {
        let window = RollingWindow::new(1000, 10);
        assert!(matches!(window.start(), Err(WindowError::NoRuntime)));
        assert_eq!(window.state(), WindowState::Stopped);
    }

    #[test]
    fn test_failing_init_is_not_registered() {
        let window = RollingWindow::new(1000, 10);
        assert_err!(window.add_metric(Arc::new(FailingMetric)));
        assert_eq!(window.metric_count(), 0);
    }

    #[test]
    fn test_batch_registration_is_all_or_nothing() {
        let window = RollingWindow::new(1000, 10);
        let batch = vec![
            Arc::new(Counter::new()) as Arc<dyn Metric>,
            Arc::new(RateLimiter::with_policy(5, ZeroBudgetPolicy::Error)),
        ];
        assert!(matches!(
            window.add_metrics(batch),
            Err(WindowError::ZeroBudget { .. })
        ));
        assert_eq!(window.metric_count(), 0);

        let batch = vec![
            Arc::new(Counter::new()) as Arc<dyn Metric>,
            Arc::new(RateLimiter::new(100)),
        ];
        assert_ok!(window.add_metrics(batch));
        assert_eq!(window.metric_count(), 2);
    }

    #[test]
    fn test_add_metric_initializes_limiter() {
        let limiter = Arc::new(RateLimiter::new(100));
        let window = RollingWindow::new(1000, 10);
        assert_ok!(window.add_metric(limiter.clone()));
        assert_eq!(limiter.bucket_concurrency(), 10);
    }
}
