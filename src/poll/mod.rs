//! Interval-driven background polling.
//!
//! A poll worker owns its fetcher and its dispatch queue and runs on its
//! own tokio task: tick, fetch, normalize, publish. Fetches are awaited
//! inline on the worker task and ticks use [`MissedTickBehavior::Skip`],
//! so attempts never overlap and a slow device never builds a backlog.
//! A failed attempt records its error in the worker status and leaves
//! previously published data untouched; the next tick simply retries.
//!
//! [`PollSupervisor`] manages the two device feeds (alerts, telemetry) as
//! independent, fault-isolated workers.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatch::{DispatchReceiver, DispatchSender, OverflowPolicy, dispatch_queue};
use crate::error::FetchError;
use crate::types::{Alert, FeedKind, TelemetryRecord};

/// A source of raw feed documents.
///
/// Implementations wrap whatever transport reaches the device; the worker
/// only sees documents and errors.
#[async_trait]
pub trait Fetch: Send + 'static {
    /// Raw wire document type (JSON bytes, XML bytes, ...).
    type Wire: Send;

    /// Fetch the current batch of documents from the device.
    async fn fetch(&mut self) -> Result<Vec<Self::Wire>, FetchError>;
}

/// Per-worker configuration.
#[derive(Debug, Clone)]
pub struct PollConfig {
    pub feed: FeedKind,
    /// Tick interval between fetch attempts.
    pub interval: Duration,
    /// Bound on a single fetch attempt.
    pub fetch_timeout: Duration,
}

impl PollConfig {
    pub fn new(feed: FeedKind, interval: Duration) -> Self {
        Self { feed, interval, fetch_timeout: Duration::from_secs(10) }
    }

    #[must_use]
    pub fn with_fetch_timeout(mut self, fetch_timeout: Duration) -> Self {
        self.fetch_timeout = fetch_timeout;
        self
    }
}

/// Live status of a poll worker, published through a watch channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollStatus {
    /// Total fetch attempts, successful or not.
    pub attempts: u64,
    /// Total failed attempts.
    pub failures: u64,
    /// When the last successful attempt completed.
    pub last_success: Option<DateTime<Utc>>,
    /// Error from the most recent failed attempt; cleared on success.
    pub last_error: Option<String>,
}

/// Handle to a running poll worker. Dropping it cancels the worker.
pub struct PollHandle<R> {
    records: DispatchReceiver<Vec<R>>,
    status: watch::Receiver<PollStatus>,
    cancel: CancellationToken,
}

impl<R> PollHandle<R> {
    /// Queue of normalized record batches, one entry per successful attempt.
    pub fn records(&self) -> &DispatchReceiver<Vec<R>> {
        &self.records
    }

    /// Snapshot of the worker's current status.
    pub fn status(&self) -> PollStatus {
        self.status.borrow().clone()
    }

    /// Watch receiver for status changes.
    pub fn status_changes(&self) -> watch::Receiver<PollStatus> {
        self.status.clone()
    }

    /// Request cooperative shutdown. An in-flight fetch finishes (or times
    /// out) and its result is still recorded before the worker exits.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Completes once cancellation has been requested.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }
}

impl<R> Drop for PollHandle<R> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Factory for poll worker tasks.
pub struct PollWorker;

impl PollWorker {
    /// Spawn a worker that fetches on every tick and publishes normalized
    /// batches. `normalize` converts one wire document into records; its
    /// failure fails the whole attempt (partial batches are never
    /// published).
    pub fn spawn<F, R, N>(config: PollConfig, fetcher: F, normalize: N) -> PollHandle<R>
    where
        F: Fetch,
        R: Send + 'static,
        N: Fn(F::Wire) -> Result<Vec<R>, FetchError> + Send + 'static,
    {
        let queue_name = match config.feed {
            FeedKind::Alerts => "alerts",
            FeedKind::Telemetry => "telemetry",
        };
        // Unbounded: record history must not be silently lost.
        let (records_tx, records_rx) = dispatch_queue(queue_name, OverflowPolicy::Unbounded);
        let (status_tx, status_rx) = watch::channel(PollStatus::default());
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            worker_task(config, fetcher, normalize, records_tx, status_tx, task_cancel).await;
        });

        PollHandle { records: records_rx, status: status_rx, cancel }
    }
}

async fn worker_task<F, R, N>(
    config: PollConfig,
    mut fetcher: F,
    normalize: N,
    records: DispatchSender<Vec<R>>,
    status: watch::Sender<PollStatus>,
    cancel: CancellationToken,
) where
    F: Fetch,
    R: Send + 'static,
    N: Fn(F::Wire) -> Result<Vec<R>, FetchError>,
{
    info!(feed = %config.feed, interval = ?config.interval, "poll worker started");
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // The fetch is deliberately not raced against cancellation: a
        // cancel requested mid-attempt lets the attempt finish (bounded by
        // fetch_timeout) and its outcome is still recorded below.
        let outcome = match tokio::time::timeout(config.fetch_timeout, fetcher.fetch()).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout { duration: config.fetch_timeout }),
        }
        .and_then(|documents| {
            let mut batch = Vec::new();
            for doc in documents {
                batch.extend(normalize(doc)?);
            }
            Ok(batch)
        });

        match outcome {
            Ok(batch) => {
                status.send_modify(|s| {
                    s.attempts += 1;
                    s.last_success = Some(Utc::now());
                    s.last_error = None;
                });
                debug!(feed = %config.feed, records = batch.len(), "poll attempt succeeded");
                records.send(batch);
            }
            Err(e) => {
                // Prior data stays in place; the next tick retries.
                status.send_modify(|s| {
                    s.attempts += 1;
                    s.failures += 1;
                    s.last_error = Some(e.to_string());
                });
                warn!(
                    feed = %config.feed,
                    error = %e,
                    retryable = e.is_retryable(),
                    "poll attempt failed"
                );
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    info!(feed = %config.feed, "poll worker ended");
}

/// Owns the two device feeds. Starting a feed that is already running
/// cancels its predecessor first; the feeds never share state, so one
/// failing endpoint cannot disturb the other.
#[derive(Default)]
pub struct PollSupervisor {
    alerts: Option<PollHandle<Alert>>,
    telemetry: Option<PollHandle<TelemetryRecord>>,
}

impl PollSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or restart) the alert feed.
    pub fn start_alerts<F, N>(
        &mut self,
        mut config: PollConfig,
        fetcher: F,
        normalize: N,
    ) -> &PollHandle<Alert>
    where
        F: Fetch,
        N: Fn(F::Wire) -> Result<Vec<Alert>, FetchError> + Send + 'static,
    {
        config.feed = FeedKind::Alerts;
        self.cancel(FeedKind::Alerts);
        self.alerts.insert(PollWorker::spawn(config, fetcher, normalize))
    }

    /// Start (or restart) the telemetry feed.
    pub fn start_telemetry<F, N>(
        &mut self,
        mut config: PollConfig,
        fetcher: F,
        normalize: N,
    ) -> &PollHandle<TelemetryRecord>
    where
        F: Fetch,
        N: Fn(F::Wire) -> Result<Vec<TelemetryRecord>, FetchError> + Send + 'static,
    {
        config.feed = FeedKind::Telemetry;
        self.cancel(FeedKind::Telemetry);
        self.telemetry.insert(PollWorker::spawn(config, fetcher, normalize))
    }

    /// Handle to the running alert feed, if any.
    pub fn alerts(&self) -> Option<&PollHandle<Alert>> {
        self.alerts.as_ref()
    }

    /// Handle to the running telemetry feed, if any.
    pub fn telemetry(&self) -> Option<&PollHandle<TelemetryRecord>> {
        self.telemetry.as_ref()
    }

    /// Cancel one feed. No-op when it is not running.
    pub fn cancel(&mut self, feed: FeedKind) {
        let handle_cancel = match feed {
            FeedKind::Alerts => self.alerts.take().map(|h| h.cancel.clone()),
            FeedKind::Telemetry => self.telemetry.take().map(|h| h.cancel.clone()),
        };
        if let Some(cancel) = handle_cancel {
            debug!(%feed, "cancelling poll feed");
            cancel.cancel();
        }
    }

    /// Cancel both feeds.
    pub fn cancel_all(&mut self) {
        self.cancel(FeedKind::Alerts);
        self.cancel(FeedKind::Telemetry);
    }

    /// Status of one feed, if running.
    pub fn status(&self, feed: FeedKind) -> Option<PollStatus> {
        match feed {
            FeedKind::Alerts => self.alerts.as_ref().map(|h| h.status()),
            FeedKind::Telemetry => self.telemetry.as_ref().map(|h| h.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use crate::types::WireFormat;

    struct FailingFetcher {
        attempts: Arc<AtomicU64>,
        in_flight: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Fetch for FailingFetcher {
        type Wire = Vec<u8>;

        async fn fetch(&mut self) -> Result<Vec<Vec<u8>>, FetchError> {
            assert!(
                !self.in_flight.swap(true, Ordering::SeqCst),
                "fetch attempts must never overlap"
            );
            self.attempts.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(5)).await;
            self.in_flight.store(false, Ordering::SeqCst);
            Err(FetchError::network("device unreachable"))
        }
    }

    struct SlowSucceedingFetcher {
        completed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Fetch for SlowSucceedingFetcher {
        type Wire = u32;

        async fn fetch(&mut self) -> Result<Vec<u32>, FetchError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            self.completed.store(true, Ordering::SeqCst);
            Ok(vec![1, 2, 3])
        }
    }

    fn record(id: u32) -> TelemetryRecord {
        TelemetryRecord {
            id: id.to_string(),
            metric: "test.metric".into(),
            value: id.to_string(),
            timestamp: Utc::now(),
            source: WireFormat::Cdm,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failing_worker_attempts_once_per_interval_without_overlap() {
        let _ = tracing_subscriber::fmt::try_init();
        let attempts = Arc::new(AtomicU64::new(0));
        let fetcher = FailingFetcher {
            attempts: Arc::clone(&attempts),
            in_flight: Arc::new(AtomicBool::new(false)),
        };

        let handle = PollWorker::spawn(
            PollConfig::new(FeedKind::Telemetry, Duration::from_millis(100)),
            fetcher,
            |_doc: Vec<u8>| Ok(vec![record(0)]),
        );

        // First tick fires immediately, then one per interval.
        tokio::time::sleep(Duration::from_millis(450)).await;
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let observed = attempts.load(Ordering::SeqCst);
        assert!(
            (4..=6).contains(&observed),
            "expected one attempt per interval, got {observed}"
        );
        let status = handle.status();
        assert_eq!(status.attempts, status.failures);
        assert!(status.last_success.is_none());
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("unreachable")));
        // Failed attempts never publish.
        assert!(handle.records().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_mid_fetch_lets_the_attempt_finish() {
        let _ = tracing_subscriber::fmt::try_init();
        let completed = Arc::new(AtomicBool::new(false));
        let handle = PollWorker::spawn(
            PollConfig::new(FeedKind::Telemetry, Duration::from_secs(60)),
            SlowSucceedingFetcher { completed: Arc::clone(&completed) },
            |n: u32| Ok(vec![record(n)]),
        );

        // Let the first attempt start, then cancel while it sleeps.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!completed.load(Ordering::SeqCst), "fetch should still be in flight");
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(completed.load(Ordering::SeqCst), "in-flight fetch must run to completion");
        let status = handle.status();
        assert_eq!(status.attempts, 1);
        assert!(status.last_success.is_some(), "the finished attempt is still recorded");
        let batches = handle.records().drain();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_fetch_times_out_and_is_recorded_as_failure() {
        struct NeverFetcher;
        #[async_trait]
        impl Fetch for NeverFetcher {
            type Wire = u32;
            async fn fetch(&mut self) -> Result<Vec<u32>, FetchError> {
                std::future::pending().await
            }
        }

        let handle = PollWorker::spawn(
            PollConfig::new(FeedKind::Alerts, Duration::from_secs(5))
                .with_fetch_timeout(Duration::from_millis(100)),
            NeverFetcher,
            |_n: u32| Ok(Vec::<Alert>::new()),
        );

        tokio::time::sleep(Duration::from_millis(300)).await;
        let status = handle.status();
        assert!(status.failures >= 1);
        assert!(status.last_error.as_deref().is_some_and(|e| e.contains("timed out")));
    }

    #[tokio::test(start_paused = true)]
    async fn feeds_are_fault_isolated() {
        struct OkFetcher;
        #[async_trait]
        impl Fetch for OkFetcher {
            type Wire = u32;
            async fn fetch(&mut self) -> Result<Vec<u32>, FetchError> {
                Ok(vec![7])
            }
        }

        let mut supervisor = PollSupervisor::new();
        supervisor.start_alerts(
            PollConfig::new(FeedKind::Alerts, Duration::from_millis(100)),
            FailingFetcher {
                attempts: Arc::new(AtomicU64::new(0)),
                in_flight: Arc::new(AtomicBool::new(false)),
            },
            |_doc: Vec<u8>| Ok(Vec::new()),
        );
        supervisor.start_telemetry(
            PollConfig::new(FeedKind::Telemetry, Duration::from_millis(100)),
            OkFetcher,
            |n: u32| Ok(vec![record(n)]),
        );

        tokio::time::sleep(Duration::from_millis(350)).await;

        let alerts = supervisor.status(FeedKind::Alerts).expect("alert feed running");
        let telemetry = supervisor.status(FeedKind::Telemetry).expect("telemetry feed running");
        assert!(alerts.failures >= 3, "alert feed keeps failing: {alerts:?}");
        assert!(telemetry.failures == 0, "telemetry feed unaffected: {telemetry:?}");
        assert!(telemetry.last_success.is_some());
        assert!(
            !supervisor.telemetry().expect("handle").records().is_empty(),
            "telemetry keeps publishing while alerts fail"
        );

        supervisor.cancel_all();
        assert!(supervisor.status(FeedKind::Alerts).is_none());
        assert!(supervisor.status(FeedKind::Telemetry).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn restarting_a_feed_cancels_its_predecessor() {
        let first_attempts = Arc::new(AtomicU64::new(0));
        let mut supervisor = PollSupervisor::new();
        supervisor.start_alerts(
            PollConfig::new(FeedKind::Alerts, Duration::from_millis(50)),
            FailingFetcher {
                attempts: Arc::clone(&first_attempts),
                in_flight: Arc::new(AtomicBool::new(false)),
            },
            |_doc: Vec<u8>| Ok(Vec::new()),
        );
        tokio::time::sleep(Duration::from_millis(120)).await;
        let before = first_attempts.load(Ordering::SeqCst);
        assert!(before >= 1);

        supervisor.start_alerts(
            PollConfig::new(FeedKind::Alerts, Duration::from_millis(50)),
            FailingFetcher {
                attempts: Arc::new(AtomicU64::new(0)),
                in_flight: Arc::new(AtomicBool::new(false)),
            },
            |_doc: Vec<u8>| Ok(Vec::new()),
        );
        tokio::time::sleep(Duration::from_millis(300)).await;
        let after = first_attempts.load(Ordering::SeqCst);
        // The first fetcher may have had one attempt in flight at
        // replacement time, nothing more.
        assert!(after <= before + 1, "replaced worker kept polling: {before} -> {after}");
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_failure_clears_the_error() {
        struct FlakyFetcher {
            calls: u32,
        }
        #[async_trait]
        impl Fetch for FlakyFetcher {
            type Wire = u32;
            async fn fetch(&mut self) -> Result<Vec<u32>, FetchError> {
                self.calls += 1;
                if self.calls == 1 {
                    Err(FetchError::network("first attempt fails"))
                } else {
                    Ok(vec![self.calls])
                }
            }
        }

        let handle = PollWorker::spawn(
            PollConfig::new(FeedKind::Telemetry, Duration::from_millis(100)),
            FlakyFetcher { calls: 0 },
            |n: u32| Ok(vec![record(n)]),
        );

        tokio::time::sleep(Duration::from_millis(250)).await;
        let status = handle.status();
        assert!(status.attempts >= 2);
        assert_eq!(status.failures, 1);
        assert!(status.last_error.is_none(), "success clears last_error");
        assert!(status.last_success.is_some());
    }
}
