//! Per-job polling service - drives the fetch/map/deliver/commit loop.
//!
//! One `Poller` instance runs per configured job. Each tick walks the
//! states `IDLE → FETCHING → MAPPING → DELIVERING → COMMITTING` and loops
//! back to `IDLE`; an unrecoverable error in any state fails the tick
//! without advancing the watermark, so the same range is retried on the
//! next tick (at-least-once, range-granular).
//!
//! # Single flight
//!
//! Ticks are driven by a `tokio::time::interval` with delayed missed-tick
//! behavior and executed inline in the loop: a tick that outlives its
//! interval simply delays the next one. Two ticks of the same job never
//! overlap.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{ChainError, StorageError, WatcherError, WatcherResult};
use crate::metrics::{
    record_finality_unresolved, record_range_failed, record_watermark_position, TickTimer,
};
use crate::models::{JobDefinition, Watermark};
use crate::ports::{Alert, AlertSink, ChainSource, Handler, WatermarkStore};
use crate::retry::{retry_transient, RetryPolicy};

/// Consecutive delivery failures on the same range before an alert fires.
const HANDLER_ALERT_THRESHOLD: u32 = 3;

// =============================================================================
// Configuration
// =============================================================================

/// Tuning knobs shared by all pollers (per-job values live on the job).
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Retry policy for transient fetch failures.
    pub fetch_retry: RetryPolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            fetch_retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(500),
                step: Duration::from_millis(500),
            },
        }
    }
}

// =============================================================================
// Tick Outcome
// =============================================================================

/// What a single tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No new data past the watermark; nothing was mutated.
    Idle,
    /// A range was fetched, handled, and committed.
    Processed { from: u64, to: u64, records: usize },
}

// =============================================================================
// Poller
// =============================================================================

/// Drives the fetch-checkpoint loop for one job.
///
/// # Flow per tick
///
/// 1. Read the job's watermark; `from = position + 1`
/// 2. `to = min(from + batch_size - 1, current_height(finality))`
/// 3. Fetch `[from, to]` with bounded linear-backoff retry
/// 4. Hand records to every handler, in declared order
/// 5. Commit the new watermark with compare-and-swap
///
/// Watermark advancement is strictly monotonic per job; there is no
/// ordering guarantee across jobs.
pub struct Poller {
    job: JobDefinition,
    source: Arc<dyn ChainSource>,
    handlers: Vec<Arc<dyn Handler>>,
    store: Arc<dyn WatermarkStore>,
    alerts: Arc<dyn AlertSink>,
    config: PollerConfig,
    delivery_failures: AtomicU32,
}

impl Poller {
    pub fn new(
        job: JobDefinition,
        source: Arc<dyn ChainSource>,
        handlers: Vec<Arc<dyn Handler>>,
        store: Arc<dyn WatermarkStore>,
        alerts: Arc<dyn AlertSink>,
        config: PollerConfig,
    ) -> Self {
        Self {
            job,
            source,
            handlers,
            store,
            alerts,
            config,
            delivery_failures: AtomicU32::new(0),
        }
    }

    /// Run the polling loop until shutdown.
    ///
    /// Fatal per-tick errors are logged with job, chain, and range and do
    /// not stop the loop; the watermark is untouched and the next tick
    /// retries the same range.
    #[instrument(skip_all, fields(job = %self.job.id, chain = %self.job.chain_id))]
    pub async fn run(&self, mut shutdown_rx: watch::Receiver<bool>) -> WatcherResult<()> {
        info!(
            interval_secs = self.job.poll_interval_secs,
            batch_size = self.job.batch_size,
            finality = %self.job.finality,
            "⛓️  Starting poller"
        );

        let mut interval = tokio::time::interval(self.job.poll_interval());
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        debug!("Shutdown requested");
                        return Err(WatcherError::ShutdownRequested);
                    }
                    continue;
                }
            }

            if *shutdown_rx.borrow() {
                debug!("Shutdown requested");
                return Err(WatcherError::ShutdownRequested);
            }

            match self.tick(&mut shutdown_rx).await {
                Ok(TickOutcome::Idle) => trace!("No new data"),
                Ok(TickOutcome::Processed { from, to, records }) => {
                    info!(from, to, records, "⛓️  Range committed");
                }
                Err(WatcherError::ShutdownRequested) => {
                    debug!("Tick aborted by shutdown");
                    return Err(WatcherError::ShutdownRequested);
                }
                Err(e) => {
                    record_range_failed(&self.job.id, self.job.chain_id);
                    error!(error = %e, "❌ Tick failed, watermark unchanged");
                }
            }
        }
    }

    /// Execute one tick. Public so deployments can run single-shot jobs
    /// and tests can drive the state machine directly.
    #[instrument(skip_all, fields(job = %self.job.id))]
    pub async fn tick(&self, shutdown_rx: &mut watch::Receiver<bool>) -> WatcherResult<TickOutcome> {
        // IDLE -> FETCHING: establish the range.
        let watermark = self.store.get(&self.job.id).await?;
        let expected = watermark.as_ref().map(|w| w.position);

        let height = match self.current_height(shutdown_rx).await {
            Ok(height) => height,
            Err(e) => return Err(self.escalate_fetch_failure(e, 0, 0).await),
        };

        let from = match (&watermark, self.job.start_height) {
            (Some(w), _) => w.position + 1,
            (None, Some(start)) => start,
            // First run with no configured start: begin at the tip.
            (None, None) => height,
        };
        let to = height.min(from + self.job.batch_size - 1);

        if from > to {
            trace!(from, height, "Watermark at chain head");
            return Ok(TickOutcome::Idle);
        }

        let _timer = TickTimer::new();
        debug!(from, to, height, "Fetching range");

        let records = {
            let source = self.source.clone();
            let filters = self.job.filters.clone();
            match retry_transient(&self.config.fetch_retry, shutdown_rx, move || {
                let source = source.clone();
                let filters = filters.clone();
                async move { source.fetch_range(from, to, &filters).await }
            })
            .await
            {
                Ok(records) => records,
                Err(e) => return Err(self.escalate_fetch_failure(e, from, to).await),
            }
        };

        // MAPPING + DELIVERING: every handler, in declared order. A failed
        // delivery blocks the watermark commit for the whole range.
        for handler in &self.handlers {
            if *shutdown_rx.borrow() {
                return Err(WatcherError::ShutdownRequested);
            }

            match handler.handle(&records).await {
                Ok(stats) => {
                    self.delivery_failures.store(0, Ordering::Relaxed);
                    trace!(
                        handler = handler.name(),
                        records = stats.records,
                        events = stats.events,
                        mapping_errors = stats.mapping_errors,
                        "Handler done"
                    );
                }
                Err(e) => {
                    let failures = self.delivery_failures.fetch_add(1, Ordering::Relaxed) + 1;
                    warn!(
                        handler = handler.name(),
                        from,
                        to,
                        failures,
                        error = %e,
                        "⚠️  Handler failed, range will be retried"
                    );
                    if failures >= HANDLER_ALERT_THRESHOLD {
                        self.alerts
                            .notify(Alert::HandlerFailing {
                                job_id: self.job.id.clone(),
                                chain_id: self.job.chain_id,
                                handler: handler.name().to_string(),
                                consecutive_failures: failures,
                            })
                            .await;
                    }
                    return Err(e);
                }
            }
        }

        // COMMITTING: CAS against the position read at tick start so a
        // stale writer cannot double-commit after a crash.
        let new = Watermark::new(&self.job.id, to);
        match self.store.compare_and_set(expected, &new).await {
            Ok(()) => {}
            Err(StorageError::Conflict { .. }) => {
                warn!(
                    expected = ?expected,
                    "⚠️  Watermark moved underneath us, another writer is active"
                );
                return Err(StorageError::Conflict {
                    job_id: self.job.id.clone(),
                    expected,
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        }
        record_watermark_position(&self.job.id, to);

        Ok(TickOutcome::Processed {
            from,
            to,
            records: records.len(),
        })
    }

    /// Resolve the chain height at the job's finality level, with retry.
    async fn current_height(
        &self,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> WatcherResult<u64> {
        let source = self.source.clone();
        let finality = self.job.finality;
        retry_transient(&self.config.fetch_retry, shutdown_rx, move || {
            let source = source.clone();
            async move { source.current_height(finality).await }
        })
        .await
    }

    /// Turn an exhausted fetch into a per-tick fatal error with alerting.
    async fn escalate_fetch_failure(
        &self,
        err: WatcherError,
        from: u64,
        to: u64,
    ) -> WatcherError {
        match &err {
            WatcherError::ShutdownRequested => return WatcherError::ShutdownRequested,
            WatcherError::Chain(ChainError::FinalityUnresolved { height, .. }) => {
                record_finality_unresolved(self.job.chain_id);
                self.alerts
                    .notify(Alert::FinalityUnresolved {
                        job_id: self.job.id.clone(),
                        chain_id: self.job.chain_id,
                        height: *height,
                    })
                    .await;
            }
            other => {
                self.alerts
                    .notify(Alert::RangeExhausted {
                        job_id: self.job.id.clone(),
                        chain_id: self.job.chain_id,
                        from,
                        to,
                        reason: other.to_string(),
                    })
                    .await;
            }
        }

        WatcherError::RangeFailed {
            job_id: self.job.id.clone(),
            from,
            to,
            reason: err.to_string(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use crate::error::{ChainResult, StorageResult, WatcherResult};
    use crate::models::{
        ChainId, FinalityTag, HandlerDefinition, JobFilters, MapperKind, RawChainRecord,
        SourceKind, TargetKind,
    };
    use crate::ports::{HandlerStats, LogAlertSink};

    // -------------------------------------------------------------------------
    // Mocks
    // -------------------------------------------------------------------------

    struct MockSource {
        height: Mutex<u64>,
        fetched: Mutex<Vec<(u64, u64)>>,
        transient_failures: Mutex<u32>,
    }

    impl MockSource {
        fn new(height: u64) -> Self {
            Self {
                height: Mutex::new(height),
                fetched: Mutex::new(Vec::new()),
                transient_failures: Mutex::new(0),
            }
        }

        fn fetched_ranges(&self) -> Vec<(u64, u64)> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChainSource for MockSource {
        fn chain_id(&self) -> ChainId {
            ChainId::ETHEREUM
        }

        async fn current_height(&self, _finality: FinalityTag) -> ChainResult<u64> {
            Ok(*self.height.lock().unwrap())
        }

        async fn fetch_range(
            &self,
            from: u64,
            to: u64,
            _filters: &JobFilters,
        ) -> ChainResult<Vec<RawChainRecord>> {
            {
                let mut failures = self.transient_failures.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    return Err(ChainError::Transient("rpc timeout".into()));
                }
            }
            self.fetched.lock().unwrap().push((from, to));
            Ok((from..=to)
                .map(|height| RawChainRecord {
                    chain_id: ChainId::ETHEREUM,
                    tx_hash: format!("0x{height:x}"),
                    block_height: height,
                    block_time: None,
                    index_in_block: 0,
                    payload: serde_json::json!({}),
                })
                .collect())
        }
    }

    #[derive(Default)]
    struct MockStore {
        inner: Mutex<HashMap<String, Watermark>>,
    }

    #[async_trait]
    impl WatermarkStore for MockStore {
        async fn get(&self, job_id: &str) -> StorageResult<Option<Watermark>> {
            Ok(self.inner.lock().unwrap().get(job_id).cloned())
        }

        async fn compare_and_set(
            &self,
            expected: Option<u64>,
            new: &Watermark,
        ) -> StorageResult<()> {
            let mut inner = self.inner.lock().unwrap();
            let current = inner.get(&new.job_id).map(|w| w.position);
            if current != expected {
                return Err(StorageError::Conflict {
                    job_id: new.job_id.clone(),
                    expected,
                });
            }
            inner.insert(new.job_id.clone(), new.clone());
            Ok(())
        }
    }

    struct MockHandler {
        name: &'static str,
        calls: Mutex<Vec<usize>>,
        fail_times: Mutex<u32>,
        order_log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl MockHandler {
        fn new(name: &'static str, order_log: Arc<Mutex<Vec<&'static str>>>) -> Self {
            Self {
                name,
                calls: Mutex::new(Vec::new()),
                fail_times: Mutex::new(0),
                order_log,
            }
        }

        fn failing(self, times: u32) -> Self {
            *self.fail_times.lock().unwrap() = times;
            self
        }
    }

    #[async_trait]
    impl Handler for MockHandler {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, records: &[RawChainRecord]) -> WatcherResult<HandlerStats> {
            self.order_log.lock().unwrap().push(self.name);
            self.calls.lock().unwrap().push(records.len());
            let mut fail = self.fail_times.lock().unwrap();
            if *fail > 0 {
                *fail -= 1;
                return Err(crate::error::DeliveryError::Target {
                    target: "mock".into(),
                    reason: "unavailable".into(),
                }
                .into());
            }
            Ok(HandlerStats {
                records: records.len(),
                events: records.len(),
                mapping_errors: 0,
            })
        }
    }

    fn job(batch_size: u64) -> JobDefinition {
        JobDefinition {
            id: "eth-test".into(),
            chain_id: ChainId::ETHEREUM,
            source: SourceKind::Evm {
                rpc_url: "http://localhost:8545".into(),
                finality_resolution: Default::default(),
                scan: Default::default(),
            },
            finality: FinalityTag::Finalized,
            poll_interval_secs: 1,
            batch_size,
            start_height: Some(0),
            filters: JobFilters::default(),
            handlers: vec![HandlerDefinition {
                mapper: MapperKind::EvmLog,
                target: TargetKind::Sink,
                delivery_batch_size: 10,
            }],
        }
    }

    fn poller_with(
        job: JobDefinition,
        source: Arc<MockSource>,
        store: Arc<MockStore>,
        handlers: Vec<Arc<dyn Handler>>,
    ) -> Poller {
        let config = PollerConfig {
            fetch_retry: RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                step: Duration::from_millis(1),
            },
        };
        Poller::new(job, source, handlers, store, Arc::new(LogAlertSink), config)
    }

    fn shutdown() -> watch::Receiver<bool> {
        watch::channel(false).1
    }

    // -------------------------------------------------------------------------
    // Tests
    // -------------------------------------------------------------------------

    // Test critique: la plage est bornée par la hauteur disponible,
    // pas seulement par la taille de lot
    #[tokio::test]
    async fn range_bounded_by_available_height() {
        let source = Arc::new(MockSource::new(1050));
        let store = Arc::new(MockStore::default());
        store
            .compare_and_set(None, &Watermark::new("eth-test", 1000))
            .await
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(job(100), source.clone(), store.clone(), vec![handler]);

        let outcome = poller.tick(&mut shutdown()).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                from: 1001,
                to: 1050,
                records: 50
            }
        );
        assert_eq!(source.fetched_ranges(), vec![(1001, 1050)]);
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 1050);
    }

    #[tokio::test]
    async fn idle_when_watermark_at_head() {
        let source = Arc::new(MockSource::new(1000));
        let store = Arc::new(MockStore::default());
        store
            .compare_and_set(None, &Watermark::new("eth-test", 1000))
            .await
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(job(100), source.clone(), store.clone(), vec![handler]);

        assert_eq!(poller.tick(&mut shutdown()).await.unwrap(), TickOutcome::Idle);
        assert!(source.fetched_ranges().is_empty());
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 1000);
    }

    #[tokio::test]
    async fn starts_from_configured_height_without_watermark() {
        let source = Arc::new(MockSource::new(20));
        let store = Arc::new(MockStore::default());
        let mut j = job(10);
        j.start_height = Some(5);

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(j, source.clone(), store.clone(), vec![handler]);

        let outcome = poller.tick(&mut shutdown()).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                from: 5,
                to: 14,
                records: 10
            }
        );
    }

    // Test critique: un échec de livraison bloque le commit; la plage
    // entière est rejouée au tick suivant
    #[tokio::test]
    async fn delivery_failure_blocks_commit_and_range_is_retried() {
        let source = Arc::new(MockSource::new(30));
        let store = Arc::new(MockStore::default());
        store
            .compare_and_set(None, &Watermark::new("eth-test", 10))
            .await
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log).failing(1));
        let poller = poller_with(job(100), source.clone(), store.clone(), vec![handler]);

        let err = poller.tick(&mut shutdown()).await.unwrap_err();
        assert!(matches!(err, WatcherError::Delivery(_)));
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 10);

        // Next tick retries the exact same range and commits.
        let outcome = poller.tick(&mut shutdown()).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                from: 11,
                to: 30,
                records: 20
            }
        );
        assert_eq!(source.fetched_ranges(), vec![(11, 30), (11, 30)]);
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 30);
    }

    #[tokio::test]
    async fn handlers_run_in_declared_order() {
        let source = Arc::new(MockSource::new(5));
        let store = Arc::new(MockStore::default());
        let mut j = job(10);
        j.start_height = Some(1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let first = Arc::new(MockHandler::new("first", log.clone()));
        let second = Arc::new(MockHandler::new("second", log.clone()));
        let poller = poller_with(j, source, store, vec![first, second]);

        poller.tick(&mut shutdown()).await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
    }

    #[tokio::test]
    async fn transient_fetch_failures_are_retried_within_tick() {
        let source = Arc::new(MockSource::new(10));
        *source.transient_failures.lock().unwrap() = 2;
        let store = Arc::new(MockStore::default());
        let mut j = job(10);
        j.start_height = Some(1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(j, source.clone(), store.clone(), vec![handler]);

        let outcome = poller.tick(&mut shutdown()).await.unwrap();
        assert_eq!(
            outcome,
            TickOutcome::Processed {
                from: 1,
                to: 10,
                records: 10
            }
        );
    }

    #[tokio::test]
    async fn exhausted_fetch_is_fatal_for_tick_only() {
        let source = Arc::new(MockSource::new(10));
        *source.transient_failures.lock().unwrap() = 99;
        let store = Arc::new(MockStore::default());
        let mut j = job(10);
        j.start_height = Some(1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(j, source.clone(), store.clone(), vec![handler]);

        let err = poller.tick(&mut shutdown()).await.unwrap_err();
        assert!(matches!(err, WatcherError::RangeFailed { from: 1, to: 10, .. }));
        assert!(store.get("eth-test").await.unwrap().is_none());
    }

    // Test critique: N ticks consécutifs réussis font converger le
    // watermark vers la hauteur de chaîne observée
    #[tokio::test]
    async fn watermark_converges_to_chain_height() {
        let source = Arc::new(MockSource::new(250));
        let store = Arc::new(MockStore::default());
        let mut j = job(100);
        j.start_height = Some(1);

        let log = Arc::new(Mutex::new(Vec::new()));
        let handler = Arc::new(MockHandler::new("h1", log));
        let poller = poller_with(j, source.clone(), store.clone(), vec![handler]);

        let mut rx = shutdown();
        for _ in 0..3 {
            poller.tick(&mut rx).await.unwrap();
        }
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 250);
        assert_eq!(poller.tick(&mut rx).await.unwrap(), TickOutcome::Idle);
    }

    #[tokio::test]
    async fn cas_conflict_aborts_without_overwrite() {
        let source = Arc::new(MockSource::new(30));
        let store = Arc::new(MockStore::default());
        store
            .compare_and_set(None, &Watermark::new("eth-test", 10))
            .await
            .unwrap();

        struct RacingHandler {
            store: Arc<MockStore>,
        }

        #[async_trait]
        impl Handler for RacingHandler {
            fn name(&self) -> &'static str {
                "racer"
            }

            // Simulates another writer committing while this tick is in
            // flight: the subsequent CAS must fail, not overwrite.
            async fn handle(&self, _records: &[RawChainRecord]) -> WatcherResult<HandlerStats> {
                self.store
                    .compare_and_set(Some(10), &Watermark::new("eth-test", 99))
                    .await?;
                Ok(HandlerStats::default())
            }
        }

        let handler = Arc::new(RacingHandler {
            store: store.clone(),
        });
        let poller = poller_with(job(100), source, store.clone(), vec![handler]);

        let err = poller.tick(&mut shutdown()).await.unwrap_err();
        assert!(matches!(
            err,
            WatcherError::Storage(StorageError::Conflict { .. })
        ));
        assert_eq!(store.get("eth-test").await.unwrap().unwrap().position, 99);
    }
}
