// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bulk write dispatch.
//!
//! # Modes
//!
//! ```text
//! sync:   execute(ops) ──► cluster.bulk(ops) ──► outcome to caller
//!
//! async:  execute(ops) ──► mpsc ──► worker ──► HybridBatcher
//!                                     │         (count | bytes | interval)
//!                                     ▼
//!                          semaphore(concurrent_requests)
//!                                     ▼
//!                          retry(cluster.bulk(batch)) ──► counters
//! ```
//!
//! Partial item failures never abort a batch: each failed item is logged and
//! counted. Items rejected with 429 are resent with the retry backoff.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::hybrid_batcher::{BatchConfig, FlushBatch, FlushReason, HybridBatcher};
use crate::cluster::{BulkOperation, BulkResponse, SearchCluster, SCROLL_TTL};
use crate::config::{BulkConfig, SearchConfig};
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::resilience::{retry, RetryConfig};
use crate::search::EngineQuery;

/// Snapshot of the failure and throughput counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStats {
    /// Items the cluster reported as failed
    pub documents_failed: u64,
    /// Requests that failed as a whole
    pub requests_failed: u64,
    pub operations_sent: u64,
}

#[derive(Debug, Default)]
struct Counters {
    documents_failed: AtomicU64,
    requests_failed: AtomicU64,
    operations_sent: AtomicU64,
}

enum Command {
    Add(Vec<BulkOperation>),
    /// Send everything pending; the ack fires once in-flight requests finish
    Flush(Option<oneshot::Sender<()>>),
    Close,
}

struct Worker {
    tx: mpsc::UnboundedSender<Command>,
    handle: JoinHandle<()>,
}

/// Sends bulk requests and accounts for their outcome.
#[derive(Clone)]
struct Dispatcher {
    cluster: Arc<dyn SearchCluster>,
    retry: Option<RetryConfig>,
    counters: Arc<Counters>,
}

impl Dispatcher {
    fn record_sent(&self, ops: &[BulkOperation]) {
        self.counters.operations_sent.fetch_add(ops.len() as u64, Ordering::Relaxed);
        let deletes = ops.iter().filter(|op| matches!(op, BulkOperation::Delete { .. })).count();
        if deletes > 0 {
            metrics::record_bulk_operations("delete", deletes);
        }
        if ops.len() > deletes {
            metrics::record_bulk_operations("index", ops.len() - deletes);
        }
    }

    fn record_request_failure(&self, ops: usize, e: &SearchError) {
        self.counters.requests_failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_request_failure();
        error!(operations = ops, error = %e, "Bulk request failed");
    }

    /// Log and count failed items; returns how many failed.
    fn record_item_failures<'a>(&self, failures: impl Iterator<Item = &'a crate::cluster::BulkItemResult>) -> usize {
        let mut failed = 0;
        for item in failures {
            failed += 1;
            warn!(
                index = %item.index,
                id = %item.id,
                status = item.status,
                error = item.error.as_deref().unwrap_or(""),
                "Bulk item failed"
            );
        }
        if failed > 0 {
            self.counters.documents_failed.fetch_add(failed as u64, Ordering::Relaxed);
            metrics::record_document_failures(failed);
        }
        failed
    }

    /// One request, no retries.
    async fn send_once(&self, ops: &[BulkOperation]) -> Result<BulkResponse> {
        self.record_sent(ops);
        match self.cluster.bulk(ops).await {
            Ok(response) => {
                self.record_item_failures(response.failures());
                Ok(response)
            }
            Err(e) => {
                self.record_request_failure(ops.len(), &e);
                Err(e)
            }
        }
    }

    /// Send with the backoff policy; rejected items are resent.
    async fn send_with_retry(&self, ops: Vec<BulkOperation>) {
        let mut pending = ops;
        let mut item_retries = 0usize;

        loop {
            // every request attempt counts its operations as sent
            let attempt = || {
                self.record_sent(&pending);
                self.cluster.bulk(&pending)
            };
            let outcome = match &self.retry {
                Some(config) => retry("bulk", config, attempt).await,
                None => attempt().await,
            };
            let response = match outcome {
                Ok(response) => response,
                Err(e) => {
                    self.record_request_failure(pending.len(), &e);
                    return;
                }
            };

            let retry_budget = self
                .retry
                .as_ref()
                .filter(|c| c.max_retries.map_or(true, |max| item_retries < max));
            let mut rejected = Vec::new();
            let mut failures = Vec::new();
            for (op, item) in pending.into_iter().zip(response.items.iter()) {
                if item.is_rejected() && retry_budget.is_some() {
                    rejected.push(op);
                } else if item.is_failure() {
                    failures.push(item);
                }
            }
            self.record_item_failures(failures.into_iter());

            let Some(config) = retry_budget.filter(|_| !rejected.is_empty()) else {
                return;
            };
            item_retries += 1;
            metrics::record_bulk_retry();
            let delay = config.delay_for(item_retries);
            debug!(rejected = rejected.len(), attempt = item_retries, delay_ms = delay.as_millis() as u64, "Resending rejected bulk items");
            sleep(delay).await;
            pending = rejected;
        }
    }
}

/// Batches and dispatches index and delete operations.
///
/// # Example
///
/// ```
/// # use std::sync::Arc;
/// # use search_sync::{BulkExecutor, SearchConfig, InMemoryCluster};
/// # use search_sync::cluster::BulkOperation;
/// # #[tokio::main] async fn main() {
/// let cluster = Arc::new(InMemoryCluster::new());
/// let executor = BulkExecutor::new(cluster.clone(), &SearchConfig::default());
///
/// executor
///     .execute(vec![BulkOperation::Delete { index: "app".into(), id: "1".into() }])
///     .await
///     .unwrap();
/// assert_eq!(executor.stats().operations_sent, 1);
/// # }
/// ```
pub struct BulkExecutor {
    cluster: Arc<dyn SearchCluster>,
    dispatcher: Dispatcher,
    bulk: BulkConfig,
    async_enabled: bool,
    fail_on_indexing_errors: bool,
    scroll_batch_size: usize,
    worker: Mutex<Option<Worker>>,
}

impl BulkExecutor {
    pub fn new(cluster: Arc<dyn SearchCluster>, config: &SearchConfig) -> Self {
        let bulk = config.bulk.clone();
        let dispatcher = Dispatcher {
            cluster: cluster.clone(),
            retry: RetryConfig::from_backoff(bulk.backoff_initial_delay_ms, bulk.max_num_retries),
            counters: Arc::new(Counters::default()),
        };
        Self {
            cluster,
            dispatcher,
            bulk,
            async_enabled: config.async_enabled,
            fail_on_indexing_errors: config.fail_on_indexing_errors,
            scroll_batch_size: config.unindex_batch_size.max(1),
            worker: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn is_async(&self) -> bool {
        self.async_enabled
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.worker.lock().is_some()
    }

    #[must_use]
    pub fn stats(&self) -> BulkStats {
        let c = &self.dispatcher.counters;
        BulkStats {
            documents_failed: c.documents_failed.load(Ordering::Relaxed),
            requests_failed: c.requests_failed.load(Ordering::Relaxed),
            operations_sent: c.operations_sent.load(Ordering::Relaxed),
        }
    }

    /// Spawn the batching worker. No-op in sync mode or when already running.
    pub fn start(&self) {
        if !self.async_enabled {
            return;
        }
        let mut worker = self.worker.lock();
        if worker.is_some() {
            return;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(run_worker(
            rx,
            self.dispatcher.clone(),
            BatchConfig::from_bulk(&self.bulk),
            self.bulk.concurrent_requests,
        ));
        info!(
            actions = self.bulk.action_limit,
            size_mb = self.bulk.size_limit_mb,
            concurrency = self.bulk.concurrent_requests,
            flush_interval_ms = self.bulk.flush_interval_ms,
            "Bulk worker started"
        );
        *worker = Some(Worker { tx, handle });
    }

    fn sender(&self) -> Option<mpsc::UnboundedSender<Command>> {
        self.worker.lock().as_ref().map(|w| w.tx.clone())
    }

    /// Submit operations. Empty input is a no-op.
    ///
    /// Async mode enqueues and returns; sync mode waits for the cluster and,
    /// with `fail_on_indexing_errors`, turns failures into
    /// [`SearchError::IndexingFailed`].
    pub async fn execute(&self, ops: Vec<BulkOperation>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        if self.async_enabled {
            let tx = self.sender().ok_or(SearchError::NotStarted)?;
            tx.send(Command::Add(ops)).map_err(|_| SearchError::NotStarted)?;
            if self.bulk.flush_immediately {
                tx.send(Command::Flush(None)).map_err(|_| SearchError::NotStarted)?;
            }
            return Ok(());
        }

        let total = ops.len();
        match self.dispatcher.send_once(&ops).await {
            Ok(response) => {
                let failed = response.failures().count();
                if failed > 0 && self.fail_on_indexing_errors {
                    return Err(SearchError::IndexingFailed(format!("{failed} of {total} operations failed")));
                }
                Ok(())
            }
            Err(e) if self.fail_on_indexing_errors => Err(SearchError::IndexingFailed(e.to_string())),
            Err(_) => Ok(()),
        }
    }

    /// Send everything pending and wait for in-flight requests.
    pub async fn flush(&self) {
        let Some(tx) = self.sender() else { return };
        let (ack, done) = oneshot::channel();
        if tx.send(Command::Flush(Some(ack))).is_ok() {
            let _ = done.await;
        }
    }

    /// Drain the worker within `timeout`, aborting it past the deadline.
    ///
    /// Returns false when the worker had to be aborted.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let Some(mut worker) = self.worker.lock().take() else {
            return true;
        };
        let _ = worker.tx.send(Command::Close);
        match tokio::time::timeout(timeout, &mut worker.handle).await {
            Ok(_) => {
                info!("Bulk worker drained");
                true
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "Bulk worker did not drain in time, aborting");
                worker.handle.abort();
                false
            }
        }
    }

    /// Delete every document matching `query`, one scroll page at a time.
    ///
    /// Returns the number of delete operations issued.
    pub async fn scroll_delete_by_query(&self, index: &str, query: &EngineQuery) -> Result<u64> {
        let mut page = self.cluster.open_scroll(index, query, self.scroll_batch_size, SCROLL_TTL).await?;
        let mut scroll_id = page.scroll_id.clone();
        let mut deleted = 0u64;

        let result = loop {
            if page.hits.is_empty() {
                break Ok(deleted);
            }
            // deletes go through the alias so routed documents are found
            let ops: Vec<BulkOperation> = page
                .hits
                .iter()
                .map(|hit| BulkOperation::Delete { index: index.to_string(), id: hit.id.clone() })
                .collect();
            deleted += ops.len() as u64;
            if let Err(e) = self.execute(ops).await {
                break Err(e);
            }
            let Some(id) = scroll_id.clone() else {
                break Ok(deleted);
            };
            page = match self.cluster.scroll_next(&id, SCROLL_TTL).await {
                Ok(next) => next,
                Err(e) => break Err(e),
            };
            if page.scroll_id.is_some() {
                scroll_id = page.scroll_id.clone();
            }
        };

        if let Some(id) = scroll_id {
            if let Err(e) = self.cluster.clear_scroll(&id).await {
                debug!(error = %e, "Failed to clear scroll");
            }
        }
        result
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Runs batches inline when `concurrent_requests` is 0, else spawns up to that many.
struct Pool {
    semaphore: Arc<Semaphore>,
    permits: u32,
    inline: bool,
}

impl Pool {
    fn new(concurrent_requests: usize) -> Self {
        let permits = concurrent_requests.clamp(1, 1024) as u32;
        Self {
            semaphore: Arc::new(Semaphore::new(permits as usize)),
            permits,
            inline: concurrent_requests == 0,
        }
    }

    async fn dispatch(&self, dispatcher: &Dispatcher, batch: FlushBatch<BulkOperation>) {
        metrics::record_flush(batch.reason.as_str());
        metrics::record_batch_size(batch.items.len());
        metrics::record_batch_bytes(batch.total_bytes);
        debug!(count = batch.items.len(), bytes = batch.total_bytes, reason = batch.reason.as_str(), "Dispatching bulk batch");

        if self.inline {
            dispatcher.send_with_retry(batch.items).await;
            return;
        }
        let Ok(permit) = self.semaphore.clone().acquire_owned().await else {
            return;
        };
        let dispatcher = dispatcher.clone();
        tokio::spawn(async move {
            dispatcher.send_with_retry(batch.items).await;
            drop(permit);
        });
    }

    /// Wait until no request is in flight.
    async fn wait_idle(&self) {
        let _ = self.semaphore.acquire_many(self.permits).await;
    }
}

async fn drain(
    batcher: &mut HybridBatcher<BulkOperation>,
    pool: &Pool,
    dispatcher: &Dispatcher,
    reason: FlushReason,
) {
    while let Some(batch) = batcher.take_chunk() {
        pool.dispatch(dispatcher, batch).await;
    }
    if let Some(batch) = batcher.force_flush(reason) {
        pool.dispatch(dispatcher, batch).await;
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Command>,
    dispatcher: Dispatcher,
    config: BatchConfig,
    concurrent_requests: usize,
) {
    let mut batcher = HybridBatcher::new(config.clone());
    let pool = Pool::new(concurrent_requests);
    let mut ticker = config.flush_interval().map(|period| {
        let mut t = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        t.set_missed_tick_behavior(MissedTickBehavior::Delay);
        t
    });

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(Command::Add(ops)) => {
                    batcher.add_all(ops);
                    while let Some(batch) = batcher.take_chunk() {
                        pool.dispatch(&dispatcher, batch).await;
                    }
                    metrics::set_bulk_queue_items(batcher.stats().0);
                }
                Some(Command::Flush(ack)) => {
                    drain(&mut batcher, &pool, &dispatcher, FlushReason::Manual).await;
                    if let Some(ack) = ack {
                        pool.wait_idle().await;
                        let _ = ack.send(());
                    }
                    metrics::set_bulk_queue_items(0);
                }
                Some(Command::Close) | None => {
                    drain(&mut batcher, &pool, &dispatcher, FlushReason::Shutdown).await;
                    pool.wait_idle().await;
                    metrics::set_bulk_queue_items(0);
                    break;
                }
            },
            _ = tick(&mut ticker) => {
                if let Some(batch) = batcher.take_if_ready() {
                    pool.dispatch(&dispatcher, batch).await;
                }
            }
        }
    }
    debug!("Bulk worker stopped");
}
