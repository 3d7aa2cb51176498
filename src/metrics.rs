// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Metrics instrumentation for search sync.
//!
//! Uses the `metrics` crate for backend-agnostic collection; the host process
//! picks the exporter.
//!
//! # Metric Naming Convention
//! - `search_sync_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: index, delete, search, count, create, rebuild, ...
//! - `status`: success, error
//!
//! Application ids are never used as labels.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Bulk items the cluster reported as failed
pub fn record_document_failures(count: usize) {
    counter!("search_sync_document_failures_total").increment(count as u64);
}

/// Bulk requests that failed as a whole (after retries)
pub fn record_request_failure() {
    counter!("search_sync_request_failures_total").increment(1);
}

/// Operations handed to the cluster, by kind
pub fn record_bulk_operations(kind: &'static str, count: usize) {
    counter!("search_sync_bulk_operations_total", "operation" => kind).increment(count as u64);
}

pub fn record_batch_size(count: usize) {
    histogram!("search_sync_bulk_batch_size").record(count as f64);
}

pub fn record_batch_bytes(bytes: usize) {
    histogram!("search_sync_bulk_batch_bytes").record(bytes as f64);
}

/// Why the async worker flushed
pub fn record_flush(reason: &'static str) {
    counter!("search_sync_bulk_flushes_total", "reason" => reason).increment(1);
}

pub fn record_bulk_retry() {
    counter!("search_sync_bulk_retries_total").increment(1);
}

pub fn set_bulk_queue_items(count: usize) {
    gauge!("search_sync_bulk_queue_items").set(count as f64);
}

pub fn record_reindexed(count: usize) {
    counter!("search_sync_reindexed_total").increment(count as u64);
}

pub fn record_unindexed(count: usize) {
    counter!("search_sync_unindexed_total").increment(count as u64);
}

/// Record a search-side call outcome
pub fn record_search_query(operation: &'static str, status: &'static str) {
    counter!(
        "search_sync_search_queries_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

pub fn record_search_latency(operation: &'static str, duration: Duration) {
    histogram!("search_sync_search_seconds", "operation" => operation).record(duration.as_secs_f64());
}

pub fn record_search_results(count: usize) {
    histogram!("search_sync_search_results").record(count as f64);
}

/// Record index lifecycle calls (create, delete, rebuild, alias)
pub fn record_index_operation(operation: &'static str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        "search_sync_index_operations_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

pub fn set_service_state(state: &str) {
    let value = match state {
        "Created" => 0.0,
        "Starting" => 1.0,
        "Running" => 2.0,
        "ShuttingDown" => 3.0,
        "Stopped" => 4.0,
        _ => -1.0,
    };
    gauge!("search_sync_service_state").set(value);
}

/// A timing guard that records search latency on drop
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    pub fn new(operation: &'static str) -> Self {
        Self { operation, start: Instant::now() }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        record_search_latency(self.operation, self.start.elapsed());
    }
}
