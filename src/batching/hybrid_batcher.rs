// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Threshold batching for bulk operations.
//!
//! A [`HybridBatcher`] accumulates operations until one of three limits is
//! reached: action count, accumulated bytes, or batch age. A zero limit
//! disables that trigger.
//!
//! # Example
//!
//! ```
//! use search_sync::batching::{BatchConfig, FlushReason, HybridBatcher, SizedItem};
//!
//! struct Op(usize);
//! impl SizedItem for Op {
//!     fn size_bytes(&self) -> usize { self.0 }
//! }
//!
//! let mut batcher = HybridBatcher::new(BatchConfig { flush_ms: 0, flush_count: 2, flush_bytes: 0 });
//! assert_eq!(batcher.add(Op(10)), None);
//! assert_eq!(batcher.add(Op(10)), Some(FlushReason::Count));
//! ```

use std::time::{Duration, Instant};

use tracing::debug;

use crate::config::BulkConfig;

/// Why a batch left the batcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushReason {
    Time,
    Count,
    Size,
    /// Explicit `flush()` from a caller
    Manual,
    Shutdown,
}

impl FlushReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushReason::Time => "time",
            FlushReason::Count => "count",
            FlushReason::Size => "size",
            FlushReason::Manual => "manual",
            FlushReason::Shutdown => "shutdown",
        }
    }
}

/// Flush thresholds. Zero disables a threshold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    pub flush_ms: u64,
    pub flush_count: usize,
    pub flush_bytes: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self::from_bulk(&BulkConfig::default())
    }
}

impl BatchConfig {
    pub fn from_bulk(bulk: &BulkConfig) -> Self {
        Self {
            flush_ms: bulk.flush_interval_ms,
            flush_count: bulk.action_limit,
            flush_bytes: bulk.size_limit_bytes(),
        }
    }

    /// Interval for the worker's timer, if time flushing is on.
    #[must_use]
    pub fn flush_interval(&self) -> Option<Duration> {
        (self.flush_ms > 0).then(|| Duration::from_millis(self.flush_ms))
    }
}

/// Items taken out of the batcher together.
#[derive(Debug)]
pub struct FlushBatch<T> {
    pub items: Vec<T>,
    pub total_bytes: usize,
    pub reason: FlushReason,
}

#[derive(Debug)]
struct Batch<T> {
    items: Vec<T>,
    total_bytes: usize,
    created_at: Instant,
}

impl<T> Batch<T> {
    fn new() -> Self {
        Self { items: Vec::new(), total_bytes: 0, created_at: Instant::now() }
    }

    fn push(&mut self, item: T, size_bytes: usize) {
        if self.items.is_empty() {
            // age counts from the first pending item
            self.created_at = Instant::now();
        }
        self.items.push(item);
        self.total_bytes += size_bytes;
    }

    fn take(&mut self, reason: FlushReason) -> FlushBatch<T> {
        let total_bytes = std::mem::take(&mut self.total_bytes);
        self.created_at = Instant::now();
        FlushBatch { items: std::mem::take(&mut self.items), total_bytes, reason }
    }
}

/// Collects items and reports when a flush threshold is hit.
#[derive(Debug)]
pub struct HybridBatcher<T> {
    config: BatchConfig,
    batch: Batch<T>,
}

impl<T: SizedItem> HybridBatcher<T> {
    pub fn new(config: BatchConfig) -> Self {
        Self { config, batch: Batch::new() }
    }

    /// Add an item; returns the count or size trigger it tripped, if any.
    pub fn add(&mut self, item: T) -> Option<FlushReason> {
        let size = item.size_bytes();
        self.batch.push(item, size);
        self.threshold_reason()
    }

    pub fn add_all(&mut self, items: impl IntoIterator<Item = T>) -> Option<FlushReason> {
        items.into_iter().fold(None, |reason, item| self.add(item).or(reason))
    }

    fn threshold_reason(&self) -> Option<FlushReason> {
        if self.config.flush_count > 0 && self.batch.items.len() >= self.config.flush_count {
            Some(FlushReason::Count)
        } else if self.config.flush_bytes > 0 && self.batch.total_bytes >= self.config.flush_bytes {
            Some(FlushReason::Size)
        } else {
            None
        }
    }

    #[must_use]
    pub fn should_flush_time(&self) -> bool {
        !self.batch.items.is_empty()
            && self
                .config
                .flush_interval()
                .is_some_and(|interval| self.batch.created_at.elapsed() >= interval)
    }

    /// Take the pending items if any threshold is met.
    pub fn take_if_ready(&mut self) -> Option<FlushBatch<T>> {
        let reason = self
            .threshold_reason()
            .or_else(|| self.should_flush_time().then_some(FlushReason::Time))?;
        Some(self.take(reason))
    }

    /// Take at most `flush_count` items when over the count threshold,
    /// leaving the rest pending.
    pub fn take_chunk(&mut self) -> Option<FlushBatch<T>> {
        let limit = self.config.flush_count;
        if limit == 0 || self.batch.items.len() <= limit {
            return self.take_if_ready();
        }
        let rest = self.batch.items.split_off(limit);
        let mut chunk = self.take(FlushReason::Count);
        chunk.total_bytes = chunk.items.iter().map(SizedItem::size_bytes).sum();
        for item in rest {
            let size = item.size_bytes();
            self.batch.push(item, size);
        }
        Some(chunk)
    }

    /// Take everything pending regardless of thresholds.
    pub fn force_flush(&mut self, reason: FlushReason) -> Option<FlushBatch<T>> {
        if self.batch.items.is_empty() {
            return None;
        }
        Some(self.take(reason))
    }

    fn take(&mut self, reason: FlushReason) -> FlushBatch<T> {
        let batch = self.batch.take(reason);
        debug!(count = batch.items.len(), bytes = batch.total_bytes, reason = reason.as_str(), "Batch taken for flush");
        batch
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.batch.items.is_empty()
    }

    /// Pending (count, bytes).
    #[must_use]
    pub fn stats(&self) -> (usize, usize) {
        (self.batch.items.len(), self.batch.total_bytes)
    }
}

/// Items that know their approximate wire size.
pub trait SizedItem {
    #[must_use]
    fn size_bytes(&self) -> usize;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    struct TestItem(usize);

    impl SizedItem for TestItem {
        fn size_bytes(&self) -> usize {
            self.0
        }
    }

    fn config(flush_ms: u64, flush_count: usize, flush_bytes: usize) -> BatchConfig {
        BatchConfig { flush_ms, flush_count, flush_bytes }
    }

    #[test]
    fn test_from_bulk_config() {
        let bulk = BulkConfig { size_limit_mb: 2, action_limit: 50, flush_interval_ms: 0, ..Default::default() };
        let cfg = BatchConfig::from_bulk(&bulk);
        assert_eq!(cfg.flush_count, 50);
        assert_eq!(cfg.flush_bytes, 2 * 1024 * 1024);
        assert_eq!(cfg.flush_interval(), None);
    }

    #[test]
    fn test_flush_on_count_threshold() {
        let mut batcher = HybridBatcher::new(config(0, 3, 0));
        assert!(batcher.add(TestItem(100)).is_none());
        assert!(batcher.add(TestItem(100)).is_none());
        assert_eq!(batcher.add(TestItem(100)), Some(FlushReason::Count));
    }

    #[test]
    fn test_flush_on_size_threshold() {
        let mut batcher = HybridBatcher::new(config(0, 0, 500));
        assert!(batcher.add(TestItem(200)).is_none());
        assert!(batcher.add(TestItem(200)).is_none());
        assert_eq!(batcher.add(TestItem(200)), Some(FlushReason::Size));
    }

    #[test]
    fn test_count_beats_size() {
        let mut batcher = HybridBatcher::new(config(0, 2, 200));
        batcher.add(TestItem(100));
        assert_eq!(batcher.add(TestItem(100)), Some(FlushReason::Count));
    }

    #[test]
    fn test_zero_limits_never_trigger() {
        let mut batcher = HybridBatcher::new(config(0, 0, 0));
        for _ in 0..100 {
            assert!(batcher.add(TestItem(1_000_000)).is_none());
        }
        assert!(batcher.take_if_ready().is_none());
        assert!(!batcher.should_flush_time());
    }

    #[test]
    fn test_flush_on_time_threshold() {
        let mut batcher = HybridBatcher::new(config(10, 0, 0));
        batcher.add(TestItem(1));
        assert!(!batcher.should_flush_time());
        sleep(Duration::from_millis(15));
        let batch = batcher.take_if_ready().unwrap();
        assert_eq!(batch.reason, FlushReason::Time);
        assert!(batcher.is_empty());
    }

    #[test]
    fn test_take_chunk_leaves_remainder() {
        let mut batcher = HybridBatcher::new(config(0, 2, 0));
        batcher.add_all((0..5).map(|_| TestItem(10)));

        let chunk = batcher.take_chunk().unwrap();
        assert_eq!(chunk.items.len(), 2);
        assert_eq!(chunk.total_bytes, 20);
        assert_eq!(batcher.stats(), (3, 30));
    }

    #[test]
    fn test_force_flush() {
        let mut batcher = HybridBatcher::new(config(0, 0, 0));
        assert!(batcher.force_flush(FlushReason::Manual).is_none());
        batcher.add(TestItem(100));
        batcher.add(TestItem(200));
        let batch = batcher.force_flush(FlushReason::Shutdown).unwrap();
        assert_eq!(batch.items.len(), 2);
        assert_eq!(batch.total_bytes, 300);
        assert_eq!(batch.reason, FlushReason::Shutdown);
        assert_eq!(batcher.stats(), (0, 0));
    }
}
