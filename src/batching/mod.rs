//! Write batching: threshold batcher and the bulk executor built on it.

pub mod bulk_executor;
pub mod hybrid_batcher;

pub use bulk_executor::{BulkExecutor, BulkStats};
pub use hybrid_batcher::{BatchConfig, FlushBatch, FlushReason, HybridBatcher, SizedItem};
