// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the search sync layer.
//!
//! # Example
//!
//! ```
//! use search_sync::SearchConfig;
//!
//! // Minimal config (uses defaults)
//! let config = SearchConfig::default();
//! assert_eq!(config.root_app_id, "app");
//! assert!(config.use_nested_custom_fields);
//! assert_eq!(config.bulk.action_limit, 1000);
//!
//! // Deserialized from JSON, unspecified fields fall back to defaults
//! let config: SearchConfig = serde_json::from_str(
//!     r#"{"cluster_url": "http://es:9200", "async_enabled": true}"#,
//! ).unwrap();
//! assert!(config.async_enabled);
//! assert_eq!(config.shards, 5);
//! ```

use serde::Deserialize;
use std::time::Duration;

/// Configuration for the search sync layer.
///
/// All fields have defaults. At minimum set `cluster_url` for a real cluster.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    /// Base URL of the Elasticsearch cluster (e.g., "http://localhost:9200")
    #[serde(default = "default_cluster_url")]
    pub cluster_url: String,

    /// Identifier of the root application
    #[serde(default = "default_root_app_id")]
    pub root_app_id: String,

    /// Store custom properties as a nested list of key/value pairs
    #[serde(default = "default_true")]
    pub use_nested_custom_fields: bool,

    /// Queue writes into the background bulk worker instead of sending inline
    #[serde(default)]
    pub async_enabled: bool,

    /// Surface synchronous bulk failures to the caller
    #[serde(default)]
    pub fail_on_indexing_errors: bool,

    /// Shard/replica counts for the root application index
    #[serde(default = "default_shards")]
    pub shards: u32,
    #[serde(default)]
    pub replicas: u32,

    /// Shard/replica counts for child application indices
    #[serde(default = "default_shards_for_child_apps")]
    pub shards_for_child_apps: u32,
    #[serde(default)]
    pub replicas_for_child_apps: u32,

    #[serde(default = "default_auto_expand_replicas")]
    pub auto_expand_replicas: String,

    /// Child apps with `sharing_index` live inside the root index behind a routed alias
    #[serde(default)]
    pub root_index_sharing_enabled: bool,

    #[serde(default = "default_batch_size")]
    pub reindex_batch_size: usize,
    #[serde(default = "default_batch_size")]
    pub unindex_batch_size: usize,

    /// Decode results straight from the index instead of re-reading the data store
    #[serde(default = "default_true")]
    pub read_from_index: bool,

    #[serde(default = "default_max_pages")]
    pub max_pages: u64,
    #[serde(default = "default_max_items_per_page")]
    pub max_items_per_page: usize,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    #[serde(default)]
    pub bulk: BulkConfig,
}

/// Bulk processor tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkConfig {
    /// Flush the async worker right after every enqueue
    #[serde(default = "default_true")]
    pub flush_immediately: bool,
    #[serde(default = "default_size_limit_mb")]
    pub size_limit_mb: usize,
    #[serde(default = "default_action_limit")]
    pub action_limit: usize,
    /// 0 dispatches batches inline on the worker task
    #[serde(default = "default_concurrent_requests")]
    pub concurrent_requests: usize,
    /// 0 disables interval flushing
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default = "default_backoff_initial_delay_ms")]
    pub backoff_initial_delay_ms: u64,
    /// 0 or less disables the backoff wrapper
    #[serde(default = "default_max_num_retries")]
    pub max_num_retries: i32,
}

fn default_true() -> bool { true }
fn default_cluster_url() -> String { "http://localhost:9200".to_string() }
fn default_root_app_id() -> String { "app".to_string() }
fn default_shards() -> u32 { 5 }
fn default_shards_for_child_apps() -> u32 { 2 }
fn default_auto_expand_replicas() -> String { "0-1".to_string() }
fn default_batch_size() -> usize { 1000 }
fn default_max_pages() -> u64 { 10_000 }
fn default_max_items_per_page() -> usize { 30 }
fn default_shutdown_timeout_ms() -> u64 { 10_000 }
fn default_request_timeout_ms() -> u64 { 30_000 }
fn default_size_limit_mb() -> usize { 5 }
fn default_action_limit() -> usize { 1000 }
fn default_concurrent_requests() -> usize { 1 }
fn default_flush_interval_ms() -> u64 { 5000 }
fn default_backoff_initial_delay_ms() -> u64 { 50 }
fn default_max_num_retries() -> i32 { 8 }

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            cluster_url: default_cluster_url(),
            root_app_id: default_root_app_id(),
            use_nested_custom_fields: true,
            async_enabled: false,
            fail_on_indexing_errors: false,
            shards: default_shards(),
            replicas: 0,
            shards_for_child_apps: default_shards_for_child_apps(),
            replicas_for_child_apps: 0,
            auto_expand_replicas: default_auto_expand_replicas(),
            root_index_sharing_enabled: false,
            reindex_batch_size: default_batch_size(),
            unindex_batch_size: default_batch_size(),
            read_from_index: true,
            max_pages: default_max_pages(),
            max_items_per_page: default_max_items_per_page(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            bulk: BulkConfig::default(),
        }
    }
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            flush_immediately: true,
            size_limit_mb: default_size_limit_mb(),
            action_limit: default_action_limit(),
            concurrent_requests: default_concurrent_requests(),
            flush_interval_ms: default_flush_interval_ms(),
            backoff_initial_delay_ms: default_backoff_initial_delay_ms(),
            max_num_retries: default_max_num_retries(),
        }
    }
}

impl SearchConfig {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl BulkConfig {
    #[must_use]
    pub fn size_limit_bytes(&self) -> usize {
        self.size_limit_mb * 1024 * 1024
    }
}
