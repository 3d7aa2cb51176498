// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Search Sync
//!
//! Keeps per-application Elasticsearch indices in sync with a primary data
//! store and translates a small query language into engine queries.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SearchService                          │
//! │  • index / unindex / find_* / get_count                     │
//! │  • start / shutdown, application hooks                      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                     │
//!          ▼                    ▼                     ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ QueryTranslator │  │   IndexManager   │  │  DocumentCodec   │
//! │ • query strings │  │ • {appid}_N      │  │ • {k, v|vn}      │
//! │ • nested rewrite│  │ • alias switch   │  │ • _docid         │
//! └─────────────────┘  └──────────────────┘  └──────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       BulkExecutor                          │
//! │  • sync: one request per call                               │
//! │  • async: HybridBatcher worker, bounded concurrency, retry  │
//! │  • scroll delete-by-query                                   │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//!                 SearchCluster (HttpCluster | InMemoryCluster)
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use search_sync::{DomainObject, HttpCluster, InMemoryDataStore, SearchConfig, SearchService};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SearchConfig {
//!         cluster_url: "http://localhost:9200".into(),
//!         async_enabled: true,
//!         ..Default::default()
//!     };
//!     let cluster = Arc::new(HttpCluster::from_config(&config).expect("client"));
//!     let store = Arc::new(InMemoryDataStore::new());
//!     let service = SearchService::new(config, cluster, store);
//!
//!     service.start().await;
//!
//!     let book = DomainObject::new("42", "book", "app")
//!         .with_name("Dune")
//!         .with_property("pages", 412);
//!     service.index_root(&book).await.expect("index");
//!     service.refresh("app").await;
//!
//!     for hit in service.find_query_root(Some("book"), "properties.pages:[400 TO *]", None).await {
//!         println!("{} {:?}", hit.id, hit.name);
//!     }
//!
//!     service.shutdown().await;
//! }
//! ```
//!
//! ## Configuration
//!
//! See [`SearchConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SearchService`] facade
//! - [`search`]: Query parsing, translation, paging and index lifecycle
//! - [`batching`]: Hybrid batcher and bulk executor
//! - [`cluster`]: Cluster seam with HTTP and in-memory implementations
//! - [`storage`]: Primary data store seam
//! - [`resilience`]: Retry with exponential backoff
//! - [`codec`]: Document encoding

pub mod batching;
pub mod cluster;
pub mod codec;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod metrics;
pub mod object;
pub mod resilience;
pub mod search;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use batching::{BulkExecutor, BulkStats};
pub use cluster::{HealthStatus, HttpCluster, InMemoryCluster, SearchCluster};
pub use codec::DocumentCodec;
pub use config::{BulkConfig, SearchConfig};
pub use coordinator::{SearchService, ServiceState};
pub use error::{Result, SearchError};
pub use metrics::LatencyTimer;
pub use object::{App, DomainObject, PropertyValue};
pub use resilience::RetryConfig;
pub use search::{EngineQuery, IndexManager, Pager, QueryTranslator, Terms};
pub use storage::{DataStore, InMemoryDataStore, StoreError};
