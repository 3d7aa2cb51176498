// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search service facade.
//!
//! The [`SearchService`] ties the components together:
//! - [`IndexManager`] for index and alias lifecycle
//! - [`QueryTranslator`] for query strings and term maps
//! - [`BulkExecutor`] for writes (inline or through the background worker)
//! - [`DocumentCodec`] for the document shape
//! - a [`DataStore`] for rebuilds and store-backed result materialisation
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use search_sync::{DomainObject, InMemoryCluster, InMemoryDataStore, SearchConfig, SearchService, ServiceState};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let cluster = Arc::new(InMemoryCluster::new());
//! let store = Arc::new(InMemoryDataStore::new());
//! let service = SearchService::new(SearchConfig::default(), cluster, store);
//! assert_eq!(service.state(), ServiceState::Created);
//!
//! service.start().await;
//! service.index_root(&DomainObject::new("1", "book", "app").with_name("Dune")).await.unwrap();
//! assert_eq!(service.get_count_root(Some("book")).await, 1);
//!
//! service.shutdown().await;
//! # }
//! ```

mod lifecycle;
mod search_api;
mod types;
mod write_api;

pub use types::ServiceState;

use std::sync::Arc;

use tokio::sync::watch;

use crate::batching::{BulkExecutor, BulkStats};
use crate::cluster::SearchCluster;
use crate::codec::DocumentCodec;
use crate::config::SearchConfig;
use crate::object::App;
use crate::search::{IndexManager, Pager, QueryTranslator};
use crate::storage::DataStore;

/// Keeps application indices in sync with the data store and answers queries.
///
/// # Thread Safety
///
/// The service is `Send + Sync`; share it behind an `Arc`. Writes and reads
/// never block each other. The cluster client is created once and reused.
pub struct SearchService {
    pub(super) config: SearchConfig,
    pub(super) cluster: Arc<dyn SearchCluster>,
    pub(super) store: Arc<dyn DataStore>,
    pub(super) bulk: Arc<BulkExecutor>,
    pub(super) codec: Arc<DocumentCodec>,
    pub(super) translator: QueryTranslator,
    pub(super) indices: IndexManager,

    /// Service state (broadcast to watchers)
    pub(super) state: watch::Sender<ServiceState>,
    pub(super) state_rx: watch::Receiver<ServiceState>,
}

impl SearchService {
    /// Create a service in the `Created` state. Call [`start()`](Self::start)
    /// before writing in async mode.
    pub fn new(config: SearchConfig, cluster: Arc<dyn SearchCluster>, store: Arc<dyn DataStore>) -> Self {
        let (state_tx, state_rx) = watch::channel(ServiceState::Created);
        let bulk = Arc::new(BulkExecutor::new(cluster.clone(), &config));
        let codec = Arc::new(DocumentCodec::new(config.use_nested_custom_fields));
        let indices = IndexManager::new(cluster.clone(), bulk.clone(), codec.clone(), config.clone());
        Self {
            translator: QueryTranslator::new(config.use_nested_custom_fields),
            config,
            cluster,
            store,
            bulk,
            codec,
            indices,
            state: state_tx,
            state_rx,
        }
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.state_rx.borrow()
    }

    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ServiceState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == ServiceState::Running
    }

    pub(super) fn set_state(&self, state: ServiceState) {
        let _ = self.state.send(state);
        crate::metrics::set_service_state(&state.to_string());
    }

    #[must_use]
    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    #[must_use]
    pub fn index_manager(&self) -> &IndexManager {
        &self.indices
    }

    #[must_use]
    pub fn translator(&self) -> &QueryTranslator {
        &self.translator
    }

    /// Failure and throughput counters of the bulk executor.
    #[must_use]
    pub fn bulk_stats(&self) -> BulkStats {
        self.bulk.stats()
    }

    /// Default pager: `max_items_per_page` hits, newest first.
    #[must_use]
    pub fn pager(&self) -> Pager {
        Pager::new(self.config.max_items_per_page)
    }

    // ========== Index lifecycle shorthands ==========

    /// Reindex `app` from the data store; see [`IndexManager::rebuild_index`].
    pub async fn rebuild_index(&self, app: &App, pager: Option<&mut Pager>) -> bool {
        self.indices.rebuild_index(self.store.as_ref(), app, None, pager).await
    }

    pub async fn is_cluster_ok(&self) -> bool {
        self.indices.is_cluster_ok().await
    }

    #[must_use]
    pub fn is_valid_query_string(&self, query: &str) -> bool {
        self.translator.is_valid_query_string(query)
    }

    /// Make pending writes of `appid` visible to searches.
    pub async fn refresh(&self, appid: &str) -> bool {
        self.indices.refresh_index(appid).await
    }
}
