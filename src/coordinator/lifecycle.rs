//! Service lifecycle: start, shutdown and application hooks.

use tracing::{info, warn};

use crate::object::App;

use super::{SearchService, ServiceState};

impl SearchService {
    /// Start the service.
    ///
    /// 1. Spawn the bulk worker (async mode only)
    /// 2. Create the root application index if it is missing
    ///
    /// A cluster that cannot be reached is logged, not fatal: operations
    /// degrade until it comes back.
    #[tracing::instrument(skip(self), fields(root = %self.config.root_app_id))]
    pub async fn start(&self) {
        if matches!(self.state(), ServiceState::Starting | ServiceState::Running) {
            return;
        }
        info!("Starting search service");
        self.set_state(ServiceState::Starting);

        self.bulk.start();

        let root = self.config.root_app_id.as_str();
        if !self.indices.exists_index(root).await {
            let created = self
                .indices
                .create_index(root, Some(self.config.shards), Some(self.config.replicas))
                .await;
            if !created {
                warn!(index = %root, "Root index could not be created");
            }
        }

        self.set_state(ServiceState::Running);
        info!(async_enabled = self.config.async_enabled, "Search service running");
    }

    /// Drain the bulk worker within `shutdown_timeout_ms`.
    ///
    /// Returns false when the worker had to be aborted.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> bool {
        info!("Shutting down search service");
        self.set_state(ServiceState::ShuttingDown);
        let drained = self.bulk.shutdown(self.config.shutdown_timeout()).await;
        if !drained {
            warn!("Bulk worker aborted before draining");
        }
        let stats = self.bulk.stats();
        info!(
            operations_sent = stats.operations_sent,
            documents_failed = stats.documents_failed,
            requests_failed = stats.requests_failed,
            "Search service stopped"
        );
        self.set_state(ServiceState::Stopped);
        drained
    }

    /// Provision the index of a new application.
    ///
    /// Apps sharing the root index only get a routed alias on it.
    pub async fn on_app_created(&self, app: &App) -> bool {
        let appid = app.id.trim();
        if appid.is_empty() {
            return false;
        }
        if app.sharing_index {
            return self
                .indices
                .add_index_alias_with_routing(&self.config.root_app_id, appid)
                .await;
        }
        let (shards, replicas) = if app.is_root(&self.config.root_app_id) {
            (self.config.shards, self.config.replicas)
        } else {
            (self.config.shards_for_child_apps, self.config.replicas_for_child_apps)
        };
        self.indices.create_index(appid, Some(shards), Some(replicas)).await
    }

    /// Remove the index of a deleted application.
    ///
    /// Apps sharing the root index lose their documents and their alias; the
    /// shared physical index stays.
    pub async fn on_app_deleted(&self, app: &App) -> bool {
        let appid = app.id.trim();
        if appid.is_empty() {
            return false;
        }
        if app.sharing_index {
            if let Err(e) = self.unindex_all_by_terms(appid, &Default::default(), true).await {
                warn!(appid = %appid, error = %e, "Failed to unindex shared app documents");
            }
            // queued deletes still address the alias
            self.bulk.flush().await;
            return self.indices.remove_index_alias(&self.config.root_app_id, appid).await;
        }
        self.indices.delete_index(appid).await
    }
}
