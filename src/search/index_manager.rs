//! Index Manager
//!
//! Owns the physical index / alias lifecycle of every application.
//!
//! # Naming
//!
//! ```text
//! alias "scoold"  ──►  scoold_1               (after create_index)
//! alias "scoold"  ──►  scoold_1718000000000   (after rebuild_index)
//!
//! root index sharing:
//! alias "child"   ──►  app_*   routing=child  filter: term appid=child
//! ```
//!
//! Every public operation catches cluster errors, logs them and answers
//! `false` (or the input name for lookups).

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{debug, error, info, warn};

use super::mapping::{IndexMapping, IndexSettings};
use super::pager::Pager;
use super::EngineQuery;
use crate::batching::BulkExecutor;
use crate::cluster::{AliasAction, BulkOperation, HealthStatus, SearchCluster};
use crate::codec::DocumentCodec;
use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::object::App;
use crate::storage::DataStore;

/// Generation suffix of a freshly created index.
const FIRST_GENERATION: &str = "_1";

/// Creates, rebuilds and deletes application indices.
pub struct IndexManager {
    cluster: Arc<dyn SearchCluster>,
    bulk: Arc<BulkExecutor>,
    codec: Arc<DocumentCodec>,
    config: SearchConfig,
}

impl IndexManager {
    pub fn new(
        cluster: Arc<dyn SearchCluster>,
        bulk: Arc<BulkExecutor>,
        codec: Arc<DocumentCodec>,
        config: SearchConfig,
    ) -> Self {
        Self { cluster, bulk, codec, config }
    }

    /// Mapping used for every new index.
    #[must_use]
    pub fn mapping(&self) -> IndexMapping {
        IndexMapping::default_for(self.config.use_nested_custom_fields)
    }

    fn settings(&self, shards: Option<u32>, replicas: Option<u32>) -> IndexSettings {
        IndexSettings::new(
            shards.filter(|s| *s > 0).unwrap_or(self.config.shards),
            replicas.unwrap_or(self.config.replicas),
            self.config.auto_expand_replicas.clone(),
        )
    }

    // ========== Create / delete ==========

    /// Create `{appid}_1` and alias it as `appid`.
    ///
    /// Missing or zero shard counts and missing replica counts fall back to
    /// the configured defaults. The root application gets a routed alias when
    /// root index sharing is enabled.
    pub async fn create_index(&self, appid: &str, shards: Option<u32>, replicas: Option<u32>) -> bool {
        if appid.trim().is_empty() || self.exists_index(appid).await {
            return false;
        }
        let index_name = format!("{}{FIRST_GENERATION}", appid.trim());
        let created = self.create_index_without_alias(&index_name, shards, replicas).await;
        metrics::record_index_operation("create", created);
        if created {
            let with_routing = appid == self.config.root_app_id && self.config.root_index_sharing_enabled;
            if self.add_index_alias(&index_name, appid, with_routing).await {
                info!(index = %index_name, alias = %appid, "Created index with alias");
            } else {
                info!(index = %index_name, alias = %appid, "Created index without an alias");
            }
        }
        created
    }

    /// Create a physical index with the default mapping and no alias.
    ///
    /// Blank names, names containing whitespace and existing names are refused.
    pub async fn create_index_without_alias(&self, name: &str, shards: Option<u32>, replicas: Option<u32>) -> bool {
        if name.trim().is_empty() || name.chars().any(char::is_whitespace) || self.exists_index(name).await {
            return false;
        }
        let settings = self.settings(shards, replicas);
        match self.cluster.create_index(name, &settings, &self.mapping()).await {
            Ok(()) => {
                info!(
                    index = %name,
                    shards = settings.shards,
                    replicas = settings.replicas,
                    "Created index"
                );
                true
            }
            Err(e) => {
                warn!(index = %name, error = %e, "Failed to create index");
                false
            }
        }
    }

    /// Delete the physical index behind `appid`.
    pub async fn delete_index(&self, appid: &str) -> bool {
        if appid.trim().is_empty() || !self.exists_index(appid).await {
            return false;
        }
        let index_name = self.index_name_for_alias(appid.trim()).await;
        let deleted = match self.cluster.delete_index(&index_name).await {
            Ok(()) => {
                info!(index = %index_name, "Deleted index");
                true
            }
            Err(e) => {
                warn!(index = %index_name, error = %e, "Failed to delete index");
                false
            }
        };
        metrics::record_index_operation("delete", deleted);
        deleted
    }

    /// True only when the cluster confirms the index or alias exists.
    pub async fn exists_index(&self, appid: &str) -> bool {
        let name = appid.trim();
        if name.is_empty() {
            return false;
        }
        match self.cluster.index_exists(name).await {
            Ok(exists) => exists,
            Err(e) => {
                warn!(index = %name, error = %e, "Index existence check failed");
                false
            }
        }
    }

    // ========== Rebuild ==========

    /// Reindex an application from the data store into a fresh index and
    /// switch its alias over once the whole scan is written.
    ///
    /// Applications sharing the root index are rewritten in place through
    /// their routed alias. `pager` sets the page size of the store scan and
    /// is advanced as pages are read.
    #[tracing::instrument(skip(self, store, app, pager), fields(appid = %app.id))]
    pub async fn rebuild_index(
        &self,
        store: &dyn DataStore,
        app: &App,
        destination: Option<&str>,
        pager: Option<&mut Pager>,
    ) -> bool {
        if app.id.trim().is_empty() {
            return false;
        }
        let mut own_pager = Pager::new(self.config.reindex_batch_size);
        let pager = pager.unwrap_or(&mut own_pager);
        match self.try_rebuild(store, app, destination, pager).await {
            Ok(count) => {
                info!(count, shared = app.sharing_index, "Index rebuilt");
                metrics::record_index_operation("rebuild", true);
                true
            }
            Err(e) => {
                error!(error = %e, "Index rebuild failed");
                metrics::record_index_operation("rebuild", false);
                false
            }
        }
    }

    async fn try_rebuild(
        &self,
        store: &dyn DataStore,
        app: &App,
        destination: Option<&str>,
        pager: &mut Pager,
    ) -> Result<u64> {
        let alias = app.id.trim();
        if !self.exists_index(alias).await {
            if app.sharing_index {
                self.add_index_alias_with_routing(&self.config.root_app_id, alias).await;
            } else {
                self.create_index(alias, None, None).await;
            }
        }
        let old_name = self.index_name_for_alias(alias).await;

        let new_name = if app.sharing_index {
            alias.to_string()
        } else {
            let name = destination
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map_or_else(|| new_index_name(alias, &old_name), str::to_string);
            if !self.create_index_without_alias(&name, None, None).await
                && !self.cluster.index_exists(&name).await?
            {
                return Err(SearchError::IndexNotFound(name));
            }
            name
        };

        let batch_size = self.config.reindex_batch_size.max(1);
        let mut batch: Vec<BulkOperation> = Vec::with_capacity(batch_size.min(1024));
        let mut reindexed = 0u64;
        loop {
            let page = store.read_page(alias, pager).await?;
            debug!(count = page.len(), index = %new_name, "Read page from data store");
            if page.is_empty() {
                break;
            }
            for obj in &page {
                batch.push(BulkOperation::Index {
                    index: new_name.clone(),
                    id: obj.id.clone(),
                    source: self.codec.encode(obj)?,
                });
                if batch.len() >= batch_size {
                    reindexed += batch.len() as u64;
                    self.bulk.execute(std::mem::take(&mut batch)).await?;
                }
            }
        }
        if !batch.is_empty() {
            reindexed += batch.len() as u64;
            self.bulk.execute(batch).await?;
        }
        // queued async writes must land before the alias moves
        self.bulk.flush().await;
        metrics::record_reindexed(reindexed as usize);

        if !app.sharing_index && old_name != new_name {
            if !self.switch_index_to_alias(&old_name, &new_name, alias, true).await {
                return Err(SearchError::Cluster(format!("alias switch {old_name} -> {new_name} failed")));
            }
        }
        Ok(reindexed)
    }

    // ========== Aliases ==========

    /// Move `alias` from `old_index` to `new_index` in one atomic request,
    /// optionally deleting the old index afterwards.
    pub async fn switch_index_to_alias(&self, old_index: &str, new_index: &str, alias: &str, delete_old: bool) -> bool {
        let (old_name, new_name, alias) = (old_index.trim(), new_index.trim(), alias.trim());
        if old_name.is_empty() || new_name.is_empty() || alias.is_empty() {
            return false;
        }
        info!(alias = %alias, from = %old_name, to = %new_name, delete_old, "Switching index alias");
        let actions = [AliasAction::remove(old_name, alias), AliasAction::add(new_name, alias)];
        match self.cluster.update_aliases(&actions).await {
            Ok(true) => {}
            Ok(false) => {
                warn!(alias = %alias, "Alias switch not acknowledged");
                return false;
            }
            Err(e) => {
                warn!(alias = %alias, error = %e, "Alias switch failed");
                return false;
            }
        }
        if delete_old {
            if let Err(e) = self.cluster.delete_index(old_name).await {
                warn!(index = %old_name, error = %e, "Failed to delete old index");
            }
        }
        true
    }

    /// Attach `alias` to `index_name`.
    ///
    /// With routing, both search and index routing are set to the alias and
    /// results are filtered to documents whose `appid` equals it.
    pub async fn add_index_alias(&self, index_name: &str, alias_name: &str, with_routing: bool) -> bool {
        if alias_name.trim().is_empty() || !self.exists_index(index_name).await {
            return false;
        }
        let alias = alias_name.trim();
        let index = index_name_with_wildcard(index_name.trim());
        let action = if with_routing {
            AliasAction::Add {
                index,
                alias: alias.to_string(),
                routing: Some(alias.to_string()),
                // the filter keeps the caller's exact value
                filter: Some(EngineQuery::term("appid", alias_name)),
            }
        } else {
            AliasAction::add(index, alias)
        };
        match self.cluster.update_aliases(&[action]).await {
            Ok(ack) => ack,
            Err(e) => {
                error!(index = %index_name, alias = %alias, error = %e, "Failed to add index alias");
                false
            }
        }
    }

    pub async fn add_index_alias_with_routing(&self, index_name: &str, alias_name: &str) -> bool {
        self.add_index_alias(index_name, alias_name, true).await
    }

    pub async fn remove_index_alias(&self, index_name: &str, alias_name: &str) -> bool {
        if alias_name.trim().is_empty() || !self.exists_index(index_name).await {
            return false;
        }
        let alias = alias_name.trim();
        let index = index_name_with_wildcard(index_name.trim());
        match self.cluster.update_aliases(&[AliasAction::remove(index, alias)]).await {
            Ok(ack) => ack,
            Err(e) => {
                warn!(index = %index_name, alias = %alias, error = %e, "Failed to remove index alias");
                false
            }
        }
    }

    pub async fn exists_index_alias(&self, index_name: &str, alias_name: &str) -> bool {
        if index_name.trim().is_empty() || alias_name.trim().is_empty() {
            return false;
        }
        let index = index_name_with_wildcard(index_name.trim());
        match self.cluster.alias_exists(&index, alias_name.trim()).await {
            Ok(exists) => exists,
            Err(e) => {
                error!(index = %index_name, alias = %alias_name, error = %e, "Alias existence check failed");
                false
            }
        }
    }

    /// First physical index behind `alias`, or `alias` itself.
    pub async fn index_name_for_alias(&self, alias: &str) -> String {
        if alias.trim().is_empty() {
            return alias.to_string();
        }
        match self.cluster.resolve_alias(alias).await {
            Ok(indices) => indices.into_iter().next().unwrap_or_else(|| alias.to_string()),
            Err(e) => {
                debug!(alias = %alias, error = %e, "Alias did not resolve");
                alias.to_string()
            }
        }
    }

    // ========== Health ==========

    /// Send queued writes, then make them visible to searches.
    pub async fn refresh_index(&self, appid: &str) -> bool {
        if appid.trim().is_empty() {
            return false;
        }
        self.bulk.flush().await;
        match self.cluster.refresh(appid.trim()).await {
            Ok(()) => true,
            Err(e) => {
                warn!(index = %appid, error = %e, "Index refresh failed");
                false
            }
        }
    }

    /// False when the cluster is red or unreachable.
    pub async fn is_cluster_ok(&self) -> bool {
        match self.cluster.cluster_health().await {
            Ok(HealthStatus::Red) => false,
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "Cluster health check failed");
                false
            }
        }
    }
}

/// `{prefix}_{unix millis}`, the prefix being `old_name` up to its first `_`.
#[must_use]
pub fn new_index_name(appid: &str, old_name: &str) -> String {
    let prefix = match old_name.split_once('_') {
        Some((prefix, _)) => prefix,
        None => appid,
    };
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    format!("{}_{millis}", prefix.trim())
}

/// `name_*` for a bare alias name, so every generation matches.
fn index_name_with_wildcard(name: &str) -> String {
    if name.contains('_') {
        name.to_string()
    } else {
        format!("{name}_*")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::InMemoryCluster;
    use crate::object::DomainObject;
    use crate::search::mapping::MappingFieldType;
    use crate::storage::InMemoryDataStore;

    fn manager_with(config: SearchConfig) -> (Arc<InMemoryCluster>, IndexManager) {
        let cluster = Arc::new(InMemoryCluster::new());
        let bulk = Arc::new(BulkExecutor::new(cluster.clone(), &config));
        let codec = Arc::new(DocumentCodec::new(config.use_nested_custom_fields));
        let manager = IndexManager::new(cluster.clone(), bulk, codec, config);
        (cluster, manager)
    }

    fn manager() -> (Arc<InMemoryCluster>, IndexManager) {
        manager_with(SearchConfig::default())
    }

    fn store_with(appid: &str, n: usize) -> InMemoryDataStore {
        let store = InMemoryDataStore::new();
        store.put_all((0..n).map(|i| DomainObject::new(format!("{appid}-{i:03}"), "thing", appid)));
        store
    }

    #[tokio::test]
    async fn test_create_index_aliases_first_generation() {
        let (cluster, manager) = manager();
        assert!(manager.create_index("scoold", None, None).await);
        assert!(manager.exists_index("scoold").await);
        assert_eq!(manager.index_name_for_alias("scoold").await, "scoold_1");
        assert_eq!(cluster.aliases_of("scoold_1"), vec!["scoold"]);
        assert_eq!(cluster.shard_count("scoold_1"), Some(5));

        let mapping = cluster.mapping_of("scoold_1").unwrap();
        assert_eq!(mapping.field_type("properties"), Some(MappingFieldType::Nested));
    }

    #[tokio::test]
    async fn test_create_index_refuses_invalid_or_existing() {
        let (_, manager) = manager();
        assert!(!manager.create_index("", None, None).await);
        assert!(!manager.create_index("  ", None, None).await);
        assert!(manager.create_index("app", Some(3), Some(1)).await);
        assert!(!manager.create_index("app", None, None).await);
        assert!(!manager.create_index_without_alias("has space", None, None).await);
        assert!(!manager.create_index_without_alias("app_1", None, None).await);
    }

    #[tokio::test]
    async fn test_create_index_zero_shards_uses_default() {
        let (cluster, manager) = manager();
        assert!(manager.create_index("child", Some(0), None).await);
        assert_eq!(cluster.shard_count("child_1"), Some(5));
        assert!(manager.create_index("other", Some(2), None).await);
        assert_eq!(cluster.shard_count("other_1"), Some(2));
    }

    #[tokio::test]
    async fn test_delete_index() {
        let (cluster, manager) = manager();
        assert!(!manager.delete_index("missing").await);
        assert!(!manager.delete_index(" ").await);
        manager.create_index("scoold", None, None).await;
        assert!(manager.delete_index("scoold").await);
        assert!(cluster.indices().is_empty());
        assert!(!manager.exists_index("scoold").await);
    }

    #[tokio::test]
    async fn test_exists_index_is_false_on_error() {
        let (cluster, manager) = manager();
        manager.create_index("scoold", None, None).await;
        cluster.set_unavailable(true);
        assert!(!manager.exists_index("scoold").await);
        assert!(!manager.is_cluster_ok().await);
    }

    #[tokio::test]
    async fn test_is_cluster_ok() {
        let (cluster, manager) = manager();
        assert!(manager.is_cluster_ok().await);
        cluster.set_health(HealthStatus::Yellow);
        assert!(manager.is_cluster_ok().await);
        cluster.set_health(HealthStatus::Red);
        assert!(!manager.is_cluster_ok().await);
    }

    #[tokio::test]
    async fn test_rebuild_switches_alias_and_drops_old_index() {
        let (cluster, manager) = manager_with(SearchConfig { reindex_batch_size: 4, ..Default::default() });
        manager.create_index("scoold", None, None).await;
        let store = store_with("scoold", 10);

        assert!(manager.rebuild_index(&store, &App::new("scoold"), None, None).await);

        let current = manager.index_name_for_alias("scoold").await;
        assert_ne!(current, "scoold_1");
        assert!(current.starts_with("scoold_"));
        assert_eq!(cluster.indices(), vec![current.clone()]);
        assert_eq!(cluster.doc_count(&current), 10);
        assert_eq!(cluster.bulk_batch_sizes(), vec![4, 4, 2]);
    }

    #[tokio::test]
    async fn test_rebuild_creates_missing_index_and_honours_destination() {
        let (cluster, manager) = manager();
        let store = store_with("fresh", 3);
        let mut pager = Pager::new(2);

        assert!(manager.rebuild_index(&store, &App::new("fresh"), Some("fresh_v2"), Some(&mut pager)).await);

        assert_eq!(manager.index_name_for_alias("fresh").await, "fresh_v2");
        assert_eq!(cluster.doc_count("fresh_v2"), 3);
        assert!(!cluster.indices().contains(&"fresh_1".to_string()));
        assert_eq!(pager.count, 3);
    }

    #[tokio::test]
    async fn test_rebuild_shared_app_writes_through_routed_alias() {
        let (cluster, manager) = manager();
        manager.create_index("app", None, None).await;
        let store = store_with("child", 5);

        assert!(manager.rebuild_index(&store, &App::shared("child"), None, None).await);

        assert_eq!(cluster.indices(), vec!["app_1".to_string()]);
        assert_eq!(cluster.doc_count("app_1"), 5);
        assert!(manager.exists_index_alias("app", "child").await);
        assert_eq!(cluster.count("child", &EngineQuery::MatchAll).await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_rebuild_fails_when_store_unavailable() {
        let (cluster, manager) = manager();
        manager.create_index("scoold", None, None).await;
        let store = store_with("scoold", 2);
        store.set_unavailable(true);

        assert!(!manager.rebuild_index(&store, &App::new("scoold"), None, None).await);
        // alias untouched
        assert_eq!(manager.index_name_for_alias("scoold").await, "scoold_1");
        assert_eq!(cluster.aliases_of("scoold_1"), vec!["scoold"]);
        assert!(!manager.rebuild_index(&store, &App::new(" "), None, None).await);
    }

    #[tokio::test]
    async fn test_switch_index_to_alias() {
        let (cluster, manager) = manager();
        manager.create_index("scoold", None, None).await;
        manager.create_index_without_alias("scoold_2", None, None).await;

        assert!(!manager.switch_index_to_alias("", "scoold_2", "scoold", true).await);
        assert!(manager.switch_index_to_alias("scoold_1", "scoold_2", "scoold", false).await);
        assert_eq!(cluster.aliases_of("scoold_2"), vec!["scoold"]);
        assert!(cluster.aliases_of("scoold_1").is_empty());
        assert!(cluster.indices().contains(&"scoold_1".to_string()));

        assert!(manager.switch_index_to_alias("scoold_2", "scoold_1", "scoold", true).await);
        assert_eq!(cluster.indices(), vec!["scoold_1".to_string()]);
    }

    #[tokio::test]
    async fn test_routed_alias_filters_by_appid() {
        let (cluster, manager) = manager();
        manager.create_index("app", None, None).await;
        assert!(manager.add_index_alias_with_routing("app", "child").await);
        assert!(manager.exists_index_alias("app", "child").await);
        assert!(!manager.exists_index_alias("app", "nope").await);
        assert!(!manager.exists_index_alias("", "child").await);

        let codec = DocumentCodec::new(true);
        let docs = [DomainObject::new("1", "t", "child"), DomainObject::new("2", "t", "app")];
        let ops: Vec<BulkOperation> = docs
            .iter()
            .map(|d| BulkOperation::Index { index: "app".into(), id: d.id.clone(), source: codec.encode(d).unwrap() })
            .collect();
        cluster.bulk(&ops).await.unwrap();
        assert_eq!(cluster.count("child", &EngineQuery::MatchAll).await.unwrap(), 1);
        assert_eq!(cluster.count("app", &EngineQuery::MatchAll).await.unwrap(), 2);

        assert!(manager.remove_index_alias("app", "child").await);
        assert!(!manager.exists_index_alias("app", "child").await);
        assert!(!manager.add_index_alias("missing", "child", false).await);
        assert!(!manager.remove_index_alias("app", " ").await);
    }

    #[tokio::test]
    async fn test_root_index_sharing_routes_root_alias() {
        let config = SearchConfig { root_index_sharing_enabled: true, ..Default::default() };
        let (cluster, manager) = manager_with(config);
        assert!(manager.create_index("app", None, None).await);
        let codec = DocumentCodec::new(true);
        let source = codec.encode(&DomainObject::new("x", "t", "other")).unwrap();
        cluster
            .bulk(&[BulkOperation::Index { index: "app_1".into(), id: "x".into(), source }])
            .await
            .unwrap();
        assert_eq!(cluster.count("app_1", &EngineQuery::MatchAll).await.unwrap(), 1);
        assert_eq!(cluster.count("app", &EngineQuery::MatchAll).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_index_name_for_alias_falls_back_to_input() {
        let (_, manager) = manager();
        assert_eq!(manager.index_name_for_alias("nothing").await, "nothing");
        assert_eq!(manager.index_name_for_alias("").await, "");
    }

    #[tokio::test]
    async fn test_refresh_index() {
        let (_, manager) = manager();
        manager.create_index("scoold", None, None).await;
        assert!(manager.refresh_index("scoold").await);
        assert!(!manager.refresh_index("").await);
    }

    #[test]
    fn test_new_index_name() {
        let name = new_index_name("scoold", "scoold_1");
        let (prefix, millis) = name.split_once('_').unwrap();
        assert_eq!(prefix, "scoold");
        assert!(millis.parse::<u128>().unwrap() > 0);
        assert!(new_index_name("app", "app").starts_with("app_"));
        assert!(new_index_name("app", "").starts_with("app_"));
    }

    #[test]
    fn test_index_name_with_wildcard() {
        assert_eq!(index_name_with_wildcard("app"), "app_*");
        assert_eq!(index_name_with_wildcard("app_1"), "app_1");
    }
}
