//! Write API: index and unindex domain objects.
//!
//! Writes address the application alias, so routed aliases of apps sharing
//! the root index apply. Failures are logged and counted; only
//! [`SearchError::IndexingFailed`] (with `fail_on_indexing_errors`) and
//! [`SearchError::NotStarted`] reach the caller.

use tracing::{debug, info, warn};

use crate::cluster::BulkOperation;
use crate::error::{Result, SearchError};
use crate::metrics;
use crate::object::DomainObject;
use crate::search::{EngineQuery, Terms};

use super::SearchService;

/// Errors the caller has to see; everything else degrades.
fn surfaces(e: &SearchError) -> bool {
    matches!(e, SearchError::IndexingFailed(_) | SearchError::NotStarted)
}

impl SearchService {
    fn index_op(&self, appid: &str, obj: &DomainObject) -> Option<BulkOperation> {
        match self.codec.encode(obj) {
            Ok(source) => Some(BulkOperation::Index {
                index: appid.to_string(),
                id: obj.id.clone(),
                source,
            }),
            Err(e) => {
                warn!(appid = %appid, id = %obj.id, error = %e, "Failed to encode object, skipping");
                None
            }
        }
    }

    async fn submit(&self, appid: &str, ops: Vec<BulkOperation>) -> Result<()> {
        match self.bulk.execute(ops).await {
            Ok(()) => Ok(()),
            Err(e) if surfaces(&e) => {
                warn!(appid = %appid, error = %e, "Write rejected");
                Err(e)
            }
            Err(e) => {
                warn!(appid = %appid, error = %e, "Write failed");
                Ok(())
            }
        }
    }

    pub async fn index(&self, appid: &str, obj: &DomainObject) -> Result<()> {
        let appid = appid.trim();
        if appid.is_empty() || obj.id.trim().is_empty() {
            return Ok(());
        }
        let Some(op) = self.index_op(appid, obj) else {
            return Ok(());
        };
        debug!(appid = %appid, id = %obj.id, "index");
        self.submit(appid, vec![op]).await
    }

    pub async fn unindex(&self, appid: &str, obj: &DomainObject) -> Result<()> {
        let appid = appid.trim();
        if appid.is_empty() || obj.id.trim().is_empty() {
            return Ok(());
        }
        debug!(appid = %appid, id = %obj.id, "unindex");
        self.submit(appid, vec![BulkOperation::Delete { index: appid.to_string(), id: obj.id.clone() }])
            .await
    }

    pub async fn index_all(&self, appid: &str, objects: &[DomainObject]) -> Result<()> {
        let appid = appid.trim();
        if appid.is_empty() || objects.is_empty() {
            return Ok(());
        }
        let ops: Vec<BulkOperation> = objects.iter().filter_map(|obj| self.index_op(appid, obj)).collect();
        debug!(appid = %appid, count = ops.len(), "index_all");
        self.submit(appid, ops).await
    }

    pub async fn unindex_all(&self, appid: &str, objects: &[DomainObject]) -> Result<()> {
        let appid = appid.trim();
        if appid.is_empty() || objects.is_empty() {
            return Ok(());
        }
        let ops: Vec<BulkOperation> = objects
            .iter()
            .map(|obj| BulkOperation::Delete { index: appid.to_string(), id: obj.id.clone() })
            .collect();
        debug!(appid = %appid, count = ops.len(), "unindex_all");
        self.submit(appid, ops).await
    }

    /// Delete every document of `appid` matching `terms`; empty terms delete
    /// everything. Returns the number of delete operations issued.
    #[tracing::instrument(skip(self, terms), fields(term_count = terms.len()))]
    pub async fn unindex_all_by_terms(&self, appid: &str, terms: &Terms, match_all: bool) -> Result<u64> {
        let appid = appid.trim();
        if appid.is_empty() {
            return Ok(0);
        }
        let query = if terms.is_empty() {
            EngineQuery::MatchAll
        } else {
            match self.translator.terms_query(terms, match_all) {
                Some(q) => q,
                None => {
                    warn!(appid = %appid, "No usable terms, nothing unindexed");
                    return Ok(0);
                }
            }
        };
        let started = std::time::Instant::now();
        match self.bulk.scroll_delete_by_query(appid, &query).await {
            Ok(count) => {
                metrics::record_unindexed(count as usize);
                info!(count, took_ms = started.elapsed().as_millis() as u64, "Unindexed documents");
                Ok(count)
            }
            Err(e) if surfaces(&e) => Err(e),
            Err(e) => {
                warn!(appid = %appid, error = %e, "Unindex by terms failed");
                Ok(0)
            }
        }
    }

    // ========== Root application shorthands ==========

    pub async fn index_root(&self, obj: &DomainObject) -> Result<()> {
        self.index(&self.config.root_app_id, obj).await
    }

    pub async fn unindex_root(&self, obj: &DomainObject) -> Result<()> {
        self.unindex(&self.config.root_app_id, obj).await
    }

    pub async fn index_all_root(&self, objects: &[DomainObject]) -> Result<()> {
        self.index_all(&self.config.root_app_id, objects).await
    }

    pub async fn unindex_all_root(&self, objects: &[DomainObject]) -> Result<()> {
        self.unindex_all(&self.config.root_app_id, objects).await
    }

    pub async fn unindex_all_by_terms_root(&self, terms: &Terms, match_all: bool) -> Result<u64> {
        self.unindex_all_by_terms(&self.config.root_app_id, terms, match_all).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_escalations_surface() {
        assert!(surfaces(&SearchError::NotStarted));
        assert!(surfaces(&SearchError::IndexingFailed("x".into())));
        assert!(!surfaces(&SearchError::Cluster("down".into())));
        assert!(!surfaces(&SearchError::IndexNotFound("app".into())));
    }
}
