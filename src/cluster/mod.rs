// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search cluster abstraction.
//!
//! [`SearchCluster`] is the narrow set of index, alias, document and search
//! operations the sync layer needs. [`HttpCluster`] talks to Elasticsearch over
//! its REST API; [`InMemoryCluster`] is a process-local implementation for
//! tests and embedding.

mod http;
mod memory;

pub use http::HttpCluster;
pub use memory::InMemoryCluster;

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::batching::hybrid_batcher::SizedItem;
use crate::error::Result;
use crate::search::{EngineQuery, IndexMapping, IndexSettings, SortField};

/// Default scroll keep-alive.
pub const SCROLL_TTL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Green,
    Yellow,
    Red,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Green => write!(f, "green"),
            Self::Yellow => write!(f, "yellow"),
            Self::Red => write!(f, "red"),
        }
    }
}

/// One entry of an atomic alias update.
#[derive(Debug, Clone, PartialEq)]
pub enum AliasAction {
    Add {
        index: String,
        alias: String,
        /// Search and index routing value
        routing: Option<String>,
        filter: Option<EngineQuery>,
    },
    Remove {
        index: String,
        alias: String,
    },
}

impl AliasAction {
    pub fn add(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Add { index: index.into(), alias: alias.into(), routing: None, filter: None }
    }

    pub fn remove(index: impl Into<String>, alias: impl Into<String>) -> Self {
        AliasAction::Remove { index: index.into(), alias: alias.into() }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            AliasAction::Add { index, alias, routing, filter } => {
                let mut body = Map::new();
                body.insert("index".into(), json!(index));
                body.insert("alias".into(), json!(alias));
                if let Some(routing) = routing {
                    body.insert("search_routing".into(), json!(routing));
                    body.insert("index_routing".into(), json!(routing));
                }
                if let Some(filter) = filter {
                    body.insert("filter".into(), filter.to_json());
                }
                json!({"add": body})
            }
            AliasAction::Remove { index, alias } => json!({"remove": {"index": index, "alias": alias}}),
        }
    }
}

/// A single bulk action.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    Index { index: String, id: String, source: Map<String, Value> },
    Delete { index: String, id: String },
}

impl BulkOperation {
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            BulkOperation::Index { id, .. } | BulkOperation::Delete { id, .. } => id,
        }
    }

    #[must_use]
    pub fn index(&self) -> &str {
        match self {
            BulkOperation::Index { index, .. } | BulkOperation::Delete { index, .. } => index,
        }
    }

    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            BulkOperation::Index { .. } => "index",
            BulkOperation::Delete { .. } => "delete",
        }
    }

    /// NDJSON lines for the `_bulk` endpoint.
    pub fn write_ndjson(&self, out: &mut String) {
        match self {
            BulkOperation::Index { index, id, source } => {
                out.push_str(&json!({"index": {"_index": index, "_id": id}}).to_string());
                out.push('\n');
                out.push_str(&Value::Object(source.clone()).to_string());
                out.push('\n');
            }
            BulkOperation::Delete { index, id } => {
                out.push_str(&json!({"delete": {"_index": index, "_id": id}}).to_string());
                out.push('\n');
            }
        }
    }
}

impl SizedItem for BulkOperation {
    fn size_bytes(&self) -> usize {
        match self {
            // close enough to the serialized length for batching decisions
            BulkOperation::Index { index, id, source } => {
                index.len() + id.len() + Value::Object(source.clone()).to_string().len() + 48
            }
            BulkOperation::Delete { index, id } => index.len() + id.len() + 40,
        }
    }
}

/// Outcome of one bulk item.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemResult {
    pub index: String,
    pub id: String,
    pub status: u16,
    pub error: Option<String>,
}

impl BulkItemResult {
    /// Only items carrying an error failed. A delete of an absent document
    /// answers 404 `not_found` without one.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.is_rejected()
    }

    /// Rejected by a saturated cluster; worth retrying.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.status == 429
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BulkResponse {
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.items.iter().any(BulkItemResult::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &BulkItemResult> {
        self.items.iter().filter(|i| i.is_failure())
    }
}

/// A search request against an index or alias.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: EngineQuery,
    pub from: usize,
    pub size: usize,
    pub sort: Vec<SortField>,
    pub search_after: Option<Vec<Value>>,
}

impl SearchRequest {
    pub fn new(query: EngineQuery, size: usize) -> Self {
        Self { query, from: 0, size, sort: Vec::new(), search_after: None }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".into(), self.query.to_json());
        body.insert("from".into(), json!(self.from));
        body.insert("size".into(), json!(self.size));
        body.insert("track_total_hits".into(), json!(true));
        if !self.sort.is_empty() {
            body.insert("sort".into(), Value::Array(self.sort.iter().map(SortField::to_json).collect()));
        }
        if let Some(after) = &self.search_after {
            body.insert("search_after".into(), Value::Array(after.clone()));
        }
        Value::Object(body)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub index: String,
    pub id: String,
    pub source: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchHits {
    pub total: u64,
    pub hits: Vec<SearchHit>,
}

/// One page of a scroll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollPage {
    pub scroll_id: Option<String>,
    pub hits: Vec<SearchHit>,
}

#[async_trait]
pub trait SearchCluster: Send + Sync {
    async fn create_index(&self, name: &str, settings: &IndexSettings, mapping: &IndexMapping) -> Result<()>;
    async fn delete_index(&self, name: &str) -> Result<()>;
    /// True for existing indices and aliases.
    async fn index_exists(&self, name: &str) -> Result<bool>;
    /// Physical indices behind `alias` (or the index itself).
    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>>;
    /// `index` may be a `prefix_*` pattern.
    async fn alias_exists(&self, index: &str, alias: &str) -> Result<bool>;
    /// Apply all actions atomically. Returns the acknowledgement.
    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<bool>;
    async fn bulk(&self, ops: &[BulkOperation]) -> Result<BulkResponse>;
    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits>;
    async fn count(&self, index: &str, query: &EngineQuery) -> Result<u64>;
    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Map<String, Value>>>;
    async fn open_scroll(&self, index: &str, query: &EngineQuery, size: usize, ttl: Duration) -> Result<ScrollPage>;
    async fn scroll_next(&self, scroll_id: &str, ttl: Duration) -> Result<ScrollPage>;
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;
    async fn refresh(&self, index: &str) -> Result<()>;
    async fn cluster_health(&self) -> Result<HealthStatus>;
}
