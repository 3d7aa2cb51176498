//! Search API for SearchService
//!
//! # Flow
//!
//! ```text
//! find_*(appid, type, ..., pager)
//!       │
//!       ├─→ QueryTranslator ──► EngineQuery (+ type filter)
//!       │
//!       ├─→ cluster.search(alias)  offset paging or search-after on _docid
//!       │        │
//!       │        └─→ pager.count = total, pager.last_key = last _docid
//!       │
//!       └─→ read_from_index? decode hits
//!                 │
//!                 └─→ else data store by id, decoded hit as fallback
//! ```
//!
//! Reads never fail: cluster errors and missing indices give empty results
//! (or zero counts) and a warning.

use std::collections::HashSet;

use serde_json::Value;
use tracing::{debug, warn};

use crate::cluster::{SearchHit, SearchHits, SearchRequest};
use crate::codec::DOC_ID;
use crate::metrics::{self, LatencyTimer};
use crate::object::DomainObject;
use crate::search::{BoolQuery, EngineQuery, Pager, Terms};

use super::SearchService;

/// Object type of geo-tagged address objects.
const ADDRESS_TYPE: &str = "address";
/// Object type of tag objects.
const TAG_TYPE: &str = "tag";

fn is_blank(s: &str) -> bool {
    s.trim().is_empty()
}

impl SearchService {
    // ========== Single objects ==========

    /// Get a document by id straight from the index.
    pub async fn find_by_id(&self, appid: &str, id: &str) -> Option<DomainObject> {
        if is_blank(appid) || is_blank(id) {
            return None;
        }
        let source = match self.cluster.get_document(appid.trim(), id).await {
            Ok(source) => source?,
            Err(e) if e.is_not_found() => {
                warn!(appid = %appid, "Index not created yet");
                return None;
            }
            Err(e) => {
                warn!(appid = %appid, id = %id, error = %e, "Could not get document from index");
                return None;
            }
        };
        match self.codec.decode(source) {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!(appid = %appid, id = %id, error = %e, "Could not decode document");
                None
            }
        }
    }

    pub async fn find_by_ids(&self, appid: &str, ids: &[String]) -> Vec<DomainObject> {
        if ids.is_empty() {
            return Vec::new();
        }
        let query = EngineQuery::Terms {
            field: "id".to_string(),
            values: ids.iter().map(|id| Value::from(id.as_str())).collect(),
        };
        let mut pager = Pager::new(ids.len());
        self.search_query(appid, None, query, &mut pager, "find_by_ids").await
    }

    // ========== Field queries ==========

    /// Objects whose `field` equals any of `terms`.
    pub async fn find_term_in_list(
        &self,
        appid: &str,
        object_type: Option<&str>,
        field: &str,
        terms: &[String],
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(field) || terms.is_empty() {
            return Vec::new();
        }
        let query = self.translator.terms_in_list(field, terms);
        self.search_paged(appid, object_type, query, pager, "find_term_in_list").await
    }

    pub async fn find_prefix(
        &self,
        appid: &str,
        object_type: Option<&str>,
        field: &str,
        prefix: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(field) || is_blank(prefix) {
            return Vec::new();
        }
        let query = self.translator.prefix(field, prefix);
        self.search_paged(appid, object_type, query, pager, "find_prefix").await
    }

    /// Free-form query string search.
    ///
    /// Malformed input matches everything; input touching `properties.*`
    /// in flattened mode is rewritten to nested queries.
    pub async fn find_query(
        &self,
        appid: &str,
        object_type: Option<&str>,
        query: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(query) {
            return Vec::new();
        }
        let Some(query) = self.translator.search_query(query) else {
            return Vec::new();
        };
        self.search_paged(appid, object_type, query, pager, "find_query").await
    }

    /// Query string search inside the nested `nstd` objects.
    pub async fn find_nested_query(
        &self,
        appid: &str,
        object_type: Option<&str>,
        field: &str,
        query: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(field) || is_blank(query) {
            return Vec::new();
        }
        let inner = self.translator.query_string(&format!("nstd.{field}:{query}"));
        let query = EngineQuery::nested("nstd", inner);
        self.search_paged(appid, object_type, query, pager, "find_nested_query").await
    }

    pub async fn find_wildcard(
        &self,
        appid: &str,
        object_type: Option<&str>,
        field: &str,
        wildcard: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(field) || is_blank(wildcard) {
            return Vec::new();
        }
        let query = self.translator.wildcard(field, wildcard);
        self.search_paged(appid, object_type, query, pager, "find_wildcard").await
    }

    /// Objects carrying every one of `tags`.
    pub async fn find_tagged(
        &self,
        appid: &str,
        object_type: Option<&str>,
        tags: &[String],
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(appid) {
            return Vec::new();
        }
        let Some(query) = self.translator.tagged(tags) else {
            return Vec::new();
        };
        self.search_paged(appid, object_type, query, pager, "find_tagged").await
    }

    /// Objects matching `terms`; keys may carry a range suffix (`age>=`).
    pub async fn find_terms(
        &self,
        appid: &str,
        object_type: Option<&str>,
        terms: &Terms,
        must_match_all: bool,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if terms.is_empty() {
            return Vec::new();
        }
        let Some(query) = self.translator.terms_query(terms, must_match_all) else {
            return Vec::new();
        };
        self.search_paged(appid, object_type, query, pager, "find_terms").await
    }

    /// More-like-this search over `fields`, leaving out the object `filter_key`.
    pub async fn find_similar(
        &self,
        appid: &str,
        object_type: Option<&str>,
        filter_key: Option<&str>,
        fields: &[String],
        like_text: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(like_text) {
            return Vec::new();
        }
        let query = self.translator.similar(filter_key, fields, like_text);
        self.search_paged(appid, object_type, query, pager, "find_similar").await
    }

    /// Tag objects whose tag starts with `keyword`.
    pub async fn find_tags(&self, appid: &str, keyword: &str, pager: Option<&mut Pager>) -> Vec<DomainObject> {
        if is_blank(keyword) {
            return Vec::new();
        }
        let query = self.translator.tags_prefix(keyword);
        self.search_paged(appid, Some(TAG_TYPE), query, pager, "find_tags").await
    }

    /// Objects of `object_type` whose addresses lie within `radius_km` of
    /// (`lat`, `lng`), filtered by `query`.
    ///
    /// Searching for `address` objects returns the addresses themselves.
    pub async fn find_nearby(
        &self,
        appid: &str,
        object_type: &str,
        query: &str,
        radius_km: f64,
        lat: f64,
        lng: f64,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        if is_blank(object_type) || is_blank(appid) {
            return Vec::new();
        }
        let mut own_pager = self.pager();
        let pager = pager.unwrap_or(&mut own_pager);

        let nearby = self.translator.nearby(lat, lng, radius_km);
        let addresses = self.search_raw(appid, Some(ADDRESS_TYPE), nearby, pager, "find_nearby").await;
        // the address cursor means nothing to the parent search
        pager.last_key = None;
        let Some(addresses) = addresses else {
            return Vec::new();
        };
        if object_type.trim() == ADDRESS_TYPE {
            return self.materialize(appid, addresses).await;
        }

        let parent_ids: Vec<String> = addresses
            .hits
            .iter()
            .filter_map(|hit| hit.source.get("parentid").and_then(Value::as_str).map(str::to_string))
            .collect();
        let query = if is_blank(query) { "*" } else { query };
        let parents = BoolQuery::new()
            .must(self.translator.query_string(query))
            .filter(EngineQuery::Ids(parent_ids))
            .into();
        match self.search_raw(appid, Some(object_type), parents, pager, "find_nearby").await {
            Some(hits) => self.materialize(appid, hits).await,
            None => Vec::new(),
        }
    }

    // ========== Counts ==========

    /// Documents of `appid`, optionally only of one type.
    pub async fn get_count(&self, appid: &str, object_type: Option<&str>) -> u64 {
        if is_blank(appid) {
            return 0;
        }
        let query = match object_type.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => EngineQuery::term("type", t),
            None => EngineQuery::MatchAll,
        };
        self.count(appid, &query).await
    }

    /// Documents of `appid` matching every one of `terms`.
    pub async fn get_count_terms(&self, appid: &str, object_type: Option<&str>, terms: &Terms) -> u64 {
        if is_blank(appid) || terms.is_empty() {
            return 0;
        }
        match self.translator.terms_query(terms, true) {
            Some(query) => self.count(appid, &query.with_type(object_type)).await,
            None => 0,
        }
    }

    async fn count(&self, appid: &str, query: &EngineQuery) -> u64 {
        match self.cluster.count(appid.trim(), query).await {
            Ok(count) => count,
            Err(e) => {
                warn!(appid = %appid, error = %e, "Could not count results");
                0
            }
        }
    }

    // ========== Root application shorthands ==========

    pub async fn find_by_id_root(&self, id: &str) -> Option<DomainObject> {
        self.find_by_id(&self.config.root_app_id, id).await
    }

    pub async fn find_query_root(
        &self,
        object_type: Option<&str>,
        query: &str,
        pager: Option<&mut Pager>,
    ) -> Vec<DomainObject> {
        self.find_query(&self.config.root_app_id, object_type, query, pager).await
    }

    pub async fn get_count_root(&self, object_type: Option<&str>) -> u64 {
        self.get_count(&self.config.root_app_id, object_type).await
    }

    // ========== Internals ==========

    async fn search_paged(
        &self,
        appid: &str,
        object_type: Option<&str>,
        query: EngineQuery,
        pager: Option<&mut Pager>,
        operation: &'static str,
    ) -> Vec<DomainObject> {
        let mut own_pager = self.pager();
        let pager = pager.unwrap_or(&mut own_pager);
        self.search_query(appid, object_type, query, pager, operation).await
    }

    async fn search_query(
        &self,
        appid: &str,
        object_type: Option<&str>,
        query: EngineQuery,
        pager: &mut Pager,
        operation: &'static str,
    ) -> Vec<DomainObject> {
        match self.search_raw(appid, object_type, query, pager, operation).await {
            Some(hits) => self.materialize(appid, hits).await,
            None => Vec::new(),
        }
    }

    /// Run one search page and advance `pager`. `None` on any failure.
    async fn search_raw(
        &self,
        appid: &str,
        object_type: Option<&str>,
        query: EngineQuery,
        pager: &mut Pager,
        operation: &'static str,
    ) -> Option<SearchHits> {
        if is_blank(appid) {
            return None;
        }
        let mut request = SearchRequest::new(query.with_type(object_type), pager.limit);
        request.sort = pager.sort_fields(self.config.use_nested_custom_fields);
        match pager.search_after() {
            Some(after) => request.search_after = Some(after),
            None => request.from = pager.start(self.config.max_pages),
        }

        let _timer = LatencyTimer::new(operation);
        match self.cluster.search(appid.trim(), &request).await {
            Ok(hits) => {
                metrics::record_search_query(operation, "success");
                metrics::record_search_results(hits.hits.len());
                pager.count = hits.total;
                if let Some(last) = hits.hits.last().and_then(|hit| hit.source.get(DOC_ID)) {
                    pager.last_key = Some(match last {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    });
                }
                Some(hits)
            }
            Err(e) => {
                metrics::record_search_query(operation, "error");
                if e.is_not_found() {
                    warn!(appid = %appid, "Index not found, no search results");
                } else {
                    warn!(appid = %appid, object_type = ?object_type, error = %e, "No search results");
                }
                None
            }
        }
    }

    fn decode_hit(&self, hit: &SearchHit) -> Option<DomainObject> {
        match self.codec.decode(hit.source.clone()) {
            Ok(obj) => Some(obj),
            Err(e) => {
                warn!(id = %hit.id, error = %e, "Could not decode search hit");
                None
            }
        }
    }

    /// Turn hits into objects, from the index or from the data store.
    async fn materialize(&self, appid: &str, hits: SearchHits) -> Vec<DomainObject> {
        for hit in &hits.hits {
            debug!(appid = %appid, index = %hit.index, id = %hit.id, "Search result");
        }
        if self.config.read_from_index {
            return hits.hits.iter().filter_map(|hit| self.decode_hit(hit)).collect();
        }
        if hits.hits.is_empty() {
            return Vec::new();
        }

        let ids: Vec<String> = hits.hits.iter().map(|hit| hit.id.clone()).collect();
        let mut from_store = match self.store.read_all(appid, &ids).await {
            Ok(found) => found,
            Err(e) => {
                warn!(appid = %appid, error = %e, "Data store read failed, serving index documents");
                Default::default()
            }
        };

        let mut missing: Vec<&str> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();
        let mut results = Vec::with_capacity(hits.hits.len());
        for hit in &hits.hits {
            if !seen.insert(hit.id.as_str()) {
                continue;
            }
            let obj = match from_store.remove(&hit.id) {
                Some(obj) => Some(obj),
                None => {
                    let decoded = self.decode_hit(hit);
                    if decoded.as_ref().is_some_and(|o| o.appid == appid && o.stored) {
                        missing.push(hit.id.as_str());
                    }
                    decoded
                }
            };
            results.extend(obj);
        }
        if !missing.is_empty() {
            warn!(
                appid = %appid,
                count = missing.len(),
                ids = ?missing,
                "Objects are indexed but missing from the data store"
            );
        }
        results
    }
}
