//! Process-local search cluster.
//!
//! Indices live in a [`DashMap`], aliases behind a single lock so alias updates
//! apply atomically. Queries are evaluated directly against the stored JSON
//! sources with simplified analysis: lowercase alphanumeric tokens, exact
//! keyword terms, Levenshtein fuzziness.
//!
//! Fault injection hooks let tests fail whole bulk requests, reject individual
//! bulk items with a status, or report the cluster as unhealthy.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};

use super::{
    AliasAction, BulkItemResult, BulkOperation, BulkResponse, HealthStatus, ScrollPage,
    SearchCluster, SearchHit, SearchHits, SearchRequest,
};
use crate::codec::DOC_ID;
use crate::error::{Result, SearchError};
use crate::search::parser::parse_query;
use crate::search::query_builder::{Occur, QueryNode};
use crate::search::{
    BoolQuery, EngineQuery, IndexMapping, IndexSettings, MatchOperator, RangeBound, SortField,
    SortOrder,
};

type Source = Map<String, Value>;

#[derive(Debug, Clone)]
struct AliasEntry {
    index: String,
    filter: Option<EngineQuery>,
}

#[derive(Debug, Default)]
struct MemIndex {
    settings: Option<IndexSettings>,
    mapping: Option<IndexMapping>,
    docs: BTreeMap<String, Source>,
}

#[derive(Debug)]
struct Scroll {
    hits: Vec<SearchHit>,
    pos: usize,
    size: usize,
}

/// In-memory [`SearchCluster`] for tests and embedding.
#[derive(Debug)]
pub struct InMemoryCluster {
    indices: DashMap<String, MemIndex>,
    aliases: RwLock<HashMap<String, Vec<AliasEntry>>>,
    scrolls: DashMap<String, Scroll>,
    next_scroll: AtomicU64,
    health: RwLock<HealthStatus>,
    unavailable: AtomicBool,
    failing_bulk_requests: AtomicUsize,
    item_rejections: Mutex<Vec<u16>>,
    bulk_requests: AtomicU64,
    batch_sizes: Mutex<Vec<usize>>,
}

impl Default for InMemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryCluster {
    pub fn new() -> Self {
        Self {
            indices: DashMap::new(),
            aliases: RwLock::new(HashMap::new()),
            scrolls: DashMap::new(),
            next_scroll: AtomicU64::new(1),
            health: RwLock::new(HealthStatus::Green),
            unavailable: AtomicBool::new(false),
            failing_bulk_requests: AtomicUsize::new(0),
            item_rejections: Mutex::new(Vec::new()),
            bulk_requests: AtomicU64::new(0),
            batch_sizes: Mutex::new(Vec::new()),
        }
    }

    // ========== Fault injection ==========

    /// Fail the next `n` bulk requests outright.
    pub fn fail_bulk_requests(&self, n: usize) {
        self.failing_bulk_requests.store(n, AtomicOrdering::SeqCst);
    }

    /// Answer the next bulk items with these statuses, one per item.
    pub fn reject_items(&self, statuses: impl IntoIterator<Item = u16>) {
        self.item_rejections.lock().extend(statuses);
    }

    pub fn set_health(&self, status: HealthStatus) {
        *self.health.write() = status;
    }

    /// Make every call fail as if the cluster were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, AtomicOrdering::SeqCst);
    }

    // ========== Inspection ==========

    #[must_use]
    pub fn bulk_request_count(&self) -> u64 {
        self.bulk_requests.load(AtomicOrdering::Relaxed)
    }

    /// Number of operations in each bulk request received so far.
    #[must_use]
    pub fn bulk_batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().clone()
    }

    /// Physical index names, sorted.
    #[must_use]
    pub fn indices(&self) -> Vec<String> {
        let mut names: Vec<String> = self.indices.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Aliases pointing at `index`, sorted.
    #[must_use]
    pub fn aliases_of(&self, index: &str) -> Vec<String> {
        let mut names: Vec<String> = self
            .aliases
            .read()
            .iter()
            .filter(|(_, entries)| entries.iter().any(|e| e.index == index))
            .map(|(alias, _)| alias.clone())
            .collect();
        names.sort();
        names
    }

    /// Documents stored in a physical index.
    #[must_use]
    pub fn doc_count(&self, index: &str) -> usize {
        self.indices.get(index).map_or(0, |i| i.docs.len())
    }

    #[must_use]
    pub fn shard_count(&self, index: &str) -> Option<u32> {
        self.indices.get(index).and_then(|i| i.settings.as_ref().map(|s| s.shards))
    }

    #[must_use]
    pub fn mapping_of(&self, index: &str) -> Option<IndexMapping> {
        self.indices.get(index).and_then(|i| i.mapping.clone())
    }

    // ========== Internals ==========

    fn check_available(&self) -> Result<()> {
        if self.unavailable.load(AtomicOrdering::SeqCst) {
            return Err(SearchError::Cluster("cluster unavailable".into()));
        }
        Ok(())
    }

    /// Physical indices (with alias filters) behind an index or alias name.
    fn targets(&self, name: &str) -> Result<Vec<AliasEntry>> {
        if self.indices.contains_key(name) {
            return Ok(vec![AliasEntry { index: name.to_string(), filter: None }]);
        }
        match self.aliases.read().get(name) {
            Some(entries) if !entries.is_empty() => Ok(entries.clone()),
            _ => Err(SearchError::IndexNotFound(name.to_string())),
        }
    }

    fn matching(&self, name: &str, query: &EngineQuery) -> Result<Vec<SearchHit>> {
        let mut hits = Vec::new();
        for target in self.targets(name)? {
            let Some(index) = self.indices.get(&target.index) else { continue };
            for (id, source) in &index.docs {
                let visible = target.filter.as_ref().map_or(true, |f| matches(f, id, source));
                if visible && matches(query, id, source) {
                    hits.push(SearchHit { index: target.index.clone(), id: id.clone(), source: source.clone() });
                }
            }
        }
        Ok(hits)
    }

    fn expand_index_pattern(&self, pattern: &str) -> Vec<String> {
        match pattern.strip_suffix('*') {
            Some(prefix) => self
                .indices
                .iter()
                .map(|e| e.key().clone())
                .filter(|name| name.starts_with(prefix))
                .collect(),
            None => vec![pattern.to_string()],
        }
    }

    fn write_target(&self, name: &str) -> Option<String> {
        if self.indices.contains_key(name) {
            return Some(name.to_string());
        }
        self.aliases.read().get(name).and_then(|entries| entries.first().map(|e| e.index.clone()))
    }

    fn apply(&self, op: &BulkOperation) -> BulkItemResult {
        let result = |status: u16, error: Option<String>| BulkItemResult {
            index: op.index().to_string(),
            id: op.id().to_string(),
            status,
            error,
        };
        match op {
            BulkOperation::Index { index, id, source } => {
                // auto-creates like a default cluster
                let target = self.write_target(index).unwrap_or_else(|| index.clone());
                let mut entry = self.indices.entry(target).or_default();
                let created = entry.docs.insert(id.clone(), source.clone()).is_none();
                result(if created { 201 } else { 200 }, None)
            }
            BulkOperation::Delete { index, id } => {
                let removed = self
                    .write_target(index)
                    .and_then(|target| self.indices.get_mut(&target))
                    .and_then(|mut i| i.docs.remove(id));
                if removed.is_some() {
                    result(200, None)
                } else {
                    result(404, None)
                }
            }
        }
    }

    fn next_scroll_page(&self, scroll_id: &str) -> Result<ScrollPage> {
        let mut scroll = self
            .scrolls
            .get_mut(scroll_id)
            .ok_or_else(|| SearchError::Status { status: 404, body: format!("no scroll {scroll_id}") })?;
        let end = (scroll.pos + scroll.size).min(scroll.hits.len());
        let hits = scroll.hits[scroll.pos..end].to_vec();
        scroll.pos = end;
        Ok(ScrollPage { scroll_id: Some(scroll_id.to_string()), hits })
    }
}

#[async_trait]
impl SearchCluster for InMemoryCluster {
    async fn create_index(&self, name: &str, settings: &IndexSettings, mapping: &IndexMapping) -> Result<()> {
        self.check_available()?;
        if self.indices.contains_key(name) || self.aliases.read().contains_key(name) {
            return Err(SearchError::Status {
                status: 400,
                body: format!("resource_already_exists_exception: {name}"),
            });
        }
        self.indices.insert(
            name.to_string(),
            MemIndex { settings: Some(settings.clone()), mapping: Some(mapping.clone()), docs: BTreeMap::new() },
        );
        Ok(())
    }

    async fn delete_index(&self, name: &str) -> Result<()> {
        self.check_available()?;
        if self.indices.remove(name).is_none() {
            return Err(SearchError::IndexNotFound(name.to_string()));
        }
        let mut aliases = self.aliases.write();
        for entries in aliases.values_mut() {
            entries.retain(|e| e.index != name);
        }
        aliases.retain(|_, entries| !entries.is_empty());
        Ok(())
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.indices.contains_key(name) || self.aliases.read().contains_key(name))
    }

    async fn resolve_alias(&self, alias: &str) -> Result<Vec<String>> {
        self.check_available()?;
        Ok(self.targets(alias)?.into_iter().map(|e| e.index).collect())
    }

    async fn alias_exists(&self, index: &str, alias: &str) -> Result<bool> {
        self.check_available()?;
        let candidates = self.expand_index_pattern(index);
        Ok(self
            .aliases
            .read()
            .get(alias)
            .is_some_and(|entries| entries.iter().any(|e| candidates.contains(&e.index))))
    }

    async fn update_aliases(&self, actions: &[AliasAction]) -> Result<bool> {
        self.check_available()?;
        let mut aliases = self.aliases.write();
        // validate everything first so the update is all-or-nothing
        let mut staged = aliases.clone();
        for action in actions {
            match action {
                AliasAction::Add { index, alias, filter, .. } => {
                    let targets = self.expand_index_pattern(index);
                    if targets.is_empty() || targets.iter().any(|t| !self.indices.contains_key(t)) {
                        return Err(SearchError::IndexNotFound(index.clone()));
                    }
                    let entries = staged.entry(alias.clone()).or_default();
                    for target in targets {
                        entries.retain(|e| e.index != target);
                        entries.push(AliasEntry { index: target, filter: filter.clone() });
                    }
                }
                AliasAction::Remove { index, alias } => {
                    let targets = self.expand_index_pattern(index);
                    let entries = staged.get_mut(alias).ok_or_else(|| SearchError::Status {
                        status: 404,
                        body: format!("aliases_not_found_exception: {alias}"),
                    })?;
                    entries.retain(|e| !targets.contains(&e.index));
                    if entries.is_empty() {
                        staged.remove(alias);
                    }
                }
            }
        }
        *aliases = staged;
        Ok(true)
    }

    async fn bulk(&self, ops: &[BulkOperation]) -> Result<BulkResponse> {
        self.check_available()?;
        self.bulk_requests.fetch_add(1, AtomicOrdering::Relaxed);
        self.batch_sizes.lock().push(ops.len());

        let failing = self.failing_bulk_requests.load(AtomicOrdering::SeqCst);
        if failing > 0 {
            self.failing_bulk_requests.store(failing - 1, AtomicOrdering::SeqCst);
            return Err(SearchError::Cluster("injected bulk failure".into()));
        }

        let mut items = Vec::with_capacity(ops.len());
        for op in ops {
            let rejection = {
                let mut rejections = self.item_rejections.lock();
                (!rejections.is_empty()).then(|| rejections.remove(0))
            };
            match rejection {
                Some(status) => items.push(BulkItemResult {
                    index: op.index().to_string(),
                    id: op.id().to_string(),
                    status,
                    error: Some(format!("injected rejection ({status})")),
                }),
                None => items.push(self.apply(op)),
            }
        }
        Ok(BulkResponse { items })
    }

    async fn search(&self, index: &str, request: &SearchRequest) -> Result<SearchHits> {
        self.check_available()?;
        let mut hits = self.matching(index, &request.query)?;
        hits.sort_by(|a, b| compare_hits(a, b, &request.sort));
        let total = hits.len() as u64;

        if let (Some(after), Some(first)) = (&request.search_after, request.sort.first()) {
            if let Some(cursor) = after.first() {
                hits.retain(|hit| {
                    sort_value(&hit.source, first)
                        .and_then(|v| compare_values(&v, cursor))
                        .is_some_and(|ord| match sort_order(first) {
                            SortOrder::Asc => ord == Ordering::Greater,
                            SortOrder::Desc => ord == Ordering::Less,
                        })
                });
            }
        }

        let hits = hits.into_iter().skip(request.from).take(request.size).collect();
        Ok(SearchHits { total, hits })
    }

    async fn count(&self, index: &str, query: &EngineQuery) -> Result<u64> {
        self.check_available()?;
        Ok(self.matching(index, query)?.len() as u64)
    }

    async fn get_document(&self, index: &str, id: &str) -> Result<Option<Source>> {
        self.check_available()?;
        for target in self.targets(index)? {
            if let Some(doc) = self.indices.get(&target.index).and_then(|i| i.docs.get(id).cloned()) {
                return Ok(Some(doc));
            }
        }
        Ok(None)
    }

    async fn open_scroll(&self, index: &str, query: &EngineQuery, size: usize, _ttl: Duration) -> Result<ScrollPage> {
        self.check_available()?;
        let mut hits = self.matching(index, query)?;
        hits.sort_by(|a, b| compare_hits(a, b, &[]));
        let id = format!("scroll-{}", self.next_scroll.fetch_add(1, AtomicOrdering::Relaxed));
        self.scrolls.insert(id.clone(), Scroll { hits, pos: 0, size: size.max(1) });
        self.next_scroll_page(&id)
    }

    async fn scroll_next(&self, scroll_id: &str, _ttl: Duration) -> Result<ScrollPage> {
        self.check_available()?;
        self.next_scroll_page(scroll_id)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        self.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        self.check_available()?;
        self.targets(index).map(|_| ())
    }

    async fn cluster_health(&self) -> Result<HealthStatus> {
        self.check_available()?;
        Ok(*self.health.read())
    }
}

// ========== Sorting ==========

fn sort_order(field: &SortField) -> SortOrder {
    match field {
        SortField::Score => SortOrder::Desc,
        SortField::Field { order, .. } | SortField::Nested { order, .. } => *order,
    }
}

fn sort_value(source: &Source, field: &SortField) -> Option<Value> {
    match field {
        SortField::Score => None,
        SortField::Field { field, .. } => field_values(source, field).into_iter().next().cloned(),
        SortField::Nested { key, .. } => field_values(source, "properties")
            .into_iter()
            .find(|entry| entry.get("k").and_then(Value::as_str) == Some(key.as_str()))
            .and_then(|entry| entry.get("vn").cloned()),
    }
}

fn doc_seq(source: &Source) -> i64 {
    source.get(DOC_ID).and_then(Value::as_i64).unwrap_or_default()
}

/// Sort criteria in order, missing values last; ties fall back to insertion order.
fn compare_hits(a: &SearchHit, b: &SearchHit, sort: &[SortField]) -> Ordering {
    for field in sort {
        if matches!(field, SortField::Score) {
            continue;
        }
        let ord = match (sort_value(&a.source, field), sort_value(&b.source, field)) {
            (Some(x), Some(y)) => {
                let ord = compare_values(&x, &y).unwrap_or(Ordering::Equal);
                match sort_order(field) {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            }
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    doc_seq(&a.source).cmp(&doc_seq(&b.source)).then_with(|| a.id.cmp(&b.id))
}

// ========== Query evaluation ==========

fn value_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Numeric comparison when both sides are numbers, text otherwise.
fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    if let (Some(x), Some(y)) = (as_number(a), as_number(b)) {
        return x.partial_cmp(&y);
    }
    Some(value_text(a)?.cmp(&value_text(b)?))
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn collect<'a>(value: &'a Value, path: &[&str], out: &mut Vec<&'a Value>) {
    match (path.split_first(), value) {
        (_, Value::Array(items)) => items.iter().for_each(|item| collect(item, path, out)),
        (None, v) => out.push(v),
        (Some((head, rest)), Value::Object(map)) => {
            if let Some(v) = map.get(*head) {
                collect(v, rest, out);
            }
        }
        _ => {}
    }
}

/// Leaf values at a dotted path, arrays flattened.
fn field_values<'a>(source: &'a Source, field: &str) -> Vec<&'a Value> {
    let mut out = Vec::new();
    if let Some(v) = source.get(field) {
        collect(v, &[], &mut out);
        return out;
    }
    let path: Vec<&str> = field.split('.').collect();
    if let Some((head, rest)) = path.split_first() {
        if let Some(v) = source.get(*head) {
            collect(v, rest, &mut out);
        }
    }
    out
}

/// Text of every searchable scalar, skipping nested and internal fields.
fn all_texts(source: &Source) -> Vec<String> {
    fn walk(value: &Value, out: &mut Vec<String>) {
        match value {
            Value::Object(map) => map.values().for_each(|v| walk(v, out)),
            Value::Array(items) => items.iter().for_each(|v| walk(v, out)),
            other => out.extend(value_text(other)),
        }
    }
    let mut out = Vec::new();
    for (key, value) in source {
        if key.starts_with('_') || matches!(value, Value::Array(items) if items.iter().any(Value::is_object)) {
            continue;
        }
        walk(value, &mut out);
    }
    out
}

fn texts(source: &Source, field: &str) -> Vec<String> {
    if field.trim().is_empty() || field == "*" {
        return all_texts(source);
    }
    field_values(source, field).into_iter().filter_map(value_text).collect()
}

fn glob_match(pattern: &[char], text: &[char]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some(('*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some(('?', rest)) => !text.is_empty() && glob_match(rest, &text[1..]),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

fn wildcard_matches(pattern: &str, text: &str) -> bool {
    let pattern_chars: Vec<char> = pattern.chars().collect();
    if glob_match(&pattern_chars, &text.chars().collect::<Vec<_>>()) {
        return true;
    }
    let lowered: Vec<char> = pattern.to_lowercase().chars().collect();
    tokens(text).iter().any(|t| glob_match(&lowered, &t.chars().collect::<Vec<_>>()))
}

fn prefix_matches(prefix: &str, text: &str) -> bool {
    text.starts_with(prefix) || {
        let prefix = prefix.to_lowercase();
        tokens(text).iter().any(|t| t.starts_with(&prefix))
    }
}

fn fuzzy_matches(value: &str, max_edits: Option<u8>, text: &str) -> bool {
    let value = value.to_lowercase();
    let allowed = max_edits.map_or_else(
        || match value.chars().count() {
            0..=2 => 0,
            3..=5 => 1,
            _ => 2,
        },
        usize::from,
    );
    std::iter::once(text.to_lowercase())
        .chain(tokens(text))
        .any(|t| strsim::levenshtein(&t, &value) <= allowed)
}

fn text_matches(query: &str, operator: MatchOperator, field_texts: &[String]) -> bool {
    let wanted = tokens(query);
    if wanted.is_empty() {
        return false;
    }
    let have: Vec<String> = field_texts.iter().flat_map(|t| tokens(t)).collect();
    match operator {
        MatchOperator::And => wanted.iter().all(|w| have.contains(w)),
        MatchOperator::Or => wanted.iter().any(|w| have.contains(w)),
    }
}

fn in_range(value: &Value, lower: &Option<RangeBound>, upper: &Option<RangeBound>) -> bool {
    let check = |bound: &Option<RangeBound>, want: Ordering| match bound {
        None => true,
        Some(b) => match compare_values(value, &b.value) {
            Some(Ordering::Equal) => b.inclusive,
            Some(ord) => ord == want,
            None => false,
        },
    };
    check(lower, Ordering::Greater) && check(upper, Ordering::Less)
}

fn parse_latlng(value: &Value) -> Option<(f64, f64)> {
    match value {
        Value::String(s) => {
            let (lat, lng) = s.split_once(',')?;
            Some((lat.trim().parse().ok()?, lng.trim().parse().ok()?))
        }
        Value::Object(map) => Some((map.get("lat")?.as_f64()?, map.get("lon")?.as_f64()?)),
        _ => None,
    }
}

fn haversine_km((lat1, lng1): (f64, f64), (lat2, lng2): (f64, f64)) -> f64 {
    const EARTH_RADIUS_KM: f64 = 6371.0;
    let (dlat, dlng) = ((lat2 - lat1).to_radians(), (lng2 - lng1).to_radians());
    let a = (dlat / 2.0).sin().powi(2) + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_KM * a.sqrt().asin()
}

fn bool_matches(b: &BoolQuery, id: &str, source: &Source) -> bool {
    let all = |qs: &[EngineQuery]| qs.iter().all(|q| matches(q, id, source));
    if !all(&b.must) || !all(&b.filter) || b.must_not.iter().any(|q| matches(q, id, source)) {
        return false;
    }
    let should_required = b.must.is_empty() && b.filter.is_empty() && !b.should.is_empty();
    !should_required || b.should.iter().any(|q| matches(q, id, source))
}

fn matches(query: &EngineQuery, id: &str, source: &Source) -> bool {
    match query {
        EngineQuery::MatchAll => true,
        EngineQuery::Term { field, value } => field_values(source, field).into_iter().any(|v| match (v, value) {
            (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
            (a, b) => value_text(a).is_some_and(|a| value_text(b).as_deref() == Some(a.as_str())),
        }),
        EngineQuery::Terms { field, values } => values
            .iter()
            .any(|value| matches(&EngineQuery::Term { field: field.clone(), value: value.clone() }, id, source)),
        EngineQuery::Ids(ids) => ids.iter().any(|i| i == id),
        EngineQuery::Range { field, lower, upper } => {
            field_values(source, field).into_iter().any(|v| in_range(v, lower, upper))
        }
        EngineQuery::Prefix { field, value } => texts(source, field).iter().any(|t| prefix_matches(value, t)),
        EngineQuery::Wildcard { field, value } => texts(source, field).iter().any(|t| wildcard_matches(value, t)),
        EngineQuery::Fuzzy { field, value, max_edits } => {
            texts(source, field).iter().any(|t| fuzzy_matches(value, *max_edits, t))
        }
        EngineQuery::Match { field, query, operator } => text_matches(query, *operator, &texts(source, field)),
        EngineQuery::MultiMatch { query, fields } => {
            let field_texts: Vec<String> = if fields.is_empty() {
                all_texts(source)
            } else {
                fields.iter().flat_map(|f| texts(source, f)).collect()
            };
            text_matches(query, MatchOperator::Or, &field_texts)
        }
        EngineQuery::QueryString { query } => match parse_query(query) {
            Ok(node) => node_matches(&node, source),
            Err(_) => text_matches(query, MatchOperator::Or, &all_texts(source)),
        },
        EngineQuery::Nested { path, query } => {
            let mut children = Vec::new();
            if let Some(v) = source.get(path) {
                collect(v, &[], &mut children);
            }
            children.into_iter().any(|child| {
                let mut wrapped = Map::new();
                wrapped.insert(path.clone(), child.clone());
                matches(query, id, &wrapped)
            })
        }
        EngineQuery::Bool(b) => bool_matches(b, id, source),
        EngineQuery::GeoDistance { field, lat, lng, distance_km } => field_values(source, field)
            .into_iter()
            .filter_map(parse_latlng)
            .any(|point| haversine_km(point, (*lat, *lng)) <= *distance_km),
        EngineQuery::MoreLikeThis { fields, like } => {
            let field_texts: Vec<String> = fields.iter().flat_map(|f| texts(source, f)).collect();
            text_matches(like, MatchOperator::Or, &field_texts)
        }
    }
}

/// Evaluate a parsed query string; unqualified terms search every field.
fn node_matches(node: &QueryNode, source: &Source) -> bool {
    match node {
        QueryNode::MatchAll => true,
        QueryNode::Bool(clauses) => {
            let required: Vec<_> = clauses.iter().filter(|c| matches!(c.occur, Occur::Must | Occur::Filter)).collect();
            let optional: Vec<_> = clauses.iter().filter(|c| c.occur == Occur::Should).collect();
            let excluded = clauses.iter().filter(|c| c.occur == Occur::MustNot);
            required.iter().all(|c| node_matches(&c.query, source))
                && !excluded.into_iter().any(|c| node_matches(&c.query, source))
                && (!required.is_empty() || optional.is_empty() || optional.iter().any(|c| node_matches(&c.query, source)))
        }
        QueryNode::Boost { query, .. } => node_matches(query, source),
        QueryNode::Term { field, value } => text_matches(value, MatchOperator::Or, &texts(source, field))
            || texts(source, field).iter().any(|t| t == value),
        QueryNode::Prefix { field, value } => texts(source, field).iter().any(|t| prefix_matches(value, t)),
        QueryNode::Wildcard { field, value } => texts(source, field).iter().any(|t| wildcard_matches(value, t)),
        QueryNode::Fuzzy { field, value, max_edits } => {
            texts(source, field).iter().any(|t| fuzzy_matches(value, *max_edits, t))
        }
        QueryNode::Range { field, lower, upper, include_lower, include_upper } => {
            let bound = |b: &Option<String>, inclusive: bool| {
                b.as_ref().map(|v| RangeBound { value: Value::from(v.as_str()), inclusive })
            };
            let (lower, upper) = (bound(lower, *include_lower), bound(upper, *include_upper));
            field_values(source, field).into_iter().any(|v| in_range(v, &lower, &upper))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(value: Value) -> Source {
        match value {
            Value::Object(map) => map,
            other => panic!("Expected object, got {other:?}"),
        }
    }

    fn index_op(index: &str, id: &str, source: Value) -> BulkOperation {
        BulkOperation::Index { index: index.into(), id: id.into(), source: doc(source) }
    }

    async fn cluster_with_index(name: &str) -> InMemoryCluster {
        let cluster = InMemoryCluster::new();
        cluster
            .create_index(name, &IndexSettings::new(1, 0, "0-1"), &IndexMapping::default_for(true))
            .await
            .unwrap();
        cluster
    }

    #[tokio::test]
    async fn test_create_and_delete_index() {
        let cluster = cluster_with_index("app_1").await;
        assert!(cluster.index_exists("app_1").await.unwrap());
        assert!(cluster
            .create_index("app_1", &IndexSettings::new(1, 0, "0-1"), &IndexMapping::new())
            .await
            .is_err());
        cluster.delete_index("app_1").await.unwrap();
        assert!(!cluster.index_exists("app_1").await.unwrap());
        assert!(cluster.delete_index("app_1").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_alias_swap_is_atomic() {
        let cluster = cluster_with_index("app_1").await;
        cluster
            .create_index("app_2", &IndexSettings::new(1, 0, "0-1"), &IndexMapping::new())
            .await
            .unwrap();
        cluster.update_aliases(&[AliasAction::add("app_1", "app")]).await.unwrap();

        // second action fails, so the first must not apply
        let result = cluster
            .update_aliases(&[AliasAction::remove("app_1", "app"), AliasAction::add("missing", "app")])
            .await;
        assert!(result.is_err());
        assert_eq!(cluster.resolve_alias("app").await.unwrap(), vec!["app_1".to_string()]);

        cluster
            .update_aliases(&[AliasAction::remove("app_1", "app"), AliasAction::add("app_2", "app")])
            .await
            .unwrap();
        assert_eq!(cluster.resolve_alias("app").await.unwrap(), vec!["app_2".to_string()]);
    }

    #[tokio::test]
    async fn test_filtered_alias_and_pattern() {
        let cluster = cluster_with_index("root_1").await;
        cluster
            .bulk(&[
                index_op("root_1", "1", json!({"appid": "a", "name": "one"})),
                index_op("root_1", "2", json!({"appid": "b", "name": "two"})),
            ])
            .await
            .unwrap();
        cluster
            .update_aliases(&[AliasAction::Add {
                index: "root_*".into(),
                alias: "a".into(),
                routing: Some("a".into()),
                filter: Some(EngineQuery::term("appid", "a")),
            }])
            .await
            .unwrap();
        assert!(cluster.alias_exists("root_*", "a").await.unwrap());
        assert_eq!(cluster.count("a", &EngineQuery::MatchAll).await.unwrap(), 1);
        assert_eq!(cluster.count("root_1", &EngineQuery::MatchAll).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let cluster = cluster_with_index("app_1").await;
        cluster.fail_bulk_requests(1);
        assert!(cluster.bulk(&[index_op("app_1", "1", json!({}))]).await.is_err());

        cluster.reject_items([429]);
        let resp = cluster
            .bulk(&[index_op("app_1", "1", json!({})), index_op("app_1", "2", json!({}))])
            .await
            .unwrap();
        assert!(resp.items[0].is_rejected());
        assert!(!resp.items[1].is_failure());
        assert_eq!(cluster.bulk_batch_sizes(), vec![1, 2]);
    }

    #[test]
    fn test_nested_query_evaluation() {
        let source = doc(json!({
            "id": "1",
            "properties": [{"k": "age", "vn": 30}, {"k": "city", "v": "New York"}]
        }));
        let age_over_18 = EngineQuery::nested(
            "properties",
            BoolQuery::new()
                .must(EngineQuery::match_and("properties.k", "age"))
                .must(EngineQuery::Range {
                    field: "properties.vn".into(),
                    lower: Some(RangeBound::inclusive(18)),
                    upper: None,
                })
                .into(),
        );
        assert!(matches(&age_over_18, "1", &source));

        // the key and value must come from the same entry
        let cross = EngineQuery::nested(
            "properties",
            BoolQuery::new()
                .must(EngineQuery::match_and("properties.k", "age"))
                .must(EngineQuery::match_and("properties.v", "york"))
                .into(),
        );
        assert!(!matches(&cross, "1", &source));
    }

    #[test]
    fn test_query_string_evaluation() {
        let source = doc(json!({"name": "Quick brown fox", "type": "animal", "rank": 5}));
        let q = |s: &str| EngineQuery::QueryString { query: s.into() };
        assert!(matches(&q("fox"), "1", &source));
        assert!(matches(&q("type:animal AND rank:[1 TO 9]"), "1", &source));
        assert!(!matches(&q("type:animal AND NOT fox"), "1", &source));
        assert!(matches(&q("name:qui*"), "1", &source));
        assert!(matches(&q("name:brwn~1"), "1", &source));
    }

    #[test]
    fn test_geo_distance() {
        let source = doc(json!({"latlng": "40.7128,-74.0060"}));
        let near = EngineQuery::GeoDistance { field: "latlng".into(), lat: 40.73, lng: -73.99, distance_km: 10.0 };
        let far = EngineQuery::GeoDistance { field: "latlng".into(), lat: 51.5, lng: -0.12, distance_km: 10.0 };
        assert!(matches(&near, "1", &source));
        assert!(!matches(&far, "1", &source));
    }

    #[tokio::test]
    async fn test_search_after_and_paging() {
        let cluster = cluster_with_index("app_1").await;
        let ops: Vec<_> = (1..=5).map(|i| index_op("app_1", &i.to_string(), json!({DOC_ID: i * 10}))).collect();
        cluster.bulk(&ops).await.unwrap();

        let mut req = SearchRequest::new(EngineQuery::MatchAll, 2);
        req.sort = vec![SortField::Field { field: DOC_ID.into(), order: SortOrder::Desc }];
        req.search_after = Some(vec![json!(40)]);
        let page = cluster.search("app_1", &req).await.unwrap();
        assert_eq!(page.total, 5);
        let ids: Vec<_> = page.hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2"]);
    }

    #[tokio::test]
    async fn test_scroll_pages() {
        let cluster = cluster_with_index("app_1").await;
        let ops: Vec<_> = (0..5).map(|i| index_op("app_1", &i.to_string(), json!({}))).collect();
        cluster.bulk(&ops).await.unwrap();

        let first = cluster.open_scroll("app_1", &EngineQuery::MatchAll, 2, Duration::from_secs(60)).await.unwrap();
        assert_eq!(first.hits.len(), 2);
        let id = first.scroll_id.unwrap();
        assert_eq!(cluster.scroll_next(&id, Duration::from_secs(60)).await.unwrap().hits.len(), 2);
        assert_eq!(cluster.scroll_next(&id, Duration::from_secs(60)).await.unwrap().hits.len(), 1);
        assert!(cluster.scroll_next(&id, Duration::from_secs(60)).await.unwrap().hits.is_empty());
        cluster.clear_scroll(&id).await.unwrap();
        assert!(cluster.scroll_next(&id, Duration::from_secs(60)).await.is_err());
    }
}
