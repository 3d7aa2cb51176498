// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query translator.
//!
//! Turns query strings, term maps and facade requests into [`EngineQuery`]
//! trees. In flattened mode, clauses on `properties.*` fields are rewritten to
//! nested key/value queries against the `{k, v | vn}` entries.
//!
//! # Example
//!
//! ```
//! use search_sync::search::{EngineQuery, QueryTranslator};
//!
//! let translator = QueryTranslator::new(true);
//! let query = translator
//!     .convert_query_string_to_nested_query("properties.age:[18 TO *]")
//!     .unwrap();
//! assert!(matches!(query, EngineQuery::Nested { .. }));
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use super::engine_query::{BoolQuery, EngineQuery, RangeBound};
use super::parser::parse_query;
use super::query_builder::{Occur, QueryNode};
use crate::codec::{PROPS_FIELD, PROPS_PREFIX};
use crate::error::{Result, SearchError};
use crate::object::PropertyValue;

/// Deepest boolean nesting the nested-schema rewrite will follow.
pub const MAX_QUERY_DEPTH: usize = 10;

const VALUE_FIELD: &str = "properties.v";
const NUMERIC_VALUE_FIELD: &str = "properties.vn";
const KEY_FIELD: &str = "properties.k";

/// Term filters keyed by field name. A key may end in `<`, `>`, `<=` or `>=`.
pub type Terms = BTreeMap<String, PropertyValue>;

fn props_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(^|.*\W)properties[\.\:].+").expect("valid properties regex"))
}

fn array_index_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[(\d+)\]").expect("valid index regex"))
}

fn range_suffix_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[<>=\s]+$").expect("valid suffix regex"))
}

/// True when `field` (or a query string) references a custom property.
pub fn is_props_field(field: &str) -> bool {
    props_regex().is_match(field)
}

/// `properties.a.b[2]` → `a-b-2`
pub fn nested_key(key: &str) -> String {
    let key = key.strip_prefix(PROPS_PREFIX).unwrap_or(key);
    array_index_regex().replace_all(key, "-$1").replace('.', "-")
}

fn is_digits(value: &str) -> bool {
    !value.is_empty() && value.chars().all(|c| c.is_ascii_digit())
}

/// `properties.vn` for all-digit values, `properties.v` otherwise.
pub fn value_field_name(value: &str) -> &'static str {
    if is_digits(value) { NUMERIC_VALUE_FIELD } else { VALUE_FIELD }
}

/// Numeric field when either bound is digits, or both bounds are open.
pub fn value_field_name_from_range(from: &str, to: &str) -> &'static str {
    if is_digits(from) || is_digits(to) || (from == "*" && to == "*") {
        NUMERIC_VALUE_FIELD
    } else {
        VALUE_FIELD
    }
}

/// All-digit values become longs, everything else stays text.
pub fn numeric_value(value: &str) -> Value {
    if is_digits(value) {
        if let Ok(n) = value.parse::<i64>() {
            return Value::from(n);
        }
    }
    Value::from(value)
}

/// Nested query over the `properties` entries.
pub fn nested_props_query(query: EngineQuery) -> EngineQuery {
    EngineQuery::nested(PROPS_FIELD, query)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOp {
    Gt,
    Gte,
    Lt,
    Lte,
}

impl RangeOp {
    /// Operator encoded as a trailing suffix on a term key.
    #[must_use]
    pub fn from_key_suffix(key: &str) -> Option<Self> {
        let key = key.trim_end();
        if key.ends_with(">=") {
            Some(RangeOp::Gte)
        } else if key.ends_with("<=") {
            Some(RangeOp::Lte)
        } else if key.ends_with('>') {
            Some(RangeOp::Gt)
        } else if key.ends_with('<') {
            Some(RangeOp::Lt)
        } else {
            None
        }
    }

    fn query(self, field: &str, value: Value) -> EngineQuery {
        let (lower, upper) = match self {
            RangeOp::Gt => (Some(RangeBound::exclusive(value)), None),
            RangeOp::Gte => (Some(RangeBound::inclusive(value)), None),
            RangeOp::Lt => (None, Some(RangeBound::exclusive(value))),
            RangeOp::Lte => (None, Some(RangeBound::inclusive(value))),
        };
        EngineQuery::Range { field: field.to_string(), lower, upper }
    }
}

/// A query string after validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedQuery {
    /// Cleaned query text, `*` when it matches everything
    pub text: String,
    /// Parsed tree, `None` for match-all
    pub parsed: Option<QueryNode>,
}

impl ValidatedQuery {
    fn match_all() -> Self {
        Self { text: "*".to_string(), parsed: None }
    }

    #[must_use]
    pub fn is_match_all(&self) -> bool {
        self.parsed.is_none()
    }
}

/// Builds engine queries for the search facade.
#[derive(Debug, Clone)]
pub struct QueryTranslator {
    nested_mode: bool,
}

impl QueryTranslator {
    pub fn new(nested_mode: bool) -> Self {
        Self { nested_mode }
    }

    #[must_use]
    pub fn nested_mode(&self) -> bool {
        self.nested_mode
    }

    /// Clean and parse a user query string.
    ///
    /// Blank or `*` match everything, a single leading `*` is dropped, and
    /// anything that does not parse degrades to match-all.
    pub fn parse_and_validate(&self, query: &str) -> ValidatedQuery {
        let trimmed = query.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return ValidatedQuery::match_all();
        }
        let cleaned = if trimmed.len() > 1 {
            trimmed.strip_prefix('*').unwrap_or(trimmed)
        } else {
            trimmed
        };
        match parse_query(cleaned) {
            Ok(node) => ValidatedQuery { text: cleaned.to_string(), parsed: Some(node) },
            Err(e) => {
                debug!(query = %cleaned, error = %e, "Query string did not parse, matching all");
                ValidatedQuery::match_all()
            }
        }
    }

    #[must_use]
    pub fn is_valid_query_string(&self, query: &str) -> bool {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return false;
        }
        trimmed == "*" || parse_query(trimmed).is_ok()
    }

    /// Plain `query_string` query over the cleaned text; match-all input
    /// becomes [`EngineQuery::MatchAll`].
    pub fn query_string(&self, query: &str) -> EngineQuery {
        let validated = self.parse_and_validate(query);
        if validated.is_match_all() {
            EngineQuery::MatchAll
        } else {
            EngineQuery::QueryString { query: validated.text }
        }
    }

    /// Query for free-form search. `None` means the query can match nothing.
    pub fn search_query(&self, query: &str) -> Option<EngineQuery> {
        if self.nested_mode && is_props_field(query) {
            self.convert_query_string_to_nested_query(query)
        } else {
            Some(self.query_string(query))
        }
    }

    /// Rewrite a query string that touches `properties.*` for the flattened schema.
    ///
    /// Unparsable input matches everything; input nested beyond
    /// [`MAX_QUERY_DEPTH`] returns `None`.
    pub fn convert_query_string_to_nested_query(&self, query: &str) -> Option<EngineQuery> {
        let query = array_index_regex().replace_all(query, "-$1");
        let validated = self.parse_and_validate(&query);
        let Some(node) = validated.parsed else {
            return Some(EngineQuery::MatchAll);
        };
        match self.rewrite_for_nested_schema(&node, 0) {
            Ok(q) => Some(q),
            Err(e) => {
                warn!(query = %validated.text, error = %e, "Query rewrite failed");
                None
            }
        }
    }

    /// Recursively rewrite a parsed tree into engine clauses.
    pub fn rewrite_for_nested_schema(&self, node: &QueryNode, depth: usize) -> Result<EngineQuery> {
        if depth > MAX_QUERY_DEPTH {
            return Err(SearchError::QueryDepthExceeded { max: MAX_QUERY_DEPTH });
        }
        let query = match node {
            QueryNode::MatchAll => EngineQuery::MatchAll,
            QueryNode::Bool(clauses) => {
                let mut bool = BoolQuery::new();
                for clause in clauses {
                    let q = self.rewrite_for_nested_schema(&clause.query, depth + 1)?;
                    bool = match clause.occur {
                        Occur::Must => bool.must(q),
                        Occur::Should => bool.should(q),
                        Occur::MustNot => bool.must_not(q),
                        Occur::Filter => bool.filter(q),
                    };
                }
                bool.into()
            }
            QueryNode::Boost { query, boost } => {
                self.rewrite_for_nested_schema(query, depth + 1)?.boosted(*boost)
            }
            QueryNode::Term { field, value } => {
                if field.trim().is_empty() {
                    self.free_text(value, EngineQuery::multi_match(value.as_str()))
                } else if is_props_field(field) {
                    nested_props_query(self.key_value_query(field, value))
                } else {
                    EngineQuery::term(field.as_str(), value.as_str())
                }
            }
            QueryNode::Prefix { field, value } => self.leaf(
                field,
                value,
                EngineQuery::Prefix { field: value_field_name(value).to_string(), value: value.clone() },
                EngineQuery::Prefix { field: field.clone(), value: value.clone() },
            ),
            QueryNode::Wildcard { field, value } => self.leaf(
                field,
                value,
                EngineQuery::Wildcard { field: value_field_name(value).to_string(), value: value.clone() },
                EngineQuery::Wildcard { field: field.clone(), value: value.clone() },
            ),
            QueryNode::Fuzzy { field, value, max_edits } => self.leaf(
                field,
                value,
                EngineQuery::Fuzzy {
                    field: value_field_name(value).to_string(),
                    value: value.clone(),
                    max_edits: *max_edits,
                },
                EngineQuery::Fuzzy { field: field.clone(), value: value.clone(), max_edits: *max_edits },
            ),
            QueryNode::Range { field, lower, upper, include_lower, include_upper } => self.term_range(
                field,
                lower.as_deref().unwrap_or("*"),
                upper.as_deref().unwrap_or("*"),
                *include_lower,
                *include_upper,
            ),
        };
        Ok(query)
    }

    fn leaf(&self, field: &str, value: &str, value_query: EngineQuery, plain: EngineQuery) -> EngineQuery {
        if field.trim().is_empty() {
            self.free_text(value, value_query)
        } else if is_props_field(field) {
            nested_props_query(self.key_value_bool_query(field, value_query))
        } else {
            plain
        }
    }

    /// Unqualified text: any property value, or any top-level field.
    fn free_text(&self, value: &str, value_query: EngineQuery) -> EngineQuery {
        let inner = BoolQuery::new().must(EngineQuery::MatchAll).must(value_query);
        BoolQuery::new()
            .should(nested_props_query(inner.into()))
            .should(EngineQuery::multi_match(value))
            .into()
    }

    /// Range over a field; nested fields pick `v` or `vn` from the bounds.
    /// All-digit bounds are sent as integers. A range without a field
    /// matches everything.
    pub fn term_range(
        &self,
        field: &str,
        from: &str,
        to: &str,
        include_lower: bool,
        include_upper: bool,
    ) -> EngineQuery {
        if field.trim().is_empty() {
            return EngineQuery::MatchAll;
        }
        let nested = is_props_field(field);
        let range = if from == "*" && to == "*" {
            EngineQuery::MatchAll
        } else {
            let target = if nested { value_field_name_from_range(from, to) } else { field };
            let bound = |b: &str, inclusive: bool| {
                (b != "*").then(|| RangeBound { value: numeric_value(b), inclusive })
            };
            EngineQuery::Range {
                field: target.to_string(),
                lower: bound(from, include_lower),
                upper: bound(to, include_upper),
            }
        };
        if nested {
            nested_props_query(self.key_value_bool_query(field, range))
        } else {
            range
        }
    }

    /// Single-sided range, nested-aware.
    pub fn range(&self, op: RangeOp, key: &str, value: &str) -> EngineQuery {
        if self.nested_mode && is_props_field(key) {
            let range = op.query(value_field_name(value), numeric_value(value));
            nested_props_query(self.key_value_bool_query(key, range))
        } else {
            op.query(key, numeric_value(value))
        }
    }

    /// Key/value clause for a nested entry; `*` matches any value of the key.
    pub fn key_value_query(&self, key: &str, value: &str) -> EngineQuery {
        if key.trim().is_empty() || value.trim().is_empty() {
            return EngineQuery::MatchAll;
        }
        if value.trim() == "*" {
            return self.key_value_bool_query(key, EngineQuery::MatchAll);
        }
        self.key_value_bool_query(key, EngineQuery::match_and(value_field_name(value), value))
    }

    /// `k` must equal the flattened key, and the entry must satisfy `value_query`.
    pub fn key_value_bool_query(&self, key: &str, value_query: EngineQuery) -> EngineQuery {
        if key.trim().is_empty() {
            return EngineQuery::MatchAll;
        }
        let bool = BoolQuery::new().must(EngineQuery::match_and(KEY_FIELD, nested_key(key)));
        if value_query.is_match_all() {
            bool.into()
        } else {
            bool.must(value_query).into()
        }
    }

    /// Build a query from exact-match terms. Only scalar values count.
    ///
    /// A single clause is returned unwrapped; no usable terms gives `None`.
    pub fn terms_query(&self, terms: &Terms, must_match_all: bool) -> Option<EngineQuery> {
        let mut clauses: Vec<EngineQuery> = Vec::new();
        for (key, value) in terms {
            if key.trim().is_empty() {
                continue;
            }
            let Some(text) = value.as_text() else { continue };

            let clause = if let Some(op) = RangeOp::from_key_suffix(key) {
                let stripped = range_suffix_regex().replace(key, "");
                self.range(op, &stripped, &text)
            } else if self.nested_mode && is_props_field(key) {
                nested_props_query(self.key_value_query(key, &text))
            } else {
                EngineQuery::term(key.as_str(), value.to_json())
            };
            clauses.push(clause);
        }

        if clauses.len() <= 1 {
            return clauses.pop();
        }
        let bool = clauses.into_iter().fold(BoolQuery::new(), |bool, clause| {
            if must_match_all { bool.must(clause) } else { bool.should(clause) }
        });
        Some(bool.into())
    }

    /// Field value is any of `terms`.
    pub fn terms_in_list(&self, field: &str, terms: &[String]) -> EngineQuery {
        let values: Vec<Value> = terms.iter().map(|t| Value::from(t.as_str())).collect();
        if self.nested_mode && is_props_field(field) {
            let value_query = EngineQuery::Terms { field: VALUE_FIELD.to_string(), values };
            nested_props_query(self.key_value_bool_query(field, value_query))
        } else {
            EngineQuery::Terms { field: field.to_string(), values }
        }
    }

    pub fn prefix(&self, field: &str, prefix: &str) -> EngineQuery {
        if self.nested_mode && is_props_field(field) {
            let value_query = EngineQuery::Prefix {
                field: value_field_name(prefix).to_string(),
                value: prefix.to_string(),
            };
            nested_props_query(self.key_value_bool_query(field, value_query))
        } else {
            EngineQuery::Prefix { field: field.to_string(), value: prefix.to_string() }
        }
    }

    pub fn wildcard(&self, field: &str, wildcard: &str) -> EngineQuery {
        if self.nested_mode && is_props_field(field) {
            let value_query = EngineQuery::Wildcard {
                field: value_field_name(wildcard).to_string(),
                value: wildcard.to_string(),
            };
            nested_props_query(self.key_value_bool_query(field, value_query))
        } else {
            EngineQuery::Wildcard { field: field.to_string(), value: wildcard.to_string() }
        }
    }

    /// Every non-blank tag must be present.
    pub fn tagged(&self, tags: &[String]) -> Option<EngineQuery> {
        let bool = tags
            .iter()
            .map(|t| t.trim())
            .filter(|t| !t.is_empty())
            .fold(BoolQuery::new(), |bool, tag| bool.must(EngineQuery::term("tags", tag)));
        (!bool.is_empty()).then(|| bool.into())
    }

    /// More-like-this over `fields`, excluding `filter_key` when given.
    pub fn similar(&self, filter_key: Option<&str>, fields: &[String], like_text: &str) -> EngineQuery {
        let mlt = if self.nested_mode && fields.iter().any(|f| f.starts_with(PROPS_PREFIX)) {
            fields
                .iter()
                .fold(BoolQuery::new(), |bool, field| {
                    let value_query = EngineQuery::MoreLikeThis {
                        fields: vec![VALUE_FIELD.to_string()],
                        like: like_text.to_string(),
                    };
                    bool.should(nested_props_query(self.key_value_bool_query(field, value_query)))
                })
                .into()
        } else {
            EngineQuery::MoreLikeThis { fields: fields.to_vec(), like: like_text.to_string() }
        };
        match filter_key.map(str::trim).filter(|k| !k.is_empty()) {
            Some(key) => BoolQuery::new().must_not(EngineQuery::term("id", key)).filter(mlt).into(),
            None => mlt,
        }
    }

    /// Tag objects whose `tag` starts with `keyword`.
    pub fn tags_prefix(&self, keyword: &str) -> EngineQuery {
        EngineQuery::Wildcard { field: "tag".to_string(), value: format!("{keyword}*") }
    }

    pub fn nearby(&self, lat: f64, lng: f64, radius_km: f64) -> EngineQuery {
        EngineQuery::GeoDistance { field: "latlng".to_string(), lat, lng, distance_km: radius_km }
    }
}
