//! Typed subset of the Elasticsearch query DSL.
//!
//! Everything the translator produces is an [`EngineQuery`]; the HTTP cluster
//! serializes it with [`EngineQuery::to_json`] and the in-memory cluster
//! evaluates it directly.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchOperator {
    And,
    Or,
}

/// One side of a range query.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeBound {
    pub value: Value,
    pub inclusive: bool,
}

impl RangeBound {
    pub fn inclusive(value: impl Into<Value>) -> Self {
        Self { value: value.into(), inclusive: true }
    }

    pub fn exclusive(value: impl Into<Value>) -> Self {
        Self { value: value.into(), inclusive: false }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EngineQuery {
    MatchAll,
    Term { field: String, value: Value },
    Terms { field: String, values: Vec<Value> },
    Ids(Vec<String>),
    Range { field: String, lower: Option<RangeBound>, upper: Option<RangeBound> },
    Prefix { field: String, value: String },
    Wildcard { field: String, value: String },
    /// `max_edits` of `None` means AUTO fuzziness
    Fuzzy { field: String, value: String, max_edits: Option<u8> },
    Match { field: String, query: String, operator: MatchOperator },
    /// Empty `fields` searches all fields
    MultiMatch { query: String, fields: Vec<String> },
    QueryString { query: String },
    /// Nested query, scored with the average of matching children
    Nested { path: String, query: Box<EngineQuery> },
    Bool(BoolQuery),
    GeoDistance { field: String, lat: f64, lng: f64, distance_km: f64 },
    MoreLikeThis { fields: Vec<String>, like: String },
}

/// Compound boolean query.
///
/// Without `must` or `filter` clauses at least one `should` clause has to match.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BoolQuery {
    pub must: Vec<EngineQuery>,
    pub should: Vec<EngineQuery>,
    pub must_not: Vec<EngineQuery>,
    pub filter: Vec<EngineQuery>,
    pub boost: Option<f32>,
}

impl BoolQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn must(mut self, query: EngineQuery) -> Self {
        self.must.push(query);
        self
    }

    #[must_use]
    pub fn should(mut self, query: EngineQuery) -> Self {
        self.should.push(query);
        self
    }

    #[must_use]
    pub fn must_not(mut self, query: EngineQuery) -> Self {
        self.must_not.push(query);
        self
    }

    #[must_use]
    pub fn filter(mut self, query: EngineQuery) -> Self {
        self.filter.push(query);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.must.is_empty() && self.should.is_empty() && self.must_not.is_empty() && self.filter.is_empty()
    }
}

impl From<BoolQuery> for EngineQuery {
    fn from(b: BoolQuery) -> Self {
        EngineQuery::Bool(b)
    }
}

impl EngineQuery {
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        EngineQuery::Term { field: field.into(), value: value.into() }
    }

    pub fn match_and(field: impl Into<String>, query: impl Into<String>) -> Self {
        EngineQuery::Match { field: field.into(), query: query.into(), operator: MatchOperator::And }
    }

    pub fn multi_match(query: impl Into<String>) -> Self {
        EngineQuery::MultiMatch { query: query.into(), fields: Vec::new() }
    }

    pub fn nested(path: impl Into<String>, query: EngineQuery) -> Self {
        EngineQuery::Nested { path: path.into(), query: Box::new(query) }
    }

    #[must_use]
    pub fn is_match_all(&self) -> bool {
        matches!(self, EngineQuery::MatchAll)
    }

    /// Apply a boost, wrapping leaves in a single-clause bool.
    #[must_use]
    pub fn boosted(self, boost: f32) -> Self {
        match self {
            EngineQuery::Bool(mut b) => {
                b.boost = Some(boost);
                EngineQuery::Bool(b)
            }
            other => EngineQuery::Bool(BoolQuery { must: vec![other], boost: Some(boost), ..Default::default() }),
        }
    }

    /// Restrict to objects of `object_type`; blank types leave the query untouched.
    #[must_use]
    pub fn with_type(self, object_type: Option<&str>) -> Self {
        match object_type.map(str::trim).filter(|t| !t.is_empty()) {
            Some(t) => BoolQuery::new().must(self).must(EngineQuery::term("type", t)).into(),
            None => self,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            EngineQuery::MatchAll => json!({"match_all": {}}),
            EngineQuery::Term { field, value } => json!({"term": { field.as_str(): value }}),
            EngineQuery::Terms { field, values } => json!({"terms": { field.as_str(): values }}),
            EngineQuery::Ids(ids) => json!({"ids": {"values": ids}}),
            EngineQuery::Range { field, lower, upper } => {
                let mut bounds = Map::new();
                if let Some(b) = lower {
                    bounds.insert(if b.inclusive { "gte" } else { "gt" }.to_string(), b.value.clone());
                }
                if let Some(b) = upper {
                    bounds.insert(if b.inclusive { "lte" } else { "lt" }.to_string(), b.value.clone());
                }
                json!({"range": { field.as_str(): bounds }})
            }
            EngineQuery::Prefix { field, value } => json!({"prefix": { field.as_str(): value }}),
            EngineQuery::Wildcard { field, value } => json!({"wildcard": { field.as_str(): value }}),
            EngineQuery::Fuzzy { field, value, max_edits } => {
                let fuzziness = max_edits.map_or_else(|| Value::from("AUTO"), Value::from);
                json!({"fuzzy": { field.as_str(): {"value": value, "fuzziness": fuzziness} }})
            }
            EngineQuery::Match { field, query, operator } => {
                let op = match operator {
                    MatchOperator::And => "and",
                    MatchOperator::Or => "or",
                };
                json!({"match": { field.as_str(): {"query": query, "operator": op} }})
            }
            EngineQuery::MultiMatch { query, fields } => {
                if fields.is_empty() {
                    json!({"multi_match": {"query": query}})
                } else {
                    json!({"multi_match": {"query": query, "fields": fields}})
                }
            }
            EngineQuery::QueryString { query } => {
                json!({"query_string": {"query": query, "allow_leading_wildcard": false}})
            }
            EngineQuery::Nested { path, query } => json!({
                "nested": {"path": path, "query": query.to_json(), "score_mode": "avg"}
            }),
            EngineQuery::Bool(b) => {
                let mut body = Map::new();
                for (name, clauses) in [
                    ("must", &b.must),
                    ("should", &b.should),
                    ("must_not", &b.must_not),
                    ("filter", &b.filter),
                ] {
                    if !clauses.is_empty() {
                        body.insert(name.to_string(), Value::Array(clauses.iter().map(Self::to_json).collect()));
                    }
                }
                if let Some(boost) = b.boost {
                    body.insert("boost".to_string(), json!(boost));
                }
                json!({"bool": body})
            }
            EngineQuery::GeoDistance { field, lat, lng, distance_km } => json!({
                "geo_distance": {
                    "distance": format!("{distance_km}km"),
                    field.as_str(): {"lat": lat, "lon": lng}
                }
            }),
            EngineQuery::MoreLikeThis { fields, like } => json!({
                "more_like_this": {"fields": fields, "like": like, "min_term_freq": 1, "min_doc_freq": 1}
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bool_json_omits_empty_sections() {
        let q: EngineQuery = BoolQuery::new()
            .must(EngineQuery::term("type", "user"))
            .must_not(EngineQuery::Ids(vec!["1".into()]))
            .into();
        let json = q.to_json();
        assert_eq!(json["bool"]["must"][0]["term"]["type"], "user");
        assert_eq!(json["bool"]["must_not"][0]["ids"]["values"][0], "1");
        assert!(json["bool"].get("should").is_none());
    }

    #[test]
    fn test_range_json() {
        let q = EngineQuery::Range {
            field: "properties.vn".into(),
            lower: Some(RangeBound::exclusive(5)),
            upper: Some(RangeBound::inclusive(10)),
        };
        assert_eq!(q.to_json(), json!({"range": {"properties.vn": {"gt": 5, "lte": 10}}}));
    }

    #[test]
    fn test_nested_json() {
        let q = EngineQuery::nested("properties", EngineQuery::match_and("properties.k", "age"));
        let json = q.to_json();
        assert_eq!(json["nested"]["path"], "properties");
        assert_eq!(json["nested"]["score_mode"], "avg");
        assert_eq!(json["nested"]["query"]["match"]["properties.k"]["operator"], "and");
    }

    #[test]
    fn test_boost_wraps_leaf() {
        match EngineQuery::term("a", "b").boosted(2.0) {
            EngineQuery::Bool(b) => {
                assert_eq!(b.boost, Some(2.0));
                assert_eq!(b.must.len(), 1);
            }
            _ => panic!("Expected Bool node"),
        }
    }

    #[test]
    fn test_with_type() {
        let q = EngineQuery::MatchAll.with_type(Some("user"));
        assert_eq!(q.to_json()["bool"]["must"][1]["term"]["type"], "user");
        assert!(EngineQuery::MatchAll.with_type(Some("  ")).is_match_all());
        assert!(EngineQuery::MatchAll.with_type(None).is_match_all());
    }

    #[test]
    fn test_geo_distance_json() {
        let q = EngineQuery::GeoDistance { field: "latlng".into(), lat: 1.5, lng: 2.0, distance_km: 10.0 };
        let json = q.to_json();
        assert_eq!(json["geo_distance"]["distance"], "10km");
        assert_eq!(json["geo_distance"]["latlng"]["lon"], 2.0);
    }
}
