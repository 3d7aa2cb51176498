//! Index mapping and settings definitions.
//!
//! ```text
//! PUT /{app}_1
//! {
//!   "settings": { "number_of_shards": "2", "analysis": { ... } },
//!   "mappings": { "properties": { "id": {"type": "keyword"}, ... } }
//! }
//! ```

use serde_json::{json, Map, Value};

use crate::codec::{DOC_ID, PROPS_FIELD};

/// Accepted date formats for `updated` and `timestamp`.
pub const DATE_FORMAT: &str =
    "epoch_millis||epoch_second||yyyy-MM-dd HH:mm:ss||yyyy-MM-dd||yyyy/MM/dd||yyyyMMdd||yyyy";

/// Exact-match string fields of the default mapping.
pub const KEYWORD_FIELDS: [&str; 14] = [
    "tag", "id", "key", "name", "type", "tags", "token", "email", "appid", "groups", "password",
    "parentid", "creatorid", "identifier",
];

/// Stopword languages of the default analyzer.
pub const STOPWORD_LANGUAGES: [&str; 27] = [
    "arabic", "armenian", "basque", "brazilian", "bulgarian", "catalan", "czech", "danish",
    "dutch", "english", "finnish", "french", "galician", "german", "greek", "hindi", "hungarian",
    "indonesian", "italian", "norwegian", "persian", "portuguese", "romanian", "russian",
    "spanish", "swedish", "turkish",
];

/// Field mapping types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingFieldType {
    Keyword,
    Date,
    GeoPoint,
    Nested,
    Object,
    /// Stored for sorting only
    UnindexedLong,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingField {
    pub name: String,
    pub field_type: MappingFieldType,
}

impl MappingField {
    fn to_json(&self) -> Value {
        match self.field_type {
            MappingFieldType::Keyword => json!({"type": "keyword"}),
            MappingFieldType::Date => json!({"type": "date", "format": DATE_FORMAT}),
            MappingFieldType::GeoPoint => json!({"type": "geo_point"}),
            MappingFieldType::Nested => json!({"type": "nested"}),
            MappingFieldType::Object => json!({"type": "object"}),
            MappingFieldType::UnindexedLong => json!({"type": "long", "index": false}),
        }
    }
}

/// Index mapping definition
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexMapping {
    pub fields: Vec<MappingField>,
}

impl IndexMapping {
    pub fn new() -> Self {
        Self::default()
    }

    fn field(mut self, name: impl Into<String>, field_type: MappingFieldType) -> Self {
        self.fields.push(MappingField { name: name.into(), field_type });
        self
    }

    pub fn keyword(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::Keyword)
    }

    pub fn date(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::Date)
    }

    pub fn geo_point(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::GeoPoint)
    }

    pub fn nested(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::Nested)
    }

    pub fn object(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::Object)
    }

    pub fn unindexed_long(self, name: impl Into<String>) -> Self {
        self.field(name, MappingFieldType::UnindexedLong)
    }

    /// The mapping every application index is created with.
    pub fn default_for(nested_mode: bool) -> Self {
        let mapping = Self::new().nested("nstd");
        let mapping = if nested_mode {
            mapping.nested(PROPS_FIELD)
        } else {
            mapping.object(PROPS_FIELD)
        };
        KEYWORD_FIELDS.iter().fold(
            mapping
                .geo_point("latlng")
                .unindexed_long(DOC_ID)
                .date("updated")
                .date("timestamp"),
            |m, name| m.keyword(*name),
        )
    }

    #[must_use]
    pub fn field_type(&self, name: &str) -> Option<MappingFieldType> {
        self.fields.iter().find(|f| f.name == name).map(|f| f.field_type)
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        let properties: Map<String, Value> =
            self.fields.iter().map(|f| (f.name.clone(), f.to_json())).collect();
        json!({"properties": properties})
    }
}

/// Shard and analyzer settings of a new index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    pub shards: u32,
    pub replicas: u32,
    pub auto_expand_replicas: String,
}

impl IndexSettings {
    pub fn new(shards: u32, replicas: u32, auto_expand_replicas: impl Into<String>) -> Self {
        Self { shards, replicas, auto_expand_replicas: auto_expand_replicas.into() }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        json!({
            "number_of_shards": self.shards.to_string(),
            "number_of_replicas": self.replicas.to_string(),
            "auto_expand_replicas": self.auto_expand_replicas,
            "analysis": {
                "analyzer": {
                    "default": {
                        "type": "standard",
                        "stopwords": STOPWORD_LANGUAGES.iter().map(|l| format!("_{l}_")).collect::<Vec<_>>()
                    }
                }
            }
        })
    }
}
