// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conversion between domain objects and index documents.
//!
//! In flattened mode the open `properties` map is stored twice: as a nested
//! list of `{k, v}` / `{k, vn}` pairs that can be queried, and as a JSON string
//! in `_properties_json` that restores the exact original map on read.
//!
//! # Example
//!
//! ```
//! use search_sync::{DocumentCodec, DomainObject};
//!
//! let codec = DocumentCodec::new(true);
//! let obj = DomainObject::new("1", "book", "app").with_property("pages", 100);
//!
//! let doc = codec.encode(&obj).unwrap();
//! assert_eq!(doc["properties"][0]["k"], "pages");
//! assert_eq!(doc["properties"][0]["vn"], 100);
//!
//! let back = codec.decode(doc).unwrap();
//! assert_eq!(back, obj);
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::object::{DomainObject, PropertyValue};

/// Synthetic numeric sort key used for search-after paging.
pub const DOC_ID: &str = "_docid";
pub const PROPS_FIELD: &str = "properties";
pub const PROPS_PREFIX: &str = "properties.";
pub const PROPS_JSON: &str = "_properties_json";

/// Administrative attributes that never reach the index.
pub const IGNORED_FIELDS: [&str; 6] = [
    "settings",
    "datatypes",
    "deviceState",
    "deviceMetadata",
    "resourcePermissions",
    "validationConstraints",
];

/// Monotonic, roughly time-ordered `_docid` source.
#[derive(Debug, Default)]
pub struct DocIdGenerator {
    last: AtomicI64,
}

impl DocIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> i64 {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        let candidate = millis << 12;
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Encodes domain objects into index documents and back.
#[derive(Debug)]
pub struct DocumentCodec {
    nested_mode: bool,
    ids: DocIdGenerator,
}

impl DocumentCodec {
    pub fn new(nested_mode: bool) -> Self {
        Self {
            nested_mode,
            ids: DocIdGenerator::new(),
        }
    }

    #[must_use]
    pub fn nested_mode(&self) -> bool {
        self.nested_mode
    }

    /// Build the index document for `obj`.
    pub fn encode(&self, obj: &DomainObject) -> Result<Map<String, Value>> {
        let mut doc = match serde_json::to_value(obj)? {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        for field in IGNORED_FIELDS {
            doc.remove(field);
        }
        if self.nested_mode && !obj.properties.is_empty() {
            doc.insert(PROPS_FIELD.to_string(), Value::Array(flatten_properties(&obj.properties)));
            doc.insert(PROPS_JSON.to_string(), Value::String(serde_json::to_string(&obj.properties)?));
        }
        doc.insert(DOC_ID.to_string(), Value::from(self.ids.next_id()));
        Ok(doc)
    }

    /// Rebuild a domain object from an index document source.
    pub fn decode(&self, mut source: Map<String, Value>) -> Result<DomainObject> {
        source.remove(DOC_ID);
        match source.remove(PROPS_JSON) {
            Some(Value::String(raw)) => {
                let props: Value = serde_json::from_str(&raw)?;
                source.insert(PROPS_FIELD.to_string(), props);
            }
            _ => {
                // the flattened list alone is write-only
                if matches!(source.get(PROPS_FIELD), Some(Value::Array(_))) {
                    source.remove(PROPS_FIELD);
                }
            }
        }
        Ok(serde_json::from_value(Value::Object(source))?)
    }
}

/// Flatten a properties map into `{k, v}` / `{k, vn}` pairs.
///
/// Nested map keys are joined with `-`, list elements get a `-{index}` suffix.
/// Numbers land in `vn`, every other scalar in `v` as text. Nulls and empty
/// containers produce nothing.
pub fn flatten_properties(props: &BTreeMap<String, PropertyValue>) -> Vec<Value> {
    let mut out = Vec::new();
    let mut stack: Vec<(String, &PropertyValue)> =
        props.iter().rev().map(|(k, v)| (k.clone(), v)).collect();

    while let Some((key, value)) = stack.pop() {
        match value {
            PropertyValue::Null => {}
            PropertyValue::Map(map) => {
                for (k, v) in map.iter().rev() {
                    stack.push((format!("{key}-{k}"), v));
                }
            }
            PropertyValue::List(items) => {
                for (i, v) in items.iter().enumerate().rev() {
                    stack.push((format!("{key}-{i}"), v));
                }
            }
            PropertyValue::Number(n) => out.push(json!({"k": key, "vn": n})),
            PropertyValue::Bool(b) => out.push(json!({"k": key, "v": b.to_string()})),
            PropertyValue::String(s) => out.push(json!({"k": key, "v": s})),
        }
    }
    out
}
