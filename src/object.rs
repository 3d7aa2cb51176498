//! Domain objects and application descriptors.
//!
//! A [`DomainObject`] is the unit that gets indexed. Its well-known
//! attributes are typed fields; everything else travels in `fields`.
//! Custom user data lives in `properties`, an open map of [`PropertyValue`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// A dynamically typed custom property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<PropertyValue>),
    Map(BTreeMap<String, PropertyValue>),
}

impl PropertyValue {
    /// Booleans, numbers and strings.
    #[must_use]
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            PropertyValue::Bool(_) | PropertyValue::Number(_) | PropertyValue::String(_)
        )
    }

    /// Text form of a scalar value, `None` for null and containers.
    #[must_use]
    pub fn as_text(&self) -> Option<String> {
        match self {
            PropertyValue::Bool(b) => Some(b.to_string()),
            PropertyValue::Number(n) => Some(n.to_string()),
            PropertyValue::String(s) => Some(s.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            PropertyValue::Null => Value::Null,
            PropertyValue::Bool(b) => Value::Bool(*b),
            PropertyValue::Number(n) => Value::Number(n.clone()),
            PropertyValue::String(s) => Value::String(s.clone()),
            PropertyValue::List(items) => Value::Array(items.iter().map(Self::to_json).collect()),
            PropertyValue::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect::<Map<String, Value>>(),
            ),
        }
    }
}

impl From<Value> for PropertyValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => PropertyValue::Null,
            Value::Bool(b) => PropertyValue::Bool(b),
            Value::Number(n) => PropertyValue::Number(n),
            Value::String(s) => PropertyValue::String(s),
            Value::Array(items) => PropertyValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                PropertyValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::String(s.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::String(s)
    }
}

impl From<bool> for PropertyValue {
    fn from(b: bool) -> Self {
        PropertyValue::Bool(b)
    }
}

impl From<i64> for PropertyValue {
    fn from(n: i64) -> Self {
        PropertyValue::Number(n.into())
    }
}

impl From<f64> for PropertyValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map_or(PropertyValue::Null, PropertyValue::Number)
    }
}

fn default_stored() -> bool {
    true
}

/// An application object as it is written to and read from the index.
///
/// # Example
///
/// ```
/// use search_sync::{DomainObject, PropertyValue};
///
/// let obj = DomainObject::new("42", "book", "library")
///     .with_name("Dune")
///     .with_property("pages", 412)
///     .with_property("genre", "scifi");
///
/// assert_eq!(obj.object_type, "book");
/// assert_eq!(obj.properties["pages"], PropertyValue::from(412));
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DomainObject {
    pub id: String,
    #[serde(rename = "type", default)]
    pub object_type: String,
    #[serde(default)]
    pub appid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "parentid", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(rename = "creatorid", default, skip_serializing_if = "Option::is_none")]
    pub creator_id: Option<String>,
    /// Creation time (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    /// Last update time (epoch millis)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Whether the object is also persisted in the data store
    #[serde(default = "default_stored")]
    pub stored: bool,
    /// "lat,lng"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latlng: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, PropertyValue>,
    /// Any other annotated attribute
    #[serde(flatten)]
    pub fields: BTreeMap<String, PropertyValue>,
}

impl DomainObject {
    pub fn new(id: impl Into<String>, object_type: impl Into<String>, appid: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            object_type: object_type.into(),
            appid: appid.into(),
            stored: true,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_latlng(mut self, latlng: impl Into<String>) -> Self {
        self.latlng = Some(latlng.into());
        self
    }

    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }
}

/// An application, i.e. a tenant owning one logical index.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct App {
    pub id: String,
    /// Lives inside the root index behind a routed alias
    #[serde(default)]
    pub sharing_index: bool,
}

impl App {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into(), sharing_index: false }
    }

    pub fn shared(id: impl Into<String>) -> Self {
        Self { id: id.into(), sharing_index: true }
    }

    #[must_use]
    pub fn is_root(&self, root_app_id: &str) -> bool {
        self.id == root_app_id
    }
}
