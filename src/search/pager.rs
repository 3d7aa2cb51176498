//! Paging and sort translation.
//!
//! A [`Pager`] carries both offset paging (`page`/`limit`) and cursor paging
//! (`last_key`, the `_docid` of the last hit of the previous page).

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::codec::{DOC_ID, PROPS_PREFIX};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    fn from_desc(desc: bool) -> Self {
        if desc { SortOrder::Desc } else { SortOrder::Asc }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort criterion of a search request.
#[derive(Debug, Clone, PartialEq)]
pub enum SortField {
    Score,
    Field { field: String, order: SortOrder },
    /// Sort on `properties.vn` of the nested entry whose `k` equals `key`
    Nested { key: String, order: SortOrder },
}

impl SortField {
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            SortField::Score => json!({"_score": {"order": "desc"}}),
            SortField::Field { field, order } => json!({ field.as_str(): {"order": order.as_str()} }),
            SortField::Nested { key, order } => json!({
                "properties.vn": {
                    "order": order.as_str(),
                    "nested": {
                        "path": "properties",
                        "filter": {"match": {"properties.k": {"query": key, "operator": "and"}}}
                    }
                }
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pager {
    pub page: u64,
    pub limit: usize,
    /// "field[:asc|:desc],..."; blank sorts by score
    pub sortby: String,
    pub desc: bool,
    /// `_docid` of the last hit seen
    pub last_key: Option<String>,
    /// Total hits of the last search
    pub count: u64,
}

impl Default for Pager {
    fn default() -> Self {
        Self {
            page: 0,
            limit: 30,
            sortby: String::new(),
            desc: true,
            last_key: None,
            count: 0,
        }
    }
}

impl Pager {
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self { limit, ..Default::default() }
    }

    #[must_use]
    pub fn with_page(mut self, page: u64) -> Self {
        self.page = page;
        self
    }

    #[must_use]
    pub fn with_sort(mut self, sortby: impl Into<String>, desc: bool) -> Self {
        self.sortby = sortby.into();
        self.desc = desc;
        self
    }

    /// Search-after applies on the first page once a cursor is known.
    #[must_use]
    pub fn uses_search_after(&self) -> bool {
        self.page <= 1 && self.last_key.as_deref().is_some_and(|k| !k.trim().is_empty())
    }

    /// Offset of the first hit; pages outside `1..=max_pages` start at 0.
    #[must_use]
    pub fn start(&self, max_pages: u64) -> usize {
        if self.page >= 1 && self.page <= max_pages {
            ((self.page - 1) as usize).saturating_mul(self.limit)
        } else {
            0
        }
    }

    /// Sort criteria for the next request.
    #[must_use]
    pub fn sort_fields(&self, nested_mode: bool) -> Vec<SortField> {
        if self.uses_search_after() {
            return vec![SortField::Field {
                field: DOC_ID.to_string(),
                order: SortOrder::from_desc(self.desc),
            }];
        }
        if self.sortby.trim().is_empty() {
            return vec![SortField::Score];
        }
        self.sortby
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|part| {
                let (field, order) = match part.rsplit_once(':') {
                    Some((f, "asc")) => (f.trim(), SortOrder::Asc),
                    Some((f, "desc")) => (f.trim(), SortOrder::Desc),
                    _ => (part, SortOrder::from_desc(self.desc)),
                };
                match field.strip_prefix(PROPS_PREFIX) {
                    Some(key) if nested_mode => SortField::Nested { key: key.to_string(), order },
                    _ => SortField::Field { field: field.to_string(), order },
                }
            })
            .collect()
    }

    /// The search-after cursor as a sort value.
    #[must_use]
    pub fn search_after(&self) -> Option<Vec<Value>> {
        if !self.uses_search_after() {
            return None;
        }
        let key = self.last_key.as_deref()?.trim();
        Some(vec![key.parse::<i64>().map_or_else(|_| Value::from(key), Value::from)])
    }
}
