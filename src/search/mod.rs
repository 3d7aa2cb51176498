// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Search Infrastructure
//!
//! Query translation and index lifecycle for the Elasticsearch-backed index.
//!
//! # Architecture
//!
//! ```text
//! query string ──► parser ──► QueryNode (AST)
//!                                 │
//! terms map ──────────────────────┤
//!                                 ▼
//!                         QueryTranslator ──► EngineQuery ──► cluster JSON
//!                      (nested properties.* rewrite, depth guard)
//!
//! IndexManager: {appid}_{generation} indices behind the `appid` alias
//! ```
//!
//! # Query Language
//!
//! ```text
//! title:dune                     - Field term
//! properties.pages:[100 TO *]    - Range (numeric bounds use properties.vn)
//! name:du*  name:d?ne            - Prefix / wildcard
//! name:dune~                     - Fuzzy
//! title:dune^2                   - Boost
//! a:1 AND (b:2 OR NOT c:3)       - Boolean grouping, also + and -
//! ```
//!
//! # Example
//!
//! ```
//! use search_sync::search::{EngineQuery, QueryTranslator, Terms};
//! use search_sync::PropertyValue;
//!
//! let translator = QueryTranslator::new(true);
//! // unbalanced input degrades to match-all
//! let validated = translator.parse_and_validate("(title:dune");
//! assert!(validated.is_match_all());
//!
//! let terms = Terms::from([("type".to_string(), PropertyValue::from("book"))]);
//! let query = translator.terms_query(&terms, true);
//! assert_eq!(query, Some(EngineQuery::term("type", "book")));
//! ```

pub mod engine_query;
pub mod index_manager;
pub mod mapping;
pub mod pager;
pub mod parser;
pub mod query_builder;
pub mod translator;

pub use engine_query::{BoolQuery, EngineQuery, MatchOperator, RangeBound};
pub use index_manager::{new_index_name, IndexManager};
pub use mapping::{IndexMapping, IndexSettings, MappingFieldType};
pub use pager::{Pager, SortField, SortOrder};
pub use parser::parse_query;
pub use query_builder::{Clause, Occur, QueryBuilder, QueryNode};
pub use translator::{nested_key, QueryTranslator, RangeOp, Terms, ValidatedQuery, MAX_QUERY_DEPTH};
