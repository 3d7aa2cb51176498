// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query Builder - AST for parsed query strings
//!
//! A query string such as `name:Alice AND properties.age:[18 TO *]` parses into
//! a tree of [`QueryNode`]s. The tree is engine-independent; the translator
//! rewrites it into the cluster's query DSL.
//!
//! # Example
//!
//! ```rust
//! use search_sync::search::{Occur, QueryBuilder, QueryNode};
//!
//! let query = QueryBuilder::new()
//!     .term("name", "Alice")
//!     .range("age", Some("18"), None, true, false)
//!     .build_and();
//!
//! match query {
//!     QueryNode::Bool(clauses) => {
//!         assert_eq!(clauses.len(), 2);
//!         assert!(clauses.iter().all(|c| c.occur == Occur::Must));
//!     }
//!     _ => unreachable!(),
//! }
//! ```

use serde::{Deserialize, Serialize};

/// How a clause participates in its enclosing boolean node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Occur {
    Must,
    Should,
    MustNot,
    Filter,
}

/// One clause of a boolean node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clause {
    pub occur: Occur,
    pub query: QueryNode,
}

impl Clause {
    pub fn new(occur: Occur, query: QueryNode) -> Self {
        Self { occur, query }
    }
}

/// Parsed query AST node.
///
/// A blank `field` means the clause had no field qualifier (free text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryNode {
    /// `*` or `*:*`
    MatchAll,
    /// Compound boolean query
    Bool(Vec<Clause>),
    /// field:value (also quoted phrases, kept verbatim)
    Term { field: String, value: String },
    /// field:[lower TO upper]; `None` is an open bound
    Range {
        field: String,
        lower: Option<String>,
        upper: Option<String>,
        include_lower: bool,
        include_upper: bool,
    },
    /// field:val*
    Prefix { field: String, value: String },
    /// field:v?l*e
    Wildcard { field: String, value: String },
    /// field:value~N
    Fuzzy { field: String, value: String, max_edits: Option<u8> },
    /// query^boost
    Boost { query: Box<QueryNode>, boost: f32 },
}

impl QueryNode {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        QueryNode::Term { field: field.into(), value: value.into() }
    }

    /// Field the leaf applies to, `None` for compound nodes.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            QueryNode::Term { field, .. }
            | QueryNode::Range { field, .. }
            | QueryNode::Prefix { field, .. }
            | QueryNode::Wildcard { field, .. }
            | QueryNode::Fuzzy { field, .. } => Some(field),
            QueryNode::Boost { query, .. } => query.field(),
            QueryNode::MatchAll | QueryNode::Bool(_) => None,
        }
    }

    /// Number of nested boolean levels in this tree.
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            QueryNode::Bool(clauses) => {
                1 + clauses.iter().map(|c| c.query.depth()).max().unwrap_or(0)
            }
            QueryNode::Boost { query, .. } => query.depth(),
            _ => 0,
        }
    }
}

/// Collects clauses and combines them into a single node.
#[derive(Debug, Default)]
pub struct QueryBuilder {
    nodes: Vec<(Option<Occur>, QueryNode)>,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn term(self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.node(QueryNode::term(field, value))
    }

    pub fn range(
        self,
        field: impl Into<String>,
        lower: Option<&str>,
        upper: Option<&str>,
        include_lower: bool,
        include_upper: bool,
    ) -> Self {
        self.node(QueryNode::Range {
            field: field.into(),
            lower: lower.map(str::to_string),
            upper: upper.map(str::to_string),
            include_lower,
            include_upper,
        })
    }

    /// Add a node whose occurrence is decided by `build_and`/`build_or`.
    pub fn node(mut self, node: QueryNode) -> Self {
        self.nodes.push((None, node));
        self
    }

    /// Add a node with an explicit occurrence (e.g. `+a`, `-b`).
    pub fn clause(mut self, occur: Occur, node: QueryNode) -> Self {
        self.nodes.push((Some(occur), node));
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// All unmarked nodes become MUST. A single unmarked node is returned as-is.
    pub fn build_and(self) -> QueryNode {
        self.build(Occur::Must)
    }

    /// All unmarked nodes become SHOULD. A single unmarked node is returned as-is.
    pub fn build_or(self) -> QueryNode {
        self.build(Occur::Should)
    }

    fn build(mut self, default: Occur) -> QueryNode {
        match self.nodes.len() {
            0 => QueryNode::MatchAll,
            1 if self.nodes[0].0.is_none() => self.nodes.remove(0).1,
            _ => QueryNode::Bool(
                self.nodes
                    .into_iter()
                    .map(|(occur, query)| Clause::new(occur.unwrap_or(default), query))
                    .collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_node_unwrapped() {
        let node = QueryBuilder::new().term("name", "Alice").build_and();
        assert_eq!(node, QueryNode::term("name", "Alice"));
    }

    #[test]
    fn test_build_or() {
        let node = QueryBuilder::new()
            .term("status", "active")
            .term("status", "pending")
            .build_or();
        match node {
            QueryNode::Bool(clauses) => {
                assert_eq!(clauses.len(), 2);
                assert!(clauses.iter().all(|c| c.occur == Occur::Should));
            }
            _ => panic!("Expected Bool node"),
        }
    }

    #[test]
    fn test_marked_single_clause_stays_compound() {
        let node = QueryBuilder::new()
            .clause(Occur::MustNot, QueryNode::term("deleted", "true"))
            .build_or();
        match node {
            QueryNode::Bool(clauses) => assert_eq!(clauses[0].occur, Occur::MustNot),
            _ => panic!("Expected Bool node"),
        }
    }

    #[test]
    fn test_empty_builder_matches_all() {
        assert_eq!(QueryBuilder::new().build_and(), QueryNode::MatchAll);
    }

    #[test]
    fn test_depth() {
        let inner = QueryBuilder::new().term("a", "1").term("b", "2").build_or();
        let outer = QueryBuilder::new().node(inner).term("c", "3").build_and();
        assert_eq!(outer.depth(), 2);
        assert_eq!(QueryNode::term("x", "y").depth(), 0);
        assert_eq!(QueryNode::term("x", "y").field(), Some("x"));
    }
}
