// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types shared by the cluster client, translator and service facade.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("Cluster request failed: {0}")]
    Cluster(String),
    #[error("Cluster returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("Index not found: {0}")]
    IndexNotFound(String),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Query exceeds maximum nesting depth of {max}")]
    QueryDepthExceeded { max: usize },
    #[error("Invalid query: {0}")]
    InvalidQuery(String),
    #[error("Indexing failed: {0}")]
    IndexingFailed(String),
    #[error("Search service not started")]
    NotStarted,
    #[error("Data store error: {0}")]
    Store(#[from] crate::storage::traits::StoreError),
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => SearchError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            },
            None => SearchError::Cluster(err.to_string()),
        }
    }
}

impl SearchError {
    /// True for errors that mean the target index or alias does not exist.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SearchError::IndexNotFound(_) | SearchError::Status { status: 404, .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SearchError>;
