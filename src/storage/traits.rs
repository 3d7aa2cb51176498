use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::object::DomainObject;
use crate::search::Pager;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Store backend error: {0}")]
    Backend(String),
    #[error("Store unavailable")]
    Unavailable,
}

/// The primary store the index mirrors.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Next page of an application's objects, in a stable order.
    ///
    /// The store advances `pager` (its `last_key` is a store-specific cursor);
    /// an empty page means the scan is finished.
    async fn read_page(&self, appid: &str, pager: &mut Pager) -> Result<Vec<DomainObject>, StoreError>;

    /// Objects by id; ids the store does not know are absent from the map.
    async fn read_all(&self, appid: &str, ids: &[String]) -> Result<HashMap<String, DomainObject>, StoreError>;
}
