use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use super::traits::{DataStore, StoreError};
use crate::object::DomainObject;
use crate::search::Pager;

/// Primary store kept in memory, pages ordered by object id.
#[derive(Debug, Default)]
pub struct InMemoryDataStore {
    apps: DashMap<String, BTreeMap<String, DomainObject>>,
    unavailable: AtomicBool,
}

impl InMemoryDataStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, obj: DomainObject) {
        self.apps.entry(obj.appid.clone()).or_default().insert(obj.id.clone(), obj);
    }

    pub fn put_all(&self, objects: impl IntoIterator<Item = DomainObject>) {
        for obj in objects {
            self.put(obj);
        }
    }

    pub fn remove(&self, appid: &str, id: &str) -> Option<DomainObject> {
        self.apps.get_mut(appid).and_then(|mut objects| objects.remove(id))
    }

    /// Objects stored for `appid`
    #[must_use]
    pub fn len(&self, appid: &str) -> usize {
        self.apps.get(appid).map_or(0, |objects| objects.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.apps.iter().all(|objects| objects.is_empty())
    }

    pub fn clear(&self) {
        self.apps.clear();
    }

    /// Fail every read until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        Ok(())
    }
}

#[async_trait]
impl DataStore for InMemoryDataStore {
    async fn read_page(&self, appid: &str, pager: &mut Pager) -> Result<Vec<DomainObject>, StoreError> {
        self.check_available()?;
        let Some(objects) = self.apps.get(appid) else {
            return Ok(Vec::new());
        };
        let limit = pager.limit.max(1);
        let page: Vec<DomainObject> = match pager.last_key.as_deref() {
            Some(last) => objects
                .range::<str, _>((std::ops::Bound::Excluded(last), std::ops::Bound::Unbounded))
                .take(limit)
                .map(|(_, obj)| obj.clone())
                .collect(),
            None => objects.values().take(limit).cloned().collect(),
        };
        if let Some(last) = page.last() {
            pager.last_key = Some(last.id.clone());
            pager.page += 1;
            pager.count += page.len() as u64;
        }
        Ok(page)
    }

    async fn read_all(&self, appid: &str, ids: &[String]) -> Result<HashMap<String, DomainObject>, StoreError> {
        self.check_available()?;
        let Some(objects) = self.apps.get(appid) else {
            return Ok(HashMap::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| objects.get(id).map(|obj| (id.clone(), obj.clone())))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store_with(n: usize) -> InMemoryDataStore {
        let store = InMemoryDataStore::new();
        store.put_all((0..n).map(|i| DomainObject::new(format!("id{i:02}"), "thing", "app")));
        store
    }

    #[tokio::test]
    async fn test_read_pages_until_empty() {
        let store = store_with(5);
        let mut pager = Pager::new(2);
        let mut seen = Vec::new();
        loop {
            let page = store.read_page("app", &mut pager).await.unwrap();
            if page.is_empty() {
                break;
            }
            seen.extend(page.into_iter().map(|o| o.id));
        }
        assert_eq!(seen, vec!["id00", "id01", "id02", "id03", "id04"]);
        assert_eq!(pager.count, 5);
    }

    #[tokio::test]
    async fn test_read_all_skips_unknown_ids() {
        let store = store_with(3);
        let found = store
            .read_all("app", &["id01".to_string(), "nope".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("id01"));
        assert!(store.read_all("other", &["id01".to_string()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unavailable_store_errors() {
        let store = store_with(1);
        store.set_unavailable(true);
        assert!(store.read_page("app", &mut Pager::new(10)).await.is_err());
        store.set_unavailable(false);
        assert_eq!(store.len("app"), 1);
        assert!(store.remove("app", "id00").is_some());
        assert!(store.is_empty());
    }
}
