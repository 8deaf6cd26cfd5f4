//! In-process cache backend.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{CacheEntry, CacheKey, CacheStore};

/// A [`CacheStore`] kept entirely in memory.
///
/// Entries vanish with the process. Each write swaps a whole [`CacheEntry`]
/// under the write lock, so readers never see a half-applied update.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, fresh or stale.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Inserts a fully formed entry, including one that is already expired.
    pub async fn insert_entry(&self, key: &CacheKey, entry: CacheEntry) {
        self.entries
            .write()
            .await
            .insert(key.as_str().to_owned(), entry);
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.entries.read().await.get(key.as_str()).cloned()
    }

    async fn set(&self, key: &CacheKey, data: Bytes, ttl: Duration) {
        let entry = CacheEntry::expiring_in(data, ttl, Utc::now());
        self.insert_entry(key, entry).await;
    }

    async fn delete(&self, key: &CacheKey) {
        self.entries.write().await.remove(key.as_str());
    }

    async fn exists(&self, key: &CacheKey) -> bool {
        self.entries.read().await.contains_key(key.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(name: &str) -> CacheKey {
        CacheKey::from_digest(name)
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let store = MemoryCacheStore::new();
        store
            .set(&key("a"), Bytes::from_static(b"test data"), Duration::from_secs(1))
            .await;

        let entry = store.get(&key("a")).await.unwrap();
        assert_eq!(entry.data, Bytes::from_static(b"test data"));
        assert!(entry.expiration > Utc::now());
    }

    #[tokio::test]
    async fn update_on_missing_key_acts_like_set() {
        let store = MemoryCacheStore::new();
        store
            .update(&key("a"), Bytes::from_static(b"new data"), Duration::from_secs(5))
            .await;
        assert_eq!(store.get(&key("a")).await.unwrap().data, Bytes::from_static(b"new data"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = MemoryCacheStore::new();
        store.set(&key("a"), Bytes::from_static(b"x"), Duration::from_secs(5)).await;
        store.delete(&key("a")).await;
        store.delete(&key("a")).await;
        assert!(store.get(&key("a")).await.is_none());
        assert!(!store.exists(&key("a")).await);
        assert!(store.is_empty().await);
    }
}
