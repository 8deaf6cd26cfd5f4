//! Cache layer: keys, entries, and the pluggable store.
//!
//! ## Core types
//!
//! - [`CacheKey`] / [`build_key`]: deterministic fingerprint of a transform request.
//! - [`CacheEntry`]: payload bytes plus an absolute expiration.
//! - [`CacheStore`]: async capability set implemented by every backend.
//! - [`FsCacheStore`]: crash-consistent file-system backend.
//! - [`MemoryCacheStore`]: in-process backend, also the test double.
//!
//! Stores never surface I/O errors. A failed read is a miss, a failed write
//! is logged and dropped; caching is an optimization, not a correctness
//! requirement.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

pub mod fs;
pub mod key;
pub mod memory;

pub use fs::FsCacheStore;
pub use key::{CacheKey, build_key};
pub use memory::MemoryCacheStore;

/// A cached payload and the instant it stops being fresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub data: Bytes,
    pub expiration: DateTime<Utc>,
}

impl CacheEntry {
    /// Builds an entry that expires `ttl` after `now`.
    pub fn expiring_in(data: Bytes, ttl: Duration, now: DateTime<Utc>) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expiration = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self { data, expiration }
    }

    /// `true` while `expiration > now`. An entry expiring exactly at `now` is stale.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        self.expiration > now
    }
}

/// Key/value store for transformed images.
///
/// Implementations must tolerate concurrent calls for the same key: after
/// any interleaving of `set`/`update`, a `get` observes exactly one complete
/// write. Last writer wins.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Returns the entry for `key`, or `None` when absent or unreadable.
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry>;

    /// Stores `data` under `key`, expiring `ttl` from now.
    async fn set(&self, key: &CacheKey, data: Bytes, ttl: Duration);

    /// Replaces the entry for `key`. Behaves like [`set`](Self::set) when absent.
    async fn update(&self, key: &CacheKey, data: Bytes, ttl: Duration) {
        self.set(key, data, ttl).await;
    }

    /// Removes the entry for `key`. Missing keys are a no-op.
    async fn delete(&self, key: &CacheKey);

    /// Returns `true` if a readable entry exists for `key`.
    async fn exists(&self, key: &CacheKey) -> bool {
        self.get(key).await.is_some()
    }
}
