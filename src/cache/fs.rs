//! Crash-consistent file-system cache backend.
//!
//! Layout, one directory per key:
//!
//! ```text
//! <root>/
//!     <sha256-hex-of-key>/
//!         <timestamp-ms>.<random-hex>.<ext>   // payload, unique per write
//!         meta.json                           // {"expiration": <epoch-ms>, "payloadFilename": "..."}
//! ```
//!
//! `meta.json` is the only pointer to the current payload. A write lands the
//! payload first (synced), then swaps the metadata in with a rename, then
//! removes superseded payloads. A reader therefore sees the old
//! metadata/payload pair or the new one, never a mix. A reader whose payload
//! was removed by cleanup re-reads the metadata once and follows the new
//! pointer.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{CacheEntry, CacheKey, CacheStore};

const META_FILE: &str = "meta.json";
const TMP_SUFFIX: &str = ".tmp";

/// Writers for the same key always share a stripe.
const WRITE_LOCK_STRIPES: usize = 64;

#[derive(Debug, Error)]
enum FsCacheError {
    #[error("{context} {path}: {source}")]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed metadata: {0}")]
    Meta(#[from] serde_json::Error),

    #[error("metadata names an invalid payload file: {0:?}")]
    BadPayloadName(String),
}

impl FsCacheError {
    fn io<'a>(context: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            context,
            path: path.to_path_buf(),
            source,
        }
    }

    fn is_not_found(&self) -> bool {
        matches!(self, Self::Io { source, .. } if source.kind() == ErrorKind::NotFound)
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryMeta {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    expiration: DateTime<Utc>,
    payload_filename: String,
}

/// File-system [`CacheStore`] rooted at a cache directory.
///
/// # Examples
///
/// ```rust,no_run
/// use std::time::Duration;
/// use bytes::Bytes;
/// use imgopt::cache::{CacheKey, CacheStore, FsCacheStore};
///
/// # async fn demo() {
/// let store = FsCacheStore::open("./cache/images").await;
/// let key = CacheKey::from_digest("0f3a");
/// store.set(&key, Bytes::from_static(b"..."), Duration::from_secs(60)).await;
/// assert!(store.get(&key).await.is_some());
/// # }
/// ```
#[derive(Debug)]
pub struct FsCacheStore {
    root: PathBuf,
    write_locks: Box<[Mutex<()>]>,
}

impl FsCacheStore {
    /// Opens a store at `root`, creating the directory if needed.
    ///
    /// Failing to create the root is logged, not fatal: every write
    /// recreates the directories it needs.
    pub async fn open(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        if let Err(e) = fs::create_dir_all(&root).await {
            warn!(path = %root.display(), error = %e, "failed to create cache directory");
        }
        Self {
            root,
            write_locks: (0..WRITE_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding the payload and metadata for `key`.
    pub fn entry_dir(&self, key: &CacheKey) -> PathBuf {
        self.root.join(entry_id(key))
    }

    fn write_lock(&self, key: &CacheKey) -> &Mutex<()> {
        let slot = entry_id(key)
            .bytes()
            .fold(0usize, |acc, b| acc.wrapping_mul(31).wrapping_add(usize::from(b)));
        &self.write_locks[slot % self.write_locks.len()]
    }

    async fn read_entry(&self, dir: &Path) -> Result<CacheEntry, FsCacheError> {
        let meta = read_meta(dir).await?;
        read_entry_from(dir, meta).await
    }

    async fn write_entry(
        &self,
        key: &CacheKey,
        data: &[u8],
        ttl: Duration,
    ) -> Result<(), FsCacheError> {
        let dir = self.entry_dir(key);
        fs::create_dir_all(&dir)
            .await
            .map_err(FsCacheError::io("creating entry directory", &dir))?;

        let now = Utc::now();
        let payload_filename = format!(
            "{}.{}.{}",
            now.timestamp_millis(),
            Uuid::new_v4().simple(),
            key.extension()
        );
        let payload_path = dir.join(&payload_filename);
        if let Err(e) = write_synced(&payload_path, data).await {
            let _ = fs::remove_file(&payload_path).await;
            return Err(e);
        }

        let meta = EntryMeta {
            expiration: CacheEntry::expiring_in(Bytes::new(), ttl, now).expiration,
            payload_filename,
        };
        let meta_bytes = serde_json::to_vec(&meta)?;

        // Renaming a fully written temp file is what makes the pointer swap atomic.
        let tmp_path = dir.join(format!("{META_FILE}.{}{TMP_SUFFIX}", Uuid::new_v4().simple()));
        let meta_path = dir.join(META_FILE);
        let swapped = match write_synced(&tmp_path, &meta_bytes).await {
            Ok(()) => fs::rename(&tmp_path, &meta_path)
                .await
                .map_err(FsCacheError::io("replacing metadata", &meta_path)),
            Err(e) => Err(e),
        };
        if let Err(e) = swapped {
            let _ = fs::remove_file(&tmp_path).await;
            let _ = fs::remove_file(&payload_path).await;
            return Err(e);
        }

        remove_superseded(&dir, &meta.payload_filename).await;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FsCacheStore {
    async fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        match self.read_entry(&self.entry_dir(key)).await {
            Ok(entry) => Some(entry),
            Err(e) if e.is_not_found() => None,
            Err(e) => {
                debug!(key = %key, error = %e, "unreadable cache entry, treating as miss");
                None
            }
        }
    }

    async fn set(&self, key: &CacheKey, data: Bytes, ttl: Duration) {
        let _guard = self.write_lock(key).lock().await;
        match self.write_entry(key, &data, ttl).await {
            Ok(()) => debug!(key = %key, bytes = data.len(), ttl_secs = ttl.as_secs(), "cache entry written"),
            Err(e) => warn!(key = %key, error = %e, "failed to write cache entry"),
        }
    }

    async fn delete(&self, key: &CacheKey) {
        let _guard = self.write_lock(key).lock().await;
        let dir = self.entry_dir(key);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => debug!(key = %key, "cache entry deleted"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(key = %key, path = %dir.display(), error = %e, "failed to delete cache entry"),
        }
    }

    async fn exists(&self, key: &CacheKey) -> bool {
        let dir = self.entry_dir(key);
        match read_meta(&dir).await {
            Ok(meta) => fs::try_exists(dir.join(&meta.payload_filename))
                .await
                .unwrap_or(false),
            Err(_) => false,
        }
    }
}

fn entry_id(key: &CacheKey) -> String {
    hex::encode(Sha256::digest(key.as_str().as_bytes()))
}

async fn read_meta(dir: &Path) -> Result<EntryMeta, FsCacheError> {
    let meta_path = dir.join(META_FILE);
    let raw = fs::read(&meta_path)
        .await
        .map_err(FsCacheError::io("reading metadata", &meta_path))?;
    let meta: EntryMeta = serde_json::from_slice(&raw)?;
    if !is_plain_file_name(&meta.payload_filename) {
        return Err(FsCacheError::BadPayloadName(meta.payload_filename));
    }
    Ok(meta)
}

/// Loads the payload `meta` points at. If a concurrent write superseded and
/// removed it, the metadata is read again and the newer payload returned.
async fn read_entry_from(dir: &Path, meta: EntryMeta) -> Result<CacheEntry, FsCacheError> {
    match read_payload(dir, meta).await {
        Err(e) if e.is_not_found() => {
            let current = read_meta(dir).await?;
            read_payload(dir, current).await
        }
        other => other,
    }
}

async fn read_payload(dir: &Path, meta: EntryMeta) -> Result<CacheEntry, FsCacheError> {
    let payload_path = dir.join(&meta.payload_filename);
    let data = fs::read(&payload_path)
        .await
        .map_err(FsCacheError::io("reading payload", &payload_path))?;
    Ok(CacheEntry {
        data: Bytes::from(data),
        expiration: meta.expiration,
    })
}

/// Rejects anything that could escape the entry directory.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != META_FILE
        && !name.contains(['/', '\\'])
        && name != "."
        && name != ".."
}

async fn write_synced(path: &Path, data: &[u8]) -> Result<(), FsCacheError> {
    let mut file = fs::File::create(path)
        .await
        .map_err(FsCacheError::io("creating", path))?;
    file.write_all(data)
        .await
        .map_err(FsCacheError::io("writing", path))?;
    file.sync_all()
        .await
        .map_err(FsCacheError::io("syncing", path))?;
    Ok(())
}

/// Best-effort removal of every file in `dir` other than the current pair.
async fn remove_superseded(dir: &Path, current_payload: &str) {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %dir.display(), error = %e, "skipping cleanup of superseded payloads");
            return;
        }
    };

    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if name == META_FILE || name == current_payload {
            continue;
        }
        if let Err(e) = fs::remove_file(entry.path()).await {
            if e.kind() != ErrorKind::NotFound {
                debug!(file = name, error = %e, "failed to remove superseded payload");
            }
        }
    }
}
