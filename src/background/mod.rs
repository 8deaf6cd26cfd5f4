//! Background revalidation of stale cache entries.
//!
//! A STALE response is served from the old bytes while a detached task
//! re-runs the transform and overwrites the entry. Failures never reach the
//! client; they go to an [`ErrorSink`].

use std::collections::HashSet;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error};
use url::Url;

use crate::cache::{CacheKey, CacheStore};
use crate::transform::{TransformParams, Transformer};

/// Receives failures that happen off the request path.
pub trait ErrorSink: Send + Sync {
    fn report(&self, context: &str, error: &(dyn Error + 'static));
}

/// Default sink: logs through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ErrorSink for TracingSink {
    fn report(&self, context: &str, error: &(dyn Error + 'static)) {
        error!(context, error = %error, "background failure");
    }
}

type InFlight = Arc<Mutex<HashSet<CacheKey>>>;

/// Spawns at most one revalidation per key at a time.
#[derive(Clone)]
pub struct Revalidator {
    store: Arc<dyn CacheStore>,
    transformer: Arc<dyn Transformer>,
    sink: Arc<dyn ErrorSink>,
    in_flight: InFlight,
}

/// Clears the in-flight marker when the task ends, including on panic.
struct InFlightGuard {
    in_flight: InFlight,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.lock().remove(&self.key);
    }
}

impl Revalidator {
    pub fn new(store: Arc<dyn CacheStore>, transformer: Arc<dyn Transformer>) -> Self {
        Self {
            store,
            transformer,
            sink: Arc::new(TracingSink),
            in_flight: Arc::default(),
        }
    }

    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn error_sink(&self) -> &Arc<dyn ErrorSink> {
        &self.sink
    }

    /// `true` while a refresh for `key` is running.
    pub fn is_in_flight(&self, key: &CacheKey) -> bool {
        self.in_flight.lock().contains(key)
    }

    /// Refreshes `key` in the background.
    ///
    /// Returns `None` without spawning when a refresh for the same key is
    /// already running. On success the new bytes are stored with `ttl`; on
    /// failure the stale entry is left in place and the error is reported.
    pub fn schedule(
        &self,
        key: CacheKey,
        src: Url,
        params: TransformParams,
        ttl: Duration,
    ) -> Option<JoinHandle<()>> {
        if !self.in_flight.lock().insert(key.clone()) {
            debug!(key = %key, "revalidation already in flight");
            return None;
        }

        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            key,
        };
        let store = Arc::clone(&self.store);
        let transformer = Arc::clone(&self.transformer);
        let sink = Arc::clone(&self.sink);

        Some(tokio::spawn(async move {
            // Owned by the task so the marker outlives the transform.
            let guard = guard;
            match transformer.transform(&src, &params).await {
                Ok(data) => {
                    store.set(&guard.key, data, ttl).await;
                    debug!(key = %guard.key, src = %src, "revalidated");
                }
                Err(e) => {
                    let context = format!("revalidating {src}");
                    sink.report(&context, &e);
                }
            }
        }))
    }
}
