//! The request orchestrator.
//!
//! Every image request runs `RESOLVE -> LOOKUP -> {HIT, STALE, MISS} -> RESPOND`:
//!
//! | Lookup result | Action | `x-image-cache` |
//! |---|---|---|
//! | fresh entry | serve cached bytes | `HIT` |
//! | expired entry | serve cached bytes, refresh in the background | `STALE` |
//! | no entry | transform now, store, serve | `MISS` |
//!
//! Validation and domain checks run before the cache is touched.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::background::{ErrorSink, Revalidator};
use crate::cache::{CacheStore, build_key};
use crate::config::ImageConfig;
use crate::http::{Request, Response, StatusCode};
use crate::router::Router;
use crate::transform::{TransformParams, Transformer};

pub mod error;
pub mod params;

pub use error::{ImageError, PolicyError, ValidationError};

/// Response header reporting how the cache served a request.
pub const CACHE_STATUS_HEADER: &str = "x-image-cache";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Stale,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Stale => "STALE",
            Self::Miss => "MISS",
        }
    }
}

impl fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A successfully served image.
#[derive(Debug, Clone)]
pub struct Optimized {
    pub data: Bytes,
    pub content_type: &'static str,
    pub cache_status: CacheStatus,
    pub cache_control: String,
}

impl Optimized {
    pub fn into_response(self) -> Response {
        Response::new(StatusCode::Ok)
            .header("Content-Type", self.content_type)
            .header("Cache-Control", self.cache_control)
            .header(CACHE_STATUS_HEADER, self.cache_status.as_str())
            .body_bytes(self.data)
    }
}

/// Serves transformed images through a [`CacheStore`].
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use imgopt::cache::MemoryCacheStore;
/// use imgopt::config::ImageConfig;
/// use imgopt::optimizer::Optimizer;
/// use imgopt::router::Router;
/// use imgopt::transform::ImageTransformer;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = Arc::new(ImageConfig::default());
/// let transformer = Arc::new(ImageTransformer::new(&config)?);
/// let optimizer = Arc::new(Optimizer::new(config, Arc::new(MemoryCacheStore::new()), transformer));
///
/// let mut router = Router::new();
/// optimizer.mount(&mut router);
/// # Ok(())
/// # }
/// ```
pub struct Optimizer {
    config: RwLock<Arc<ImageConfig>>,
    store: Arc<dyn CacheStore>,
    transformer: Arc<dyn Transformer>,
    revalidator: Revalidator,
}

impl Optimizer {
    pub fn new(
        config: Arc<ImageConfig>,
        store: Arc<dyn CacheStore>,
        transformer: Arc<dyn Transformer>,
    ) -> Self {
        let revalidator = Revalidator::new(Arc::clone(&store), Arc::clone(&transformer));
        Self {
            config: RwLock::new(config),
            store,
            transformer,
            revalidator,
        }
    }

    /// Routes background failures (and MISS-path transform failures) to `sink`.
    pub fn with_error_sink(mut self, sink: Arc<dyn ErrorSink>) -> Self {
        self.revalidator = self.revalidator.with_error_sink(sink);
        self
    }

    /// The configuration snapshot new requests will use.
    pub fn config(&self) -> Arc<ImageConfig> {
        Arc::clone(&self.config.read())
    }

    /// Swaps in a new configuration. Requests already past RESOLVE keep the old one.
    pub fn reload(&self, config: ImageConfig) {
        *self.config.write() = Arc::new(config);
        info!("image configuration reloaded");
    }

    pub fn revalidator(&self) -> &Revalidator {
        &self.revalidator
    }

    /// Registers the optimizer endpoint on `router` at `config.route`.
    pub fn mount(self: &Arc<Self>, router: &mut Router) {
        let route = self.config().route.clone();
        let this = Arc::clone(self);
        router.get(&route, move |request: Request| {
            let this = Arc::clone(&this);
            async move { this.handle(&request).await }
        });
    }

    /// Removes the cached variant of `src` for `params`.
    pub async fn evict(&self, src: &Url, params: &TransformParams) {
        let key = build_key(src, params, self.config().fallback_format);
        self.store.delete(&key).await;
        debug!(key = %key, src = %src, "evicted");
    }

    /// Runs the full pipeline and renders the outcome, success or error.
    pub async fn handle(&self, request: &Request) -> Response {
        match self.optimize(request).await {
            Ok(optimized) => optimized.into_response(),
            Err(e) => {
                if e.status().is_server_error() {
                    let upstream = matches!(&e, ImageError::Transform(t) if t.is_upstream());
                    warn!(error = %e, upstream, "image request failed");
                } else {
                    debug!(error = %e, "image request rejected");
                }
                e.to_response()
            }
        }
    }

    /// Resolves, looks up, and (on a miss) transforms the image `request` names.
    ///
    /// # Errors
    ///
    /// - [`ImageError::Validation`] for a missing or malformed `src`, `w`, `h`, `q` or `f`.
    /// - [`ImageError::Policy`] when the source host is not allowed.
    /// - [`ImageError::Transform`] when a MISS cannot be transformed.
    pub async fn optimize(&self, request: &Request) -> Result<Optimized, ImageError> {
        let config = self.config();

        let src = params::resolve_source(request, &config)?;
        params::check_domain(&src, &config)?;
        let transform = params::parse_params(request)?;

        let key = build_key(&src, &transform, config.fallback_format);
        let ttl = config.cache_ttl();

        let (data, cache_status) = match self.store.get(&key).await {
            Some(entry) if entry.is_fresh_at(Utc::now()) => (entry.data, CacheStatus::Hit),
            Some(entry) => {
                // Ignoring the handle: the response never waits on the refresh.
                let _ = self
                    .revalidator
                    .schedule(key.clone(), src.clone(), transform, ttl);
                (entry.data, CacheStatus::Stale)
            }
            None => {
                let data = match self.transformer.transform(&src, &transform).await {
                    Ok(data) => data,
                    Err(e) => {
                        self.revalidator
                            .error_sink()
                            .report(&format!("transforming {src}"), &e);
                        return Err(e.into());
                    }
                };
                self.store.set(&key, data.clone(), ttl).await;
                (data, CacheStatus::Miss)
            }
        };

        Ok(Optimized {
            data,
            content_type: transform.output_content_type(src.path(), config.fallback_format),
            cache_status,
            cache_control: config.cache_control(),
        })
    }
}
