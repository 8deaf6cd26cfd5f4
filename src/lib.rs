//! # imgopt
//!
//! An on-demand image optimization proxy with a stale-while-revalidate cache.
//!
//! `GET /optimized-image?src=<url>&w=<int>&h=<int>&q=<int>&f=<auto|webp|png|jpeg|jpg>`
//! fetches `src`, resizes and re-encodes it, and caches the result so repeat
//! requests skip the work. Expired entries are served immediately while a
//! background task refreshes them.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use imgopt::cache::FsCacheStore;
//! use imgopt::config::ImageConfig;
//! use imgopt::optimizer::Optimizer;
//! use imgopt::router::Router;
//! use imgopt::server::Server;
//! use imgopt::transform::ImageTransformer;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Arc::new(ImageConfig::load()?);
//!     let store = Arc::new(FsCacheStore::open(&config.cache_dir).await);
//!     let transformer = Arc::new(ImageTransformer::new(&config)?);
//!     let optimizer = Arc::new(Optimizer::new(config.clone(), store, transformer));
//!
//!     let mut router = Router::new();
//!     optimizer.mount(&mut router);
//!     let router = Arc::new(router);
//!
//!     let server = Server::bind(&config.bind_address).await?;
//!     server.run(move |req| {
//!         let router = Arc::clone(&router);
//!         async move { router.route(req).await }
//!     }).await?;
//!     Ok(())
//! }
//! ```

pub mod background;
pub mod cache;
pub mod config;
pub mod http;
pub mod optimizer;
pub mod router;
pub mod server;
pub mod transform;

pub use cache::{CacheEntry, CacheKey, CacheStore};
pub use config::{ConfigError, ImageConfig};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use optimizer::{CacheStatus, ImageError, Optimizer};
pub use server::{Server, ServerError};
pub use transform::{TransformParams, Transformer};
