use std::sync::Arc;

use imgopt::cache::{CacheStore, FsCacheStore, MemoryCacheStore};
use imgopt::config::{CacheBackend, ImageConfig};
use imgopt::http::{Request, Response, StatusCode};
use imgopt::optimizer::Optimizer;
use imgopt::router::Router;
use imgopt::server::Server;
use imgopt::transform::ImageTransformer;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Arc::new(ImageConfig::load()?);

    let store: Arc<dyn CacheStore> = match config.cache_backend {
        CacheBackend::Fs => Arc::new(FsCacheStore::open(&config.cache_dir).await),
        CacheBackend::Memory => Arc::new(MemoryCacheStore::new()),
    };
    tracing::info!(
        backend = ?config.cache_backend,
        cache_dir = %config.cache_dir.display(),
        "cache ready"
    );

    let transformer = Arc::new(ImageTransformer::new(&config)?);
    let optimizer = Arc::new(Optimizer::new(Arc::clone(&config), store, transformer));

    let mut router = Router::new();
    router.get("/healthz", |_req: Request| async {
        Response::text(StatusCode::Ok, "ok")
    });
    optimizer.mount(&mut router);
    let router = Arc::new(router);

    let server = Server::bind(&config.bind_address).await?;
    server
        .run_until(
            move |req| {
                let router = Arc::clone(&router);
                async move { router.route(req).await }
            },
            async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "failed to listen for ctrl-c");
                }
            },
        )
        .await?;

    Ok(())
}
