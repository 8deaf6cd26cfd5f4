//! Image transformation: fetch the original, resize, re-encode.
//!
//! The optimizer only depends on the [`Transformer`] trait. [`ImageTransformer`]
//! is the production implementation:
//!
//! | Step | Implementation |
//! |---|---|
//! | Fetch | [`fetch::SourceFetcher`] (`reqwest`, size and redirect limits) |
//! | Decode / resize / encode | [`codec::transform_bytes`] (`image` crate, on the blocking pool) |

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::config::ImageConfig;

pub mod codec;
pub mod fetch;
pub mod params;

pub use codec::CodecSettings;
pub use fetch::SourceFetcher;
pub use params::{OutputFormat, TransformParams, UnknownFormat};

/// Why a transform produced no bytes.
#[derive(Debug, Error)]
pub enum TransformError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Failed to fetch image: {url}: {reason}")]
    Fetch { url: String, reason: String },

    #[error("Failed to fetch image: {url}: upstream responded {status}")]
    Status { url: String, status: u16 },

    #[error("Failed to fetch image: {url}: body exceeds {limit} bytes")]
    TooLarge { url: String, limit: usize },

    #[error("source is not a decodable image: {0}")]
    Decode(#[source] image::ImageError),

    #[error("failed to encode image: {0}")]
    Encode(#[source] image::ImageError),

    #[error("transform worker failed: {0}")]
    Worker(String),
}

impl TransformError {
    /// `true` when the origin, not the image data, is at fault.
    pub fn is_upstream(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. } | Self::Status { .. } | Self::TooLarge { .. }
        )
    }
}

/// Produces transformed image bytes for a resolved source URL.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, src: &Url, params: &TransformParams) -> Result<Bytes, TransformError>;
}

/// Fetches over HTTP and transforms with the `image` crate.
pub struct ImageTransformer {
    fetcher: SourceFetcher,
    settings: CodecSettings,
}

impl ImageTransformer {
    /// Builds a transformer from the fetch and codec settings in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Client`] if the HTTP client cannot be built.
    pub fn new(config: &ImageConfig) -> Result<Self, TransformError> {
        Ok(Self {
            fetcher: SourceFetcher::new(config)?,
            settings: CodecSettings::from(config),
        })
    }
}

#[async_trait]
impl Transformer for ImageTransformer {
    async fn transform(&self, src: &Url, params: &TransformParams) -> Result<Bytes, TransformError> {
        let original = self.fetcher.fetch(src).await?;
        let settings = self.settings;
        // Encode to the format the response will advertise, judged by the
        // source path rather than the sniffed bytes.
        let mut params = *params;
        if let Some(target) = params.target_format(src.path(), settings.fallback_format) {
            params.format = target;
        }
        let input_len = original.len();

        let output = tokio::task::spawn_blocking(move || {
            codec::transform_bytes(&original, &params, &settings)
        })
        .await
        .map_err(|e| TransformError::Worker(e.to_string()))??;

        debug!(src = %src, input_bytes = input_len, output_bytes = output.len(), "image transformed");
        Ok(output)
    }
}
