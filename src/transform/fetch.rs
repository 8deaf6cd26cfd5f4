//! Origin fetches with timeout, size, and redirect limits.

use std::collections::BTreeSet;

use bytes::{Bytes, BytesMut};
use reqwest::{Client, redirect};
use url::Url;

use super::TransformError;
use crate::config::ImageConfig;

const MAX_REDIRECTS: usize = 5;

/// Downloads original images.
///
/// Redirects are followed only to hosts in `allowed_domains`, so a redirect
/// on an allowed origin cannot turn the proxy into an open relay.
pub struct SourceFetcher {
    http: Client,
    max_bytes: usize,
}

impl SourceFetcher {
    pub fn new(config: &ImageConfig) -> Result<Self, TransformError> {
        let allowed: BTreeSet<String> = config
            .allowed_domains
            .iter()
            .map(|d| d.to_ascii_lowercase())
            .collect();

        let policy = redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() >= MAX_REDIRECTS {
                return attempt.error("too many redirects");
            }
            let permitted = attempt
                .url()
                .host_str()
                .is_some_and(|host| allowed.contains(&host.to_ascii_lowercase()));
            if permitted {
                attempt.follow()
            } else {
                attempt.stop()
            }
        });

        let http = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.fetch_timeout())
            .redirect(policy)
            .build()
            .map_err(TransformError::Client)?;

        Ok(Self {
            http,
            max_bytes: config.max_source_bytes,
        })
    }

    /// Fetches `url`, failing on transport errors, non-2xx statuses, and
    /// bodies larger than the configured limit.
    pub async fn fetch(&self, url: &Url) -> Result<Bytes, TransformError> {
        let fetch_error = |e: reqwest::Error| TransformError::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let mut response = self
            .http
            .get(url.as_str())
            .header("Accept", "image/*,*/*;q=0.8")
            .send()
            .await
            .map_err(fetch_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransformError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || TransformError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };

        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes as u64)
        {
            return Err(too_large());
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response.chunk().await.map_err(fetch_error)? {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large());
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves exactly one canned HTTP response on a loopback port.
    async fn serve_once(response: &'static [u8]) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = stream.read(&mut buf).await;
            stream.write_all(response).await.unwrap();
            let _ = stream.shutdown().await;
        });
        Url::parse(&format!("http://127.0.0.1:{}/image.png", addr.port())).unwrap()
    }

    fn config() -> ImageConfig {
        ImageConfig {
            max_source_bytes: 8,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn fetches_body() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 4\r\nConnection: close\r\n\r\nPNG!").await;
        let fetcher = SourceFetcher::new(&config()).unwrap();
        assert_eq!(fetcher.fetch(&url).await.unwrap(), Bytes::from_static(b"PNG!"));
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let url = serve_once(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n").await;
        let fetcher = SourceFetcher::new(&config()).unwrap();
        let err = fetcher.fetch(&url).await.unwrap_err();
        assert!(matches!(err, TransformError::Status { status: 404, .. }));
        assert!(err.is_upstream());
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Length: 12\r\nConnection: close\r\n\r\n0123456789ab").await;
        let fetcher = SourceFetcher::new(&config()).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(TransformError::TooLarge { limit: 8, .. })
        ));
    }

    #[tokio::test]
    async fn redirect_to_foreign_host_is_not_followed() {
        let url = serve_once(
            b"HTTP/1.1 302 Found\r\nLocation: http://evil.invalid/x.png\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        )
        .await;
        let fetcher = SourceFetcher::new(&config()).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(TransformError::Status { status: 302, .. })
        ));
    }

    #[tokio::test]
    async fn connection_refused_is_a_fetch_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let url = Url::parse(&format!("http://127.0.0.1:{port}/a.png")).unwrap();
        let fetcher = SourceFetcher::new(&config()).unwrap();
        assert!(matches!(
            fetcher.fetch(&url).await,
            Err(TransformError::Fetch { .. })
        ));
    }
}
