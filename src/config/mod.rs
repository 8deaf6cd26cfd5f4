//! Proxy configuration with layered loading.
//!
//! Loading precedence (highest wins):
//!
//! 1. Environment variables prefixed with `IMGOPT_` (lists use TOML array
//!    syntax, e.g. `IMGOPT_ALLOWED_DOMAINS='[cdn.example.com, example.com]'`)
//! 2. TOML file named by `IMGOPT_CONFIG_FILE`, if set
//! 3. Built-in defaults
//!
//! A loaded [`ImageConfig`] is immutable. Components receive it wrapped in an
//! [`Arc`](std::sync::Arc); live changes go through
//! [`Optimizer::reload`](crate::optimizer::Optimizer::reload).

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::transform::OutputFormat;

mod validation;

pub use validation::ConfigError;

/// Which [`CacheStore`](crate::cache::CacheStore) the binary builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// [`FsCacheStore`](crate::cache::FsCacheStore) rooted at `cache_dir`.
    #[default]
    Fs,
    /// [`MemoryCacheStore`](crate::cache::MemoryCacheStore); nothing survives a restart.
    Memory,
}

/// Settings consumed by the optimizer, the transformer, and the binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageConfig {
    /// Seconds a stored variant stays fresh. Also the `max-age` sent to clients.
    pub minimum_cache_ttl: u64,

    /// Seconds advertised as `stale-while-revalidate`.
    pub stale_while_revalidate: u64,

    /// Hostnames the proxy may fetch from. Compared case-insensitively, ports ignored.
    pub allowed_domains: BTreeSet<String>,

    /// Encoder quality (0-100) when a request names a format but no `q`.
    pub default_quality: u8,

    /// Root of the file-system cache.
    pub cache_dir: PathBuf,

    pub cache_backend: CacheBackend,

    /// Base for resolving relative `src` values when the request has no `Host`.
    pub base_url: String,

    pub bind_address: String,

    /// Path the optimizer endpoint is mounted at.
    pub route: String,

    pub fetch_timeout_ms: u64,

    /// Largest origin body the transformer will buffer.
    pub max_source_bytes: usize,

    pub user_agent: String,

    /// Encoding used for `f=auto` when the source format is not one we re-encode.
    pub fallback_format: OutputFormat,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            minimum_cache_ttl: 60,
            stale_while_revalidate: 30,
            allowed_domains: ["cdn.example.com", "localhost", "example.com"]
                .into_iter()
                .map(String::from)
                .collect(),
            default_quality: 75,
            cache_dir: PathBuf::from("./cache/images"),
            cache_backend: CacheBackend::Fs,
            base_url: "http://localhost".into(),
            bind_address: "127.0.0.1:3000".into(),
            route: "/optimized-image".into(),
            fetch_timeout_ms: 10_000,
            max_source_bytes: 20 * 1024 * 1024,
            user_agent: concat!("imgopt/", env!("CARGO_PKG_VERSION")).into(),
            fallback_format: OutputFormat::Webp,
        }
    }
}

impl ImageConfig {
    /// Load configuration from defaults, the optional TOML file, and the environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LoadFailed`] when a source cannot be read or
    /// parsed, and [`ConfigError::Invalid`] when validation fails.
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(path) = std::env::var("IMGOPT_CONFIG_FILE") {
            figment = figment.merge(Toml::file(path));
        }

        figment = figment.merge(Env::prefixed("IMGOPT_").ignore(&["config_file"]));

        Self::from_figment(figment)
    }

    /// Extract and validate a configuration from an arbitrary figment.
    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::LoadFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.minimum_cache_ttl)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// `Cache-Control` value sent with every successful image response.
    pub fn cache_control(&self) -> String {
        format!(
            "public, max-age={}, stale-while-revalidate={}",
            self.minimum_cache_ttl, self.stale_while_revalidate
        )
    }

    /// `true` if `host` is in [`allowed_domains`](Self::allowed_domains).
    pub fn is_allowed_host(&self, host: &str) -> bool {
        self.allowed_domains
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }

    /// Parsed [`base_url`](Self::base_url).
    pub fn base(&self) -> Result<Url, ConfigError> {
        Url::parse(&self.base_url).map_err(|e| ConfigError::Invalid {
            field: "base_url".into(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ImageConfig::default();
        assert_eq!(config.minimum_cache_ttl, 60);
        assert_eq!(config.stale_while_revalidate, 30);
        assert_eq!(config.default_quality, 75);
        assert_eq!(config.cache_dir, PathBuf::from("./cache/images"));
        assert_eq!(config.cache_backend, CacheBackend::Fs);
        assert_eq!(config.route, "/optimized-image");
        assert!(config.is_allowed_host("example.com"));
        assert!(!config.is_allowed_host("disallowed.com"));
    }

    #[test]
    fn cache_control_header() {
        let config = ImageConfig {
            minimum_cache_ttl: 120,
            stale_while_revalidate: 15,
            ..Default::default()
        };
        assert_eq!(
            config.cache_control(),
            "public, max-age=120, stale-while-revalidate=15"
        );
        assert_eq!(config.cache_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn allowed_host_is_case_insensitive() {
        let config = ImageConfig {
            allowed_domains: BTreeSet::from(["CDN.Example.com".to_string()]),
            ..Default::default()
        };
        assert!(config.is_allowed_host("cdn.example.com"));
        assert!(!config.is_allowed_host("example.com"));
    }

    #[test]
    fn toml_overrides_defaults() {
        let figment = Figment::from(Serialized::defaults(ImageConfig::default())).merge(
            Toml::string(
                r#"
                minimum_cache_ttl = 300
                allowed_domains = ["images.test"]
                cache_backend = "memory"
                fallback_format = "png"
                "#,
            ),
        );
        let config = ImageConfig::from_figment(figment).unwrap();
        assert_eq!(config.minimum_cache_ttl, 300);
        assert_eq!(config.cache_backend, CacheBackend::Memory);
        assert_eq!(config.fallback_format, OutputFormat::Png);
        assert!(config.is_allowed_host("images.test"));
        assert!(!config.is_allowed_host("localhost"));
        assert_eq!(config.stale_while_revalidate, 30);
    }

    #[test]
    fn invalid_values_are_rejected_at_load() {
        let figment = Figment::from(Serialized::defaults(ImageConfig::default()))
            .merge(Toml::string("default_quality = 101"));
        assert!(matches!(
            ImageConfig::from_figment(figment),
            Err(ConfigError::Invalid { field, .. }) if field == "default_quality"
        ));
    }

    #[test]
    fn unparseable_source_is_load_failure() {
        let figment = Figment::from(Serialized::defaults(ImageConfig::default()))
            .merge(Toml::string("minimum_cache_ttl = \"soon\""));
        assert!(matches!(
            ImageConfig::from_figment(figment),
            Err(ConfigError::LoadFailed(_))
        ));
    }
}
