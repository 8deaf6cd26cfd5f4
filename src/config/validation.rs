//! Configuration validation rules.

use thiserror::Error;

use crate::config::ImageConfig;
use crate::transform::OutputFormat;

/// Configuration loading and validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.into(),
        reason: reason.into(),
    }
}

impl ImageConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if:
    /// - `default_quality` exceeds 100
    /// - `base_url` is not an absolute http(s) URL
    /// - `route` does not start with `/`
    /// - `fetch_timeout_ms` is below 100ms
    /// - `max_source_bytes` is 0
    /// - `user_agent` or an `allowed_domains` entry is empty
    /// - `fallback_format` is `auto`
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_quality > 100 {
            return Err(invalid("default_quality", "must be between 0 and 100"));
        }

        let base = self.base()?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(invalid("base_url", "must use http or https"));
        }

        if !self.route.starts_with('/') {
            return Err(invalid("route", "must start with '/'"));
        }

        if self.fetch_timeout_ms < 100 {
            return Err(invalid("fetch_timeout_ms", "must be at least 100ms"));
        }

        if self.max_source_bytes == 0 {
            return Err(invalid("max_source_bytes", "must be greater than 0"));
        }

        if self.user_agent.trim().is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.allowed_domains.iter().any(|d| d.trim().is_empty()) {
            return Err(invalid("allowed_domains", "entries must not be empty"));
        }

        if self.fallback_format == OutputFormat::Auto {
            return Err(invalid("fallback_format", "must name a concrete format"));
        }

        if self.allowed_domains.is_empty() {
            tracing::warn!("allowed_domains is empty; every image request will be rejected");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn field_of(result: Result<(), ConfigError>) -> String {
        match result {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn default_config_is_valid() {
        assert!(ImageConfig::default().validate().is_ok());
    }

    #[test]
    fn quality_bounds() {
        let ok = ImageConfig { default_quality: 100, ..Default::default() };
        assert!(ok.validate().is_ok());
        let zero = ImageConfig { default_quality: 0, ..Default::default() };
        assert!(zero.validate().is_ok());
        let bad = ImageConfig { default_quality: 101, ..Default::default() };
        assert_eq!(field_of(bad.validate()), "default_quality");
    }

    #[test]
    fn base_url_must_be_http() {
        let garbage = ImageConfig { base_url: "not a url".into(), ..Default::default() };
        assert_eq!(field_of(garbage.validate()), "base_url");
        let ftp = ImageConfig { base_url: "ftp://files.example.com".into(), ..Default::default() };
        assert_eq!(field_of(ftp.validate()), "base_url");
    }

    #[test]
    fn route_must_be_absolute() {
        let config = ImageConfig { route: "optimized-image".into(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "route");
    }

    #[test]
    fn timeout_and_size_limits() {
        let config = ImageConfig { fetch_timeout_ms: 50, ..Default::default() };
        assert_eq!(field_of(config.validate()), "fetch_timeout_ms");
        let config = ImageConfig { max_source_bytes: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()), "max_source_bytes");
    }

    #[test]
    fn fallback_format_must_be_concrete() {
        let config = ImageConfig { fallback_format: OutputFormat::Auto, ..Default::default() };
        assert_eq!(field_of(config.validate()), "fallback_format");
    }

    #[test]
    fn empty_domain_entry_rejected_but_empty_list_allowed() {
        let config = ImageConfig {
            allowed_domains: BTreeSet::from([String::new()]),
            ..Default::default()
        };
        assert_eq!(field_of(config.validate()), "allowed_domains");

        let config = ImageConfig { allowed_domains: BTreeSet::new(), ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
