//! Deterministic cache keys for transform requests.

use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};
use url::Url;

use crate::transform::params::{OutputFormat, TransformParams};

/// Payload extension for keys built from a bare digest.
const FALLBACK_EXTENSION: &str = "jpeg";

/// A 64-character lowercase hex fingerprint of a resolved source URL and
/// its transform parameters.
///
/// The key also remembers a payload file extension. That hint only names
/// files on disk; equality and hashing use the digest.
#[derive(Debug, Clone)]
pub struct CacheKey {
    digest: String,
    extension: &'static str,
}

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    /// Extension for payload files written under this key.
    pub fn extension(&self) -> &'static str {
        self.extension
    }

    /// Wraps an existing digest. Mostly useful for tests and tooling that
    /// address entries directly.
    pub fn from_digest(digest: impl Into<String>) -> Self {
        Self {
            digest: digest.into(),
            extension: FALLBACK_EXTENSION,
        }
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for CacheKey {}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.digest.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.digest)
    }
}

// Field order is fixed by the struct, which keeps the serialization canonical.
#[derive(Serialize)]
struct KeyMaterial<'a> {
    src: &'a str,
    #[serde(flatten)]
    params: &'a TransformParams,
}

/// Builds the cache key for `resolved_src` transformed with `params`.
///
/// `fallback` is the encoding `f=auto` re-encodes unsupported sources to. It
/// only picks the payload file extension and never changes the digest.
///
/// # Examples
///
/// ```
/// use imgopt::cache::build_key;
/// use imgopt::transform::{OutputFormat, TransformParams};
/// use url::Url;
///
/// let src = Url::parse("https://cdn.example.com/cat.png").unwrap();
/// let a = build_key(&src, &TransformParams::default(), OutputFormat::Webp);
/// let b = build_key(&src, &TransformParams { width: Some(10), ..Default::default() }, OutputFormat::Webp);
/// assert_eq!(a.as_str().len(), 64);
/// assert_ne!(a, b);
/// ```
pub fn build_key(resolved_src: &Url, params: &TransformParams, fallback: OutputFormat) -> CacheKey {
    let material = KeyMaterial {
        src: resolved_src.as_str(),
        params,
    };
    // Serializing plain strings, integers and unit enums cannot fail.
    let canonical = serde_json::to_vec(&material).unwrap_or_default();

    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    let digest = hex::encode(hasher.finalize());

    let extension = params.output_extension(resolved_src.path(), fallback);

    CacheKey { digest, extension }
}
