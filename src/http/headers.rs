//! HTTP header map with case-insensitive name lookup.

use std::fmt;

/// A case-insensitive, order-preserving HTTP header map.
///
/// [`insert`](Self::insert) appends, [`set`](Self::set) replaces. Response
/// headers such as `Content-Type` and `x-image-cache` are written with `set`
/// so a later stage can override an earlier default.
///
/// # Examples
///
/// ```
/// use imgopt::http::Headers;
///
/// let mut headers = Headers::new();
/// headers.insert("Content-Type", "text/plain");
/// headers.set("content-type", "image/webp");
///
/// assert_eq!(headers.get("Content-Type"), Some("image/webp"));
/// assert_eq!(headers.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Headers {
    inner: Vec<(String, String)>,
}

impl Headers {
    /// Creates an empty header map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a header map with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Vec::with_capacity(capacity),
        }
    }

    /// Appends a header entry. Multiple values for the same name are preserved.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.inner.push((name.into(), value.into()));
    }

    /// Replaces every entry named `name` with a single entry.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.remove(&name);
        self.inner.push((name, value.into()));
    }

    /// Returns the first value for the given header name (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.inner
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Removes all entries with the given name. Returns `true` if any were removed.
    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.inner.len();
        self.inner.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.inner.len() < before
    }

    /// Returns `true` if the map contains at least one entry with the given name.
    pub fn contains(&self, name: &str) -> bool {
        self.inner.iter().any(|(k, _)| k.eq_ignore_ascii_case(name))
    }

    /// Returns the total number of header entries.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if there are no header entries.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Iterates `(name, value)` pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.inner.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.inner {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn case_insensitive_get() {
        let mut h = Headers::new();
        h.insert("Cache-Control", "public, max-age=60");
        assert_eq!(h.get("cache-control"), Some("public, max-age=60"));
        assert_eq!(h.get("CACHE-CONTROL"), Some("public, max-age=60"));
    }

    #[test]
    fn set_replaces_all_values() {
        let mut h = Headers::new();
        h.insert("X-Image-Cache", "MISS");
        h.insert("x-image-cache", "MISS");
        h.set("x-image-cache", "HIT");
        assert_eq!(h.len(), 1);
        assert_eq!(h.get("X-Image-Cache"), Some("HIT"));
    }

    #[test]
    fn remove() {
        let mut h = Headers::new();
        h.insert("Vary", "Accept");
        assert!(h.remove("vary"));
        assert!(h.is_empty());
        assert!(!h.remove("vary"));
    }

    #[test]
    fn display_is_wire_format() {
        let mut h = Headers::new();
        h.insert("Content-Type", "image/png");
        assert_eq!(h.to_string(), "Content-Type: image/png\r\n");
    }
}
