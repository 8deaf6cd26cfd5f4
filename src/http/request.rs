//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::collections::HashMap;

use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete, more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },
}

/// A fully parsed HTTP/1.1 request.
///
/// Query parameters are percent-decoded with `application/x-www-form-urlencoded`
/// rules. When a key repeats, the first occurrence wins, so
/// `?src=a&src=b` resolves `src` to `a`.
///
/// # Examples
///
/// ```
/// use imgopt::http::Request;
///
/// let raw = b"GET /optimized-image?src=%2Fimg%2Fcat.png&w=640 HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.path(), "/optimized-image");
/// assert_eq!(request.query_param("src"), Some("/img/cat.png"));
/// assert_eq!(request.query_param("w"), Some("640"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    path: String,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    params: HashMap<String, String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body
    /// begins in `buf`.
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] if the header block is not complete yet.
    /// - [`RequestError::Parse`] if the data is malformed.
    /// - [`RequestError::MissingField`] if method, path, or version is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method: Method = match raw_req.method {
            Some(m) => match m.parse() {
                Ok(method) => method,
                Err(never) => match never {},
            },
            None => return Err(RequestError::MissingField { field: "method" }),
        };

        let raw_path = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (path, query) = match raw_path.split_once('?') {
            Some((path, query)) => (path.to_owned(), Some(query.to_owned())),
            None => (raw_path.to_owned(), None),
        };

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();

        Ok((
            Self {
                method,
                path,
                version,
                headers: header_map,
                query,
                params,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request path (without the query string).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a decoded query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1,
        }
    }

    /// Returns the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Decodes a query string, keeping the first value for repeated keys.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        params
            .entry(key.into_owned())
            .or_insert_with(|| value.into_owned());
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_get() {
        let raw = b"GET /healthz HTTP/1.1\r\nHost: localhost\r\n\r\n";
        let (req, offset) = Request::parse(raw).unwrap();
        assert_eq!(req.method(), &Method::Get);
        assert_eq!(req.path(), "/healthz");
        assert_eq!(req.version(), 1);
        assert_eq!(req.headers().get("host"), Some("localhost"));
        assert_eq!(offset, raw.len());
    }

    #[test]
    fn query_params_are_percent_decoded() {
        let raw = b"GET /optimized-image?src=https%3A%2F%2Fcdn.example.com%2Fa%20b.jpg&f=webp HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(
            req.query_param("src"),
            Some("https://cdn.example.com/a b.jpg")
        );
        assert_eq!(req.query_param("f"), Some("webp"));
    }

    #[test]
    fn unencoded_url_in_query_survives() {
        let raw = b"GET /optimized-image?src=https://example.com/image.jpg&w=800 HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("src"), Some("https://example.com/image.jpg"));
        assert_eq!(req.query_param("w"), Some("800"));
    }

    #[test]
    fn first_repeated_param_wins() {
        let raw = b"GET /i?w=10&w=20 HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("w"), Some("10"));
    }

    #[test]
    fn empty_param_is_present() {
        let raw = b"GET /i?w=&src=x HTTP/1.1\r\nHost: x\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert_eq!(req.query_param("w"), Some(""));
        assert_eq!(req.query_param("h"), None);
    }

    #[test]
    fn incomplete_request() {
        let raw = b"GET / HTTP/1.1\r\nHost:";
        assert!(matches!(Request::parse(raw), Err(RequestError::Incomplete)));
    }

    #[test]
    fn connection_close() {
        let raw = b"GET / HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }

    #[test]
    fn http10_defaults_to_close() {
        let raw = b"GET / HTTP/1.0\r\nHost: localhost\r\n\r\n";
        let (req, _) = Request::parse(raw).unwrap();
        assert!(!req.is_keep_alive());
    }
}
