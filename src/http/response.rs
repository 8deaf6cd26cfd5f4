//! HTTP/1.1 response builder.
//!
//! Image payloads are held as [`Bytes`] so a cached entry can be handed to
//! the response without copying.

use bytes::{BufMut, Bytes, BytesMut};

use super::{Headers, StatusCode};

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use imgopt::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "image/png")
///     .body_bytes(vec![0x89, b'P', b'N', b'G']);
///
/// let bytes = response.into_bytes();
/// let head = std::str::from_utf8(&bytes[..bytes.len() - 4]).unwrap();
/// assert!(head.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(head.contains("Content-Length: 4\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Bytes,
    keep_alive: bool,
    head_only: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Bytes::new(),
            keep_alive: true,
            head_only: false,
        }
    }

    /// Shorthand for a plain-text response, used for every error body.
    pub fn text(status: StatusCode, body: impl Into<String>) -> Self {
        Self::new(status).body(body)
    }

    /// Appends a response header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets a header in place, replacing any previous value.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.set(name, value);
    }

    /// Sets the response body from a string.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Bytes::from(body.into());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Controls whether `Connection: keep-alive` or `Connection: close` is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Serialize headers only, keeping `Content-Length` of the real body.
    /// Used to answer `HEAD` requests.
    #[must_use]
    pub fn head_only(mut self, head_only: bool) -> Self {
        self.head_only = head_only;
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn body_ref(&self) -> &Bytes {
        &self.body
    }

    /// Serializes the response using HTTP/1.1 wire format.
    ///
    /// Adds `Content-Type: text/plain; charset=utf-8` when the body is
    /// non-empty and no type was set, plus `Connection` and `Content-Length`.
    pub fn into_bytes(mut self) -> BytesMut {
        let content_length = self.body.len();

        if !self.body.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        let connection = if self.keep_alive {
            "keep-alive"
        } else {
            "close"
        };
        self.headers.set("Connection", connection);

        let body_len = if self.head_only { 0 } else { content_length };
        let mut buf = BytesMut::with_capacity(128 + self.headers.len() * 64 + body_len);

        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );
        buf.put(self.headers.to_string().as_bytes());
        buf.put(format!("Content-Length: {content_length}\r\n").as_bytes());
        buf.put(&b"\r\n"[..]);

        if !self.head_only {
            buf.put(self.body);
        }

        buf
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
