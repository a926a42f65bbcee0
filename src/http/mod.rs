//! Outer HTTP message model
//!
//! The request/response types the transport executes, the interception
//! pipeline rewrites, and the tunnel encrypts and decrypts in place. Header
//! order is preserved because the pseudo-HTTP wire form is order-sensitive.

use bytes::Bytes;
use url::Url;

use crate::transport::TransportError;

/// Media type constants used on the wire
pub mod media_type {
    /// Content type of the handshake messages
    pub const CBOR: &str = "application/cbor";
    /// Content type of every post-handshake encrypted message
    pub const OCTET_STREAM: &str = "application/octet-stream";
    /// Content type of the decoded status record
    pub const JSON: &str = "application/json";
}

/// Header name constants
pub mod header {
    pub const ACCEPT: &str = "Accept";
    pub const CONTENT_TYPE: &str = "Content-Type";
    pub const CONTENT_LENGTH: &str = "Content-Length";
    pub const LOCATION: &str = "Location";
}

/// An outgoing request before (or after) tunnel interception.
///
/// Generic headers and content headers are kept apart: the pseudo-HTTP wire
/// form emits them as separate ordered groups, and content headers travel
/// with the body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Request method token (e.g. `GET`, `POST`)
    pub method: String,
    /// Full destination URL
    pub url: Url,
    /// Protocol version string (e.g. `1.1`)
    pub version: String,
    /// Generic headers in insertion order
    pub headers: Vec<(String, String)>,
    /// Content headers in insertion order, only meaningful with a body
    pub content_headers: Vec<(String, String)>,
    /// Optional body bytes
    pub body: Option<Bytes>,
    /// Whether the terminal pipeline stage may follow redirects
    pub follow_redirects: bool,
}

impl HttpRequest {
    /// Create a new request with the given method and destination
    pub fn new(method: impl Into<String>, url: Url) -> Self {
        Self {
            method: method.into(),
            url,
            version: "1.1".to_string(),
            headers: Vec::new(),
            content_headers: Vec::new(),
            body: None,
            follow_redirects: true,
        }
    }

    /// Append a generic header
    pub fn push_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.push((name.into(), value.into()));
    }

    /// Attach a body with its content type
    pub fn with_body(mut self, content_type: &str, body: impl Into<Bytes>) -> Self {
        self.content_headers
            .push((header::CONTENT_TYPE.to_string(), content_type.to_string()));
        self.body = Some(body.into());
        self
    }

    /// First value of the named header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }
}

/// A response as produced by the transport and rewritten by the tunnel.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code
    pub status: u16,
    /// Reason phrase
    pub reason: String,
    /// Headers in arrival order
    pub headers: Vec<(String, String)>,
    /// Content headers in arrival order
    pub content_headers: Vec<(String, String)>,
    /// Optional body bytes
    pub body: Option<Bytes>,
}

impl HttpResponse {
    /// Create a response with the given status line
    pub fn new(status: u16, reason: impl Into<String>) -> Self {
        Self {
            status,
            reason: reason.into(),
            headers: Vec::new(),
            content_headers: Vec::new(),
            body: None,
        }
    }

    /// First value of the named header, case-insensitive
    pub fn header(&self, name: &str) -> Option<&str> {
        first_header(&self.headers, name)
    }

    /// Whether the status code is in the 2xx range
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Fail with the server-supplied status line unless the status is 2xx
    pub fn ensure_success(&self) -> Result<(), TransportError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: self.status,
                reason: self.reason.clone(),
            })
        }
    }

    /// Body bytes, or an empty slice when no body is present
    pub fn body_bytes(&self) -> &[u8] {
        self.body.as_deref().unwrap_or(&[])
    }
}

fn first_header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
