//! Static header classification table
//!
//! The pseudo-HTTP decoder routes every header line through this table once:
//! content headers are deferred and attached to the body, recognized response
//! headers go into the response header set, everything else is dropped.

/// How a decoded header line is routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderClass {
    /// Travels with the body (e.g. `Content-Type`, `Content-Length`)
    Content,
    /// Belongs to the response header set
    Response,
}

/// Headers that describe the body rather than the response
const CONTENT_HEADERS: &[&str] = &[
    "Allow",
    "Content-Disposition",
    "Content-Encoding",
    "Content-Language",
    "Content-Length",
    "Content-Location",
    "Content-MD5",
    "Content-Range",
    "Content-Type",
    "Expires",
    "Last-Modified",
];

/// Response headers that survive decoding; anything not listed here or in
/// [`CONTENT_HEADERS`] is silently dropped
const RESPONSE_HEADERS: &[&str] = &[
    "Accept-Ranges",
    "Age",
    "Cache-Control",
    "Connection",
    "Date",
    "ETag",
    "Keep-Alive",
    "Location",
    "Pragma",
    "Proxy-Authenticate",
    "Retry-After",
    "Server",
    "Set-Cookie",
    "Trailer",
    "Transfer-Encoding",
    "Upgrade",
    "Vary",
    "Via",
    "Warning",
    "WWW-Authenticate",
];

/// Classify a header name, case-insensitively
pub fn classify(name: &str) -> Option<HeaderClass> {
    if CONTENT_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
        Some(HeaderClass::Content)
    } else if RESPONSE_HEADERS.iter().any(|h| h.eq_ignore_ascii_case(name)) {
        Some(HeaderClass::Response)
    } else {
        None
    }
}
