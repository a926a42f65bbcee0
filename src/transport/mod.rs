//! Transport layer
//!
//! The tunnel talks to the server exclusively through HTTP POST round trips
//! against paths relative to a base address. [`HttpTransport`] is that
//! boundary; [`TcpTransport`] is the default implementation over tokio TCP
//! with optional TLS.

mod tcp;

pub use tcp::TcpTransport;

use async_trait::async_trait;
use std::io;
use thiserror::Error;

use crate::http::HttpResponse;

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Server returned {status} {reason}")]
    Status { status: u16, reason: String },

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("Timeout")]
    Timeout,
}

/// One HTTP POST round trip against the server base address.
///
/// `path` is relative to the base (the handshake endpoint or a connection-id
/// path); the body is sent verbatim with the given content type, and the full
/// response is returned without interpretation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, TransportError>;
}
