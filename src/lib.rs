//! # VAU Tunnel
//!
//! A client-side engine for the VAU secure tunneling protocol, which
//! establishes an encrypted channel over plain HTTP POST endpoints and then
//! carries arbitrary HTTP-shaped requests and responses as opaque encrypted
//! payloads inside that channel.
//!
//! ## Features
//!
//! - **4-message handshake** driving a pluggable key-encapsulation crypto
//!   backend to an established channel with a server-issued connection id
//! - **Pseudo-HTTP codec** framing application requests into the HTTP/1.1-like
//!   plaintext the channel carries, and recovering structured responses
//!   without a trustworthy length header
//! - **Secure messaging** with encrypt-before-send / decrypt-after-receive
//!   around every exchange
//! - **Transparent interception** of an outgoing request pipeline, so
//!   downstream API clients never see the tunnel
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                 Application Layer                    │
//! │        (domain API clients, generic requests)        │
//! ├─────────────────────────────────────────────────────┤
//! │                Interception Layer                    │
//! │      (pipeline stage, per-destination providers)     │
//! ├─────────────────────────────────────────────────────┤
//! │                   Tunnel Layer                       │
//! │        (handshake state machine, messenger)          │
//! ├─────────────────────────────────────────────────────┤
//! │                   Codec Layer                        │
//! │         (pseudo-HTTP encode/decode, framing)         │
//! ├─────────────────────────────────────────────────────┤
//! │                 Transport Layer                      │
//! │          (HTTP POST over TCP, optional TLS)          │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod http;
pub mod pipeline;
pub mod transport;
pub mod tunnel;

pub use tunnel::{ConnectionId, VauClient, VauStatus};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Path of the handshake endpoint, relative to the server base address
pub const HANDSHAKE_PATH: &str = "VAU";

/// Response header carrying the server-issued connection identifier
pub const CID_HEADER: &str = "VAU-CID";

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Tunnel error: {0}")]
    Tunnel(#[from] tunnel::TunnelError),

    #[error("Configuration error: {0}")]
    Config(String),
}
