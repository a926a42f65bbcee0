//! Tunnel layer - the VAU client
//!
//! Composes the handshake engine, the secure messenger and the pseudo-HTTP
//! codec behind one client type. A client owns its channel crypto for its
//! whole lifetime and serializes all channel access internally, so it can be
//! shared via `Arc` by providers and the interception pipeline.

mod handshake;
mod messenger;
mod state;

pub use messenger::RawReply;
pub use state::{ConnectionId, ConnectionPhase};

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::codec;
use crate::crypto::{ChannelCrypto, CryptoError};
use crate::http::{header, media_type, HttpRequest, HttpResponse};
use crate::transport::{HttpTransport, TransportError};

use handshake::HandshakeEngine;
use messenger::SecureMessenger;

/// The literal status probe carried as plaintext through the channel
pub const STATUS_REQUEST: &[u8] = b"GET /VAU-Status HTTP/1.1\r\nAccept: application/json\r\n\r\n";

/// Tunnel layer errors
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("No connection has been established, call perform_handshake first")]
    NotConnected,

    #[error("Connection has already been established")]
    AlreadyConnected,

    #[error("Protocol violation: {0}")]
    Protocol(String),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Status record decode failed: {0}")]
    StatusDecode(#[from] serde_json::Error),
}

/// Status record of an established channel, as reported by the server
#[derive(Debug, Clone, Deserialize)]
pub struct VauStatus {
    /// Channel type descriptor
    #[serde(rename = "VAU-TYPE", alias = "VAU-Type", alias = "Vau-Type")]
    pub vau_type: String,
    /// Channel protocol version
    #[serde(rename = "VAU-VERSION", alias = "VAU-Version", alias = "Vau-Version")]
    pub vau_version: String,
    /// Descriptor of the authenticated user
    #[serde(
        rename = "USER-AUTHENTICATION",
        alias = "User-Authentication",
        alias = "UserAuthentication"
    )]
    pub user_authentication: String,
    /// Identifier of the server key in use
    #[serde(rename = "KeyID", alias = "KEY-ID", alias = "KeyId")]
    pub key_id: String,
    /// Timestamp the channel was established
    #[serde(
        rename = "CONNECTION-START",
        alias = "Connection-Start",
        alias = "ConnectionStart"
    )]
    pub connection_start: String,
}

impl VauStatus {
    /// Whether the given identity appears in the user-authentication
    /// descriptor
    pub fn is_user_authenticated(&self, id: &str) -> bool {
        self.user_authentication.contains(id)
    }
}

/// Crypto handle and handshake phase, guarded together
struct Channel {
    crypto: Box<dyn ChannelCrypto>,
    phase: ConnectionPhase,
}

/// Client for one VAU channel.
///
/// All operations take `&self`; the channel state sits behind a mutex, which
/// serializes handshake initiation and secure exchanges per instance. There
/// is no reconnect: once the handshake has run, successfully or not, the
/// instance keeps its phase for life.
pub struct VauClient {
    transport: Arc<dyn HttpTransport>,
    channel: Mutex<Channel>,
}

impl std::fmt::Debug for VauClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cid = self
            .channel
            .try_lock()
            .ok()
            .and_then(|c| c.phase.cid().cloned());
        f.debug_struct("VauClient").field("cid", &cid).finish()
    }
}

impl VauClient {
    /// Create a client over the given transport and crypto backend
    pub fn new(transport: Arc<dyn HttpTransport>, crypto: Box<dyn ChannelCrypto>) -> Self {
        Self {
            transport,
            channel: Mutex::new(Channel {
                crypto,
                phase: ConnectionPhase::Unconnected,
            }),
        }
    }

    /// Run the 4-message handshake and store the issued connection id.
    ///
    /// Fails with [`TunnelError::AlreadyConnected`] when a handshake has
    /// already run on this instance.
    pub async fn perform_handshake(&self) -> Result<ConnectionId, TunnelError> {
        let mut channel = self.channel.lock().await;
        let Channel { crypto, phase } = &mut *channel;
        HandshakeEngine::new(crypto.as_mut(), self.transport.as_ref(), phase)
            .perform()
            .await
    }

    /// Whether the channel is established
    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.phase.is_connected()
    }

    /// The connection id, once stage 1 of the handshake has completed
    pub async fn connection_id(&self) -> Option<ConnectionId> {
        self.channel.lock().await.phase.cid().cloned()
    }

    /// Encrypt `plaintext`, exchange it with the server, and return the
    /// decrypted reply together with the transport response
    pub async fn send_raw_message(&self, plaintext: &[u8]) -> Result<RawReply, TunnelError> {
        let mut channel = self.channel.lock().await;
        let Channel { crypto, phase } = &mut *channel;
        SecureMessenger::new(crypto.as_mut(), self.transport.as_ref(), phase)
            .exchange(plaintext)
            .await
    }

    /// Query the channel status record.
    ///
    /// Sends the literal status probe, decodes the decrypted reply as
    /// pseudo-HTTP and parses its JSON body.
    pub async fn get_status(&self) -> Result<VauStatus, TunnelError> {
        let reply = self.send_raw_message(STATUS_REQUEST).await?;
        let decoded = codec::decode_response(&reply.plaintext);

        match decoded.status {
            Some(status) if (200..300).contains(&status) => {}
            other => {
                return Err(TunnelError::Protocol(format!(
                    "status request rejected: {other:?}"
                )))
            }
        }
        let body = decoded
            .body
            .ok_or_else(|| TunnelError::Protocol("status response has no body".to_string()))?;

        Ok(serde_json::from_slice(&body)?)
    }

    /// Encrypt a request in place for the tunnel.
    ///
    /// The structured request is encoded to its pseudo-HTTP form and
    /// encrypted; the request then carries only ciphertext with an
    /// octet-stream content type, accepts octet-stream replies, and is
    /// forced to POST so the transport sees nothing of the original.
    pub async fn encrypt_request(&self, request: &mut HttpRequest) -> Result<(), TunnelError> {
        if request.url.host_str().is_none() {
            return Err(TunnelError::InvalidArgument("request URL has no host"));
        }

        let mut channel = self.channel.lock().await;
        channel.phase.ensure_connected()?;

        let plaintext = codec::encode_request(request);
        let ciphertext = channel.crypto.encrypt(&plaintext)?;
        debug!(
            method = %request.method,
            path = %request.url.path(),
            "request sealed for tunnel"
        );

        request.body = Some(ciphertext.into());
        request.content_headers = vec![(
            header::CONTENT_TYPE.to_string(),
            media_type::OCTET_STREAM.to_string(),
        )];
        request.push_header(header::ACCEPT, media_type::OCTET_STREAM);
        request.method = "POST".to_string();
        Ok(())
    }

    /// Decrypt a response in place.
    ///
    /// The body is decrypted and decoded as pseudo-HTTP; the decoded status,
    /// reason, headers and body then replace what the transport delivered.
    pub async fn decrypt_response(&self, response: &mut HttpResponse) -> Result<(), TunnelError> {
        let mut channel = self.channel.lock().await;
        channel.phase.ensure_connected()?;

        let plaintext = channel.crypto.decrypt(response.body_bytes())?;
        let decoded = codec::decode_response(&plaintext);

        if let Some(status) = decoded.status {
            response.status = status;
        }
        if let Some(reason) = decoded.reason {
            response.reason = reason;
        }
        response.headers.extend(decoded.headers);
        response.content_headers = decoded.content_headers;
        response.body = decoded.body;
        Ok(())
    }
}
