//! Connection identifier and handshake phase
//!
//! The phase is a single tagged enum carrying the connection id in every
//! state where one exists, so "connected" and "has an identifier" cannot
//! diverge. Transitions are strictly forward; a failed handshake leaves the
//! phase where it was, and the instance is unusable for messaging.

use std::fmt;

use super::TunnelError;

/// Server-issued token identifying an established channel.
///
/// Used as a URL path segment for all post-handshake traffic. Immutable once
/// issued; at most one identifier exists per client instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Build from the raw `VAU-CID` header value, stripping a leading `/`
    pub fn new(raw: &str) -> Self {
        Self(raw.strip_prefix('/').unwrap_or(raw).to_string())
    }

    /// The identifier as a relative path segment
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Handshake progress of one channel.
///
/// `Unconnected → AwaitingMessage2 → AwaitingMessage4 → Connected`, forward
/// only. The connection id appears when stage 1 completes and is carried
/// through every later phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// No handshake attempted yet
    Unconnected,
    /// Message 1 sent, identifier issued, message 2 not yet consumed
    AwaitingMessage2 { cid: ConnectionId },
    /// Message 3 produced, final validation outstanding
    AwaitingMessage4 { cid: ConnectionId },
    /// Channel established, secure messaging permitted
    Connected { cid: ConnectionId },
}

impl ConnectionPhase {
    /// Whether secure messaging is permitted
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionPhase::Connected { .. })
    }

    /// The connection id, in any phase that has one
    pub fn cid(&self) -> Option<&ConnectionId> {
        match self {
            ConnectionPhase::Unconnected => None,
            ConnectionPhase::AwaitingMessage2 { cid }
            | ConnectionPhase::AwaitingMessage4 { cid }
            | ConnectionPhase::Connected { cid } => Some(cid),
        }
    }

    /// The connection id of an established channel, or `NotConnected`.
    ///
    /// Guards every messaging operation.
    pub fn ensure_connected(&self) -> Result<&ConnectionId, TunnelError> {
        match self {
            ConnectionPhase::Connected { cid } => Ok(cid),
            _ => Err(TunnelError::NotConnected),
        }
    }
}
