//! Handshake engine
//!
//! Drives the channel crypto through the 4-message exchange and its two
//! transport round trips. No step is retried: a rejected message or a missing
//! identifier is fatal to the attempt, and the phase stays wherever it was.

use tracing::debug;

use super::state::{ConnectionId, ConnectionPhase};
use super::TunnelError;
use crate::crypto::ChannelCrypto;
use crate::http::media_type;
use crate::transport::HttpTransport;
use crate::{CID_HEADER, HANDSHAKE_PATH};

/// One handshake attempt over borrowed channel state
pub struct HandshakeEngine<'a> {
    crypto: &'a mut dyn ChannelCrypto,
    transport: &'a dyn HttpTransport,
    phase: &'a mut ConnectionPhase,
}

impl<'a> HandshakeEngine<'a> {
    pub fn new(
        crypto: &'a mut dyn ChannelCrypto,
        transport: &'a dyn HttpTransport,
        phase: &'a mut ConnectionPhase,
    ) -> Self {
        Self {
            crypto,
            transport,
            phase,
        }
    }

    /// Run the full handshake, yielding the server-issued connection id.
    ///
    /// Fails with [`TunnelError::AlreadyConnected`] unless the phase is
    /// `Unconnected`.
    pub async fn perform(self) -> Result<ConnectionId, TunnelError> {
        if *self.phase != ConnectionPhase::Unconnected {
            return Err(TunnelError::AlreadyConnected);
        }

        // Stage 1: message 1 out, message 2 and the connection id back
        let message1 = self.crypto.produce_message1()?;
        let response = self
            .transport
            .post(HANDSHAKE_PATH, media_type::CBOR, &message1)
            .await?;
        response.ensure_success()?;

        let cid = response
            .header(CID_HEADER)
            .map(ConnectionId::new)
            .ok_or_else(|| TunnelError::Protocol("missing connection identifier".to_string()))?;
        debug!(%cid, "handshake stage 1 complete");
        *self.phase = ConnectionPhase::AwaitingMessage2 { cid: cid.clone() };

        let message3 = self.crypto.consume_message2(response.body_bytes())?;
        *self.phase = ConnectionPhase::AwaitingMessage4 { cid: cid.clone() };

        // Stage 2: message 3 to the identifier path, message 4 back
        let response = self
            .transport
            .post(cid.as_str(), media_type::CBOR, &message3)
            .await?;
        response.ensure_success()?;

        self.crypto.consume_message4(response.body_bytes())?;
        *self.phase = ConnectionPhase::Connected { cid: cid.clone() };
        debug!(%cid, "channel established");

        Ok(cid)
    }
}
