//! Secure messenger
//!
//! One encrypt → send → receive → decrypt exchange over an established
//! channel. The connection guard runs first, so messaging before the
//! handshake always fails rather than silently proceeding.

use tracing::trace;

use super::state::ConnectionPhase;
use super::TunnelError;
use crate::crypto::ChannelCrypto;
use crate::http::{media_type, HttpResponse};
use crate::transport::HttpTransport;

/// Decrypted reply of one exchange, with the transport response kept for
/// header and status inspection
#[derive(Debug)]
pub struct RawReply {
    /// Decrypted plaintext
    pub plaintext: Vec<u8>,
    /// The outer transport response as received
    pub response: HttpResponse,
}

/// One secure exchange over borrowed channel state
pub struct SecureMessenger<'a> {
    crypto: &'a mut dyn ChannelCrypto,
    transport: &'a dyn HttpTransport,
    phase: &'a ConnectionPhase,
}

impl<'a> SecureMessenger<'a> {
    pub fn new(
        crypto: &'a mut dyn ChannelCrypto,
        transport: &'a dyn HttpTransport,
        phase: &'a ConnectionPhase,
    ) -> Self {
        Self {
            crypto,
            transport,
            phase,
        }
    }

    /// Encrypt `plaintext`, post it to the connection-id path, decrypt the
    /// reply
    pub async fn exchange(self, plaintext: &[u8]) -> Result<RawReply, TunnelError> {
        let cid = self.phase.ensure_connected()?;

        let ciphertext = self.crypto.encrypt(plaintext)?;
        trace!(
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "sending secure message"
        );

        let response = self
            .transport
            .post(cid.as_str(), media_type::OCTET_STREAM, &ciphertext)
            .await?;
        response.ensure_success()?;

        let plaintext = self.crypto.decrypt(response.body_bytes())?;
        Ok(RawReply {
            plaintext,
            response,
        })
    }
}
