//! Channel crypto interface
//!
//! The tunnel never inspects key material; it only sequences calls against
//! this trait. Implementations own the session keys and handshake transcript
//! for one channel. The crate ships no KEM or AEAD implementation of its own;
//! backends plug in at client construction.

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Handshake rejected: {0}")]
    Handshake(String),

    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Channel not established")]
    NotEstablished,
}

/// Key encapsulation and authenticated encryption for one channel.
///
/// The handshake methods consume and produce the four opaque handshake
/// messages in order; `encrypt`/`decrypt` require that `consume_message4`
/// completed successfully. All operations are synchronous computations, the
/// tunnel suspends only at transport round trips.
///
/// Implementations typically carry per-message sequencing state, so the
/// client serializes access internally.
pub trait ChannelCrypto: Send {
    /// Produce the opening handshake message
    fn produce_message1(&mut self) -> Result<Vec<u8>, CryptoError>;

    /// Consume the server's message 2 and produce message 3.
    ///
    /// Fails with [`CryptoError::Handshake`] on a malformed or rejected
    /// message; the failure is fatal to this handshake attempt.
    fn consume_message2(&mut self, message2: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Consume the server's message 4, finalizing the session keys
    fn consume_message4(&mut self, message4: &[u8]) -> Result<(), CryptoError>;

    /// Encrypt plaintext for the established channel
    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError>;

    /// Decrypt ciphertext from the established channel.
    ///
    /// Fails with [`CryptoError::Decryption`] on authentication failure or
    /// malformed input; the failure is fatal to the instance.
    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError>;
}
