//! Pseudo-HTTP codec
//!
//! The plaintext carried inside the encrypted channel is an HTTP/1.1-like
//! byte format. This module serializes outgoing requests into that form and
//! recovers structured responses from decrypted byte streams.
//!
//! The format has no reliable length framing, so decoding tracks consumed
//! bytes manually and treats the remainder after the header section as the
//! body.

mod headers;
mod request;
mod response;

pub use headers::{classify, HeaderClass};
pub use request::encode_request;
pub use response::{decode_response, DecodedResponse};
