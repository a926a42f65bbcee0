//! Pseudo-HTTP response decoding
//!
//! Recovers a structured response from a decrypted byte stream. The stream
//! carries no trustworthy length header, so the decoder walks the header
//! section line by line while tracking the exact number of consumed bytes;
//! the body is whatever follows the blank line at that offset.

use bytes::Bytes;

use super::headers::{classify, HeaderClass};

/// A response recovered from decrypted tunnel plaintext.
///
/// `status` and `reason` stay `None` when the stream does not open with an
/// HTTP status line; in that case the body is absent as well.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecodedResponse {
    /// Status code from the status line, when present and numeric
    pub status: Option<u16>,
    /// Reason phrase, everything after the status code token
    pub reason: Option<String>,
    /// Recognized response headers in wire order
    pub headers: Vec<(String, String)>,
    /// Deferred content headers in wire order, they belong to the body
    pub content_headers: Vec<(String, String)>,
    /// Body bytes following the header section
    pub body: Option<Bytes>,
}

/// Decode a decrypted byte stream into a structured response.
///
/// An input whose first line does not start with the literal `HTTP` yields an
/// empty response with no status and no body. Header names outside the
/// recognized table are dropped without error.
pub fn decode_response(input: &[u8]) -> DecodedResponse {
    let mut decoded = DecodedResponse::default();
    let mut consumed = 0usize;
    let mut first = true;

    while consumed < input.len() {
        let (line, line_len) = next_line(&input[consumed..]);
        consumed += line_len;

        if first {
            first = false;
            if !line.starts_with(b"HTTP") {
                // Legacy fallback: a stream without a status line decodes to
                // nothing rather than an error.
                return DecodedResponse::default();
            }
            parse_status_line(line, &mut decoded);
            continue;
        }

        let text = String::from_utf8_lossy(line);
        if text.trim().is_empty() {
            // End of the header section, the body starts here.
            break;
        }

        let (name, value) = match text.split_once(':') {
            Some((n, v)) => (n.trim().to_string(), v.trim().to_string()),
            None => (text.trim().to_string(), String::new()),
        };

        match classify(&name) {
            Some(HeaderClass::Content) => decoded.content_headers.push((name, value)),
            Some(HeaderClass::Response) => decoded.headers.push((name, value)),
            None => {}
        }
    }

    if consumed < input.len() {
        decoded.body = Some(Bytes::copy_from_slice(&input[consumed..]));
    }

    decoded
}

/// Split off the next newline-terminated line.
///
/// Returns the line without its terminator and the total number of bytes it
/// occupies in the input, terminator included. The final line may be
/// unterminated.
fn next_line(input: &[u8]) -> (&[u8], usize) {
    match input.iter().position(|&b| b == b'\n') {
        Some(nl) => {
            let line = if nl > 0 && input[nl - 1] == b'\r' {
                &input[..nl - 1]
            } else {
                &input[..nl]
            };
            (line, nl + 1)
        }
        None => (input, input.len()),
    }
}

/// `HTTP/<version> <3-digit code> <reason phrase>`
fn parse_status_line(line: &[u8], decoded: &mut DecodedResponse) {
    let text = String::from_utf8_lossy(line);
    let mut tokens = text.splitn(3, ' ');
    let _version = tokens.next();

    if let Some(code) = tokens.next() {
        decoded.status = code.parse::<u16>().ok();
    }
    if let Some(reason) = tokens.next() {
        decoded.reason = Some(reason.to_string());
    }
}
