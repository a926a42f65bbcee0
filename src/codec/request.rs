//! Pseudo-HTTP request encoding
//!
//! Serializes an outgoing request into the HTTP/1.1-like byte stream that is
//! encrypted and carried through the tunnel:
//!
//! ```text
//! <METHOD> <path> HTTP/<version>\r\n
//! <name>: <value>\r\n        (generic headers, insertion order)
//! <name>: <value>\r\n        (content headers, only when a body is present)
//! \r\n
//! <body bytes>
//! ```

use crate::http::HttpRequest;

const CRLF: &str = "\r\n";

/// Encode a request into its pseudo-HTTP wire form.
///
/// When a header name appears more than once, only the first value is
/// emitted. Header values are passed through verbatim.
pub fn encode_request(request: &HttpRequest) -> Vec<u8> {
    let mut out = Vec::new();

    out.extend_from_slice(
        format!(
            "{} {} HTTP/{}{}",
            request.method,
            request.url.path(),
            request.version,
            CRLF
        )
        .as_bytes(),
    );

    write_headers(&mut out, &request.headers);
    if request.body.is_some() {
        write_headers(&mut out, &request.content_headers);
    }

    out.extend_from_slice(CRLF.as_bytes());

    if let Some(body) = &request.body {
        out.extend_from_slice(body);
    }

    out
}

/// Emit each distinct header name once, first value wins
fn write_headers(out: &mut Vec<u8>, headers: &[(String, String)]) {
    let mut seen: Vec<String> = Vec::new();
    for (name, value) in headers {
        let lower = name.to_ascii_lowercase();
        if seen.contains(&lower) {
            continue;
        }
        seen.push(lower);
        out.extend_from_slice(format!("{name}: {value}{CRLF}").as_bytes());
    }
}
