//! Integration tests for the VAU tunnel
//!
//! Tests the full client flow against an in-process VAU server speaking
//! HTTP/1.1 over real TCP sockets:
//! - 4-message handshake with connection-id issuance
//! - secure messaging and the status probe
//! - transparent interception with per-authority providers

use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use vau_tunnel::crypto::{ChannelCrypto, CryptoError};
use vau_tunnel::http::HttpRequest;
use vau_tunnel::pipeline::{LazyAuthorityProvider, RequestPipeline, VauInterceptor};
use vau_tunnel::transport::TcpTransport;
use vau_tunnel::tunnel::{TunnelError, STATUS_REQUEST};
use vau_tunnel::{Error, VauClient};

const CID: &str = "VAU-CID-0123456789abcdef";

/// Client-side crypto double matching the test server's prefix scheme
struct TestCrypto {
    established: bool,
}

impl TestCrypto {
    fn new() -> Box<Self> {
        Box::new(Self { established: false })
    }
}

impl ChannelCrypto for TestCrypto {
    fn produce_message1(&mut self) -> Result<Vec<u8>, CryptoError> {
        Ok(b"M1".to_vec())
    }

    fn consume_message2(&mut self, message2: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if message2 == b"M2" {
            Ok(b"M3".to_vec())
        } else {
            Err(CryptoError::Handshake("unexpected message 2".to_string()))
        }
    }

    fn consume_message4(&mut self, message4: &[u8]) -> Result<(), CryptoError> {
        if message4 == b"M4" {
            self.established = true;
            Ok(())
        } else {
            Err(CryptoError::Handshake("unexpected message 4".to_string()))
        }
    }

    fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.established {
            return Err(CryptoError::NotEstablished);
        }
        Ok([&b"REQ:"[..], plaintext].concat())
    }

    fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if !self.established {
            return Err(CryptoError::NotEstablished);
        }
        ciphertext
            .strip_prefix(b"RSP:")
            .map(|p| p.to_vec())
            .ok_or_else(|| CryptoError::Decryption("bad prefix".to_string()))
    }
}

/// Plaintexts the server decrypted from post-handshake messages
type SeenPlaintexts = Arc<Mutex<Vec<Vec<u8>>>>;

/// Spawn a VAU server on a local listener.
///
/// Speaks plain HTTP/1.1, one request per connection, and mirrors the
/// [`TestCrypto`] prefix scheme on the encrypted leg.
async fn spawn_vau_server() -> (Url, SeenPlaintexts) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let seen: SeenPlaintexts = Arc::new(Mutex::new(Vec::new()));

    let seen_clone = seen.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let seen = seen_clone.clone();
            tokio::spawn(async move {
                let _ = handle_connection(stream, seen).await;
            });
        }
    });

    (Url::parse(&format!("http://{addr}/")).unwrap(), seen)
}

async fn handle_connection(mut stream: TcpStream, seen: SeenPlaintexts) -> std::io::Result<()> {
    let (path, body) = read_request(&mut stream).await?;

    let (status, extra_header, reply) = if path == "/VAU" {
        (
            "200 OK",
            Some(format!("VAU-CID: /{CID}\r\n")),
            b"M2".to_vec(),
        )
    } else if path == format!("/{CID}") && body == b"M3" {
        ("200 OK", None, b"M4".to_vec())
    } else if path == format!("/{CID}") {
        match body.strip_prefix(b"REQ:") {
            Some(plaintext) => {
                seen.lock().unwrap().push(plaintext.to_vec());
                let inner = answer(plaintext);
                ("200 OK", None, [&b"RSP:"[..], &inner[..]].concat())
            }
            None => ("400 Bad Request", None, Vec::new()),
        }
    } else {
        ("404 Not Found", None, Vec::new())
    };

    let mut response = format!(
        "HTTP/1.1 {status}\r\n{}Content-Length: {}\r\nConnection: close\r\n\r\n",
        extra_header.unwrap_or_default(),
        reply.len()
    )
    .into_bytes();
    response.extend_from_slice(&reply);

    stream.write_all(&response).await?;
    stream.shutdown().await
}

/// Read one request, returning its path and body
async fn read_request(stream: &mut TcpStream) -> std::io::Result<(String, Vec<u8>)> {
    let mut raw = Vec::new();
    let mut buf = [0u8; 4096];
    let split = loop {
        if let Some(split) = raw.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&raw[..split]);
            let content_length: usize = head
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length: ").map(String::from))
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            if raw.len() >= split + 4 + content_length {
                break split;
            }
        }
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break raw.windows(4).position(|w| w == b"\r\n\r\n").unwrap_or(0);
        }
        raw.extend_from_slice(&buf[..n]);
    };

    let head = String::from_utf8_lossy(&raw[..split]);
    let path = head
        .lines()
        .next()
        .and_then(|l| l.split(' ').nth(1))
        .unwrap_or("/")
        .to_string();
    Ok((path, raw[split + 4..].to_vec()))
}

/// Inner pseudo-HTTP handling for decrypted requests
fn answer(plaintext: &[u8]) -> Vec<u8> {
    if plaintext.starts_with(b"GET /VAU-Status") {
        let body = concat!(
            "{\"VAU-TYPE\":\"epa\",\"VAU-VERSION\":\"2\",",
            "\"USER-AUTHENTICATION\":\"telematik-id X110400129\",",
            "\"KeyID\":\"key-7\",\"CONNECTION-START\":\"2024-05-01T08:00:00Z\"}"
        );
        format!("HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{body}").into_bytes()
    } else if plaintext.starts_with(b"GET /epa/documents") {
        b"HTTP/1.1 200 OK\r\nETag: \"doc-v1\"\r\nContent-Type: application/json\r\n\r\n[\"doc-1\",\"doc-2\"]"
            .to_vec()
    } else {
        let mut reply = b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\necho:".to_vec();
        reply.extend_from_slice(plaintext);
        reply
    }
}

async fn connected_client(base: Url) -> VauClient {
    let transport = Arc::new(TcpTransport::new(base).unwrap());
    let client = VauClient::new(transport, TestCrypto::new());
    client.perform_handshake().await.unwrap();
    client
}

/// Full handshake over real sockets issues the connection id
#[tokio::test]
async fn test_handshake_over_tcp() {
    let (base, _) = spawn_vau_server().await;
    let transport = Arc::new(TcpTransport::new(base).unwrap());
    let client = VauClient::new(transport, TestCrypto::new());

    let cid = client.perform_handshake().await.unwrap();
    assert_eq!(cid.as_str(), CID);
    assert!(client.is_connected().await);

    // Strictly forward: no second handshake on the same instance.
    assert!(matches!(
        client.perform_handshake().await,
        Err(TunnelError::AlreadyConnected)
    ));
}

/// Encrypted round trip through the established channel
#[tokio::test]
async fn test_secure_message_exchange() {
    let (base, _) = spawn_vau_server().await;
    let client = connected_client(base).await;

    let reply = client.send_raw_message(b"Hello World!").await.unwrap();
    let text = String::from_utf8(reply.plaintext).unwrap();
    assert!(text.ends_with("echo:Hello World!"));
    assert_eq!(reply.response.status, 200);
}

/// The status probe goes out byte-exact and the record parses
#[tokio::test]
async fn test_get_status() {
    let (base, seen) = spawn_vau_server().await;
    let client = connected_client(base).await;

    let status = client.get_status().await.unwrap();
    assert_eq!(status.vau_type, "epa");
    assert_eq!(status.vau_version, "2");
    assert_eq!(status.key_id, "key-7");
    assert!(status.is_user_authenticated("X110400129"));

    let probes = seen.lock().unwrap();
    assert_eq!(probes.len(), 1);
    assert_eq!(probes[0], STATUS_REQUEST);
}

/// Messaging without a handshake is refused outright
#[tokio::test]
async fn test_messaging_requires_handshake() {
    let (base, _) = spawn_vau_server().await;
    let transport = Arc::new(TcpTransport::new(base).unwrap());
    let client = VauClient::new(transport, TestCrypto::new());

    assert!(matches!(
        client.send_raw_message(b"too early").await,
        Err(TunnelError::NotConnected)
    ));
}

/// A generic request flows through the interceptor untouched by the caller:
/// encrypted out, rewritten to the cid path, decrypted back
#[tokio::test]
async fn test_intercepting_pipeline_end_to_end() {
    let (base, seen) = spawn_vau_server().await;

    let provider = LazyAuthorityProvider::new(move |origin: &Url| -> Result<Option<VauClient>, Error> {
        let transport = Arc::new(TcpTransport::new(origin.clone())?);
        Ok(Some(VauClient::new(transport, TestCrypto::new())))
    });
    let terminal = TcpTransport::new(base.clone()).unwrap();
    let pipeline = VauInterceptor::new(provider, terminal);

    let url = base.join("epa/documents").unwrap();
    let mut request = HttpRequest::new("GET", url);
    request.push_header("Accept", "application/json");

    let response = pipeline.execute(request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.header("ETag"), Some("\"doc-v1\""));
    assert_eq!(response.body.as_deref(), Some(&b"[\"doc-1\",\"doc-2\"]"[..]));

    // The server only ever saw the pseudo-HTTP plaintext via the channel.
    let plaintexts = seen.lock().unwrap();
    assert_eq!(plaintexts.len(), 1);
    let inner = String::from_utf8(plaintexts[0].clone()).unwrap();
    assert!(inner.starts_with("GET /epa/documents HTTP/1.1\r\n"));
    assert!(inner.contains("Accept: application/json\r\n"));
}

/// The same provider reuses one channel for every request to an authority
#[tokio::test]
async fn test_pipeline_reuses_channel_per_authority() {
    let (base, seen) = spawn_vau_server().await;

    let provider = LazyAuthorityProvider::new(move |origin: &Url| -> Result<Option<VauClient>, Error> {
        let transport = Arc::new(TcpTransport::new(origin.clone())?);
        Ok(Some(VauClient::new(transport, TestCrypto::new())))
    });
    let terminal = TcpTransport::new(base.clone()).unwrap();
    let pipeline = VauInterceptor::new(provider, terminal);

    for path in ["epa/documents", "epa/other"] {
        let request = HttpRequest::new("GET", base.join(path).unwrap());
        pipeline.execute(request).await.unwrap();
    }

    // Two exchanges, one handshake: both plaintexts arrived on the same cid.
    assert_eq!(seen.lock().unwrap().len(), 2);
}
