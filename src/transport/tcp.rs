//! Default transport: HTTP/1.1 over tokio TCP, optional TLS
//!
//! Every exchange is a single short-lived connection (`Connection: close`),
//! so the response body is simply everything the server sends after the
//! header section. Redirects are only followed when the request asks for it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rustls::pki_types::ServerName;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::rustls::{ClientConfig, RootCertStore};
use tokio_rustls::TlsConnector;
use url::Url;

use super::{HttpTransport, TransportError};
use crate::codec::{classify, HeaderClass};
use crate::config::ClientConfig as TunnelClientConfig;
use crate::http::{header, HttpRequest, HttpResponse};

/// Maximum redirect hops when a request allows following redirects
const MAX_REDIRECTS: usize = 5;

/// HTTP POST transport over TCP, with TLS for `https` base addresses
pub struct TcpTransport {
    base: Url,
    tls: TlsConnector,
    connect_timeout: Duration,
    request_timeout: Duration,
}

impl TcpTransport {
    /// Create a transport for the given server base address.
    ///
    /// The base path is normalized to end with `/` so relative paths like the
    /// handshake endpoint and connection-id paths join below it.
    pub fn new(mut base: Url) -> Result<Self, TransportError> {
        match base.scheme() {
            "http" | "https" => {}
            other => {
                return Err(TransportError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )))
            }
        }
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            base,
            tls: tls_connector(),
            connect_timeout: Duration::from_secs(30),
            request_timeout: Duration::from_secs(60),
        })
    }

    /// Create a transport from client configuration
    pub fn from_config(config: &TunnelClientConfig) -> Result<Self, TransportError> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let mut transport = Self::new(base)?;
        transport.connect_timeout = Duration::from_secs(config.connect_timeout);
        transport.request_timeout = Duration::from_secs(config.request_timeout);
        Ok(transport)
    }

    /// Override the connect and request timeouts
    pub fn with_timeouts(mut self, connect: Duration, request: Duration) -> Self {
        self.connect_timeout = connect;
        self.request_timeout = request;
        self
    }

    /// Server base address
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Execute a full request, following redirects only when the request
    /// allows it.
    pub async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut method = request.method.clone();
        let mut url = request.url.clone();
        let mut body = request.body.clone();
        let mut content_headers = request.content_headers.clone();

        for _ in 0..=MAX_REDIRECTS {
            let response = self
                .round_trip(&method, &url, &request.headers, &content_headers, body.as_deref())
                .await?;

            if !request.follow_redirects || !is_redirect(response.status) {
                return Ok(response);
            }

            let location = response
                .header(header::LOCATION)
                .ok_or_else(|| {
                    TransportError::MalformedResponse("redirect without Location".to_string())
                })?
                .to_string();
            url = url
                .join(&location)
                .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

            // 303 demotes to GET and drops the body
            if response.status == 303 {
                method = "GET".to_string();
                body = None;
                content_headers.clear();
            }
            tracing::debug!(%url, "following redirect");
        }

        Err(TransportError::MalformedResponse(
            "too many redirects".to_string(),
        ))
    }

    async fn round_trip(
        &self,
        method: &str,
        url: &Url,
        headers: &[(String, String)],
        content_headers: &[(String, String)],
        body: Option<&[u8]>,
    ) -> Result<HttpResponse, TransportError> {
        let mut stream = self.connect(url).await?;

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?;
        let path = url.path();
        let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();

        let mut head = format!(
            "{method} {path}{query} HTTP/1.1\r\n\
             Host: {host}\r\n\
             User-Agent: vau-tunnel/{}\r\n\
             Connection: close\r\n",
            crate::VERSION
        );
        for (name, value) in headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        for (name, value) in content_headers {
            if name.eq_ignore_ascii_case(header::CONTENT_LENGTH) {
                continue;
            }
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        if let Some(body) = body {
            head.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        head.push_str("\r\n");

        stream.write_all(head.as_bytes()).await?;
        if let Some(body) = body {
            stream.write_all(body).await?;
        }
        stream.flush().await?;

        let mut raw = Vec::new();
        tokio::time::timeout(self.request_timeout, stream.read_to_end(&mut raw))
            .await
            .map_err(|_| TransportError::Timeout)??;

        parse_response(&raw)
    }

    async fn connect(&self, url: &Url) -> Result<HttpStream, TransportError> {
        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidUrl("missing host".to_string()))?;
        let port = url
            .port_or_known_default()
            .ok_or_else(|| TransportError::InvalidUrl("missing port".to_string()))?;

        let tcp = tokio::time::timeout(self.connect_timeout, TcpStream::connect((host, port)))
            .await
            .map_err(|_| TransportError::Timeout)??;

        if url.scheme() == "https" {
            let server_name = ServerName::try_from(host.to_string())
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            let tls = self
                .tls
                .connect(server_name, tcp)
                .await
                .map_err(|e| TransportError::Tls(e.to_string()))?;
            tracing::debug!(%host, "TLS connection established");
            Ok(HttpStream::Tls(Box::new(tls)))
        } else {
            Ok(HttpStream::Plain(tcp))
        }
    }
}

#[async_trait]
impl HttpTransport for TcpTransport {
    async fn post(
        &self,
        path: &str,
        content_type: &str,
        body: &[u8],
    ) -> Result<HttpResponse, TransportError> {
        let url = self
            .base
            .join(path)
            .map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
        let content_headers = vec![(header::CONTENT_TYPE.to_string(), content_type.to_string())];

        self.round_trip("POST", &url, &[], &content_headers, Some(body))
            .await
    }
}

/// Build a TLS connector with the Mozilla root store
fn tls_connector() -> TlsConnector {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();

    TlsConnector::from(Arc::new(config))
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Plain or TLS-wrapped connection, without trait objects
enum HttpStream {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl tokio::io::AsyncRead for HttpStream {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
            HttpStream::Tls(stream) => std::pin::Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl tokio::io::AsyncWrite for HttpStream {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        match &mut *self {
            HttpStream::Plain(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
            HttpStream::Tls(stream) => std::pin::Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(stream) => std::pin::Pin::new(stream).poll_flush(cx),
            HttpStream::Tls(stream) => std::pin::Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        match &mut *self {
            HttpStream::Plain(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
            HttpStream::Tls(stream) => std::pin::Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Parse a raw HTTP/1.1 response read to connection close
fn parse_response(raw: &[u8]) -> Result<HttpResponse, TransportError> {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| TransportError::MalformedResponse("missing header section".to_string()))?;
    let (head, body) = (&raw[..split], &raw[split + 4..]);

    let head = std::str::from_utf8(head)
        .map_err(|_| TransportError::MalformedResponse("non-UTF8 header section".to_string()))?;
    let mut lines = head.split("\r\n");

    let status_line = lines
        .next()
        .ok_or_else(|| TransportError::MalformedResponse("missing status line".to_string()))?;
    let mut tokens = status_line.splitn(3, ' ');
    let version = tokens.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(TransportError::MalformedResponse(format!(
            "bad status line: {status_line}"
        )));
    }
    let status = tokens
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| {
            TransportError::MalformedResponse(format!("bad status code in: {status_line}"))
        })?;
    let reason = tokens.next().unwrap_or_default().to_string();

    let mut response = HttpResponse::new(status, reason);
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let (name, value) = (name.trim().to_string(), value.trim().to_string());
        // The codec's table tells content headers apart; unlike decoding a
        // tunnel payload, nothing is dropped here.
        match classify(&name) {
            Some(HeaderClass::Content) => response.content_headers.push((name, value)),
            _ => response.headers.push((name, value)),
        }
    }

    if !body.is_empty() {
        response.body = Some(Bytes::copy_from_slice(body));
    }

    Ok(response)
}
