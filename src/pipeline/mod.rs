//! Interception pipeline
//!
//! A transport middleware that makes the tunnel invisible to a generic
//! outgoing-request pipeline: requests to tunneled destinations are encrypted
//! and redirected to the connection-id path, and their responses decrypted in
//! place, before the application sees either.

mod provider;

pub use provider::{
    FixedClientProvider, LazyAuthorityProvider, VauClientFactory, VauClientProvider,
};

use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::http::{HttpRequest, HttpResponse};
use crate::transport::TcpTransport;
use crate::tunnel::TunnelError;
use crate::Error;

/// A stage of an outgoing-request pipeline
#[async_trait]
pub trait RequestPipeline: Send + Sync {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, Error>;
}

/// The default transport is the terminal stage of any pipeline
#[async_trait]
impl RequestPipeline for TcpTransport {
    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
        Ok(TcpTransport::execute(self, request).await?)
    }
}

/// Pipeline stage that routes requests through the tunnel when a provider
/// supplies a client for their destination.
///
/// Redirect-following on the forwarded request is off unless explicitly
/// enabled: a redirect target inside an encrypted channel is channel-relative
/// and cannot be safely auto-followed.
pub struct VauInterceptor<P, N> {
    provider: P,
    next: N,
    follow_redirects: bool,
}

impl<P, N> VauInterceptor<P, N>
where
    P: VauClientProvider,
    N: RequestPipeline,
{
    pub fn new(provider: P, next: N) -> Self {
        Self {
            provider,
            next,
            follow_redirects: false,
        }
    }

    /// Allow the forwarded request to follow redirects anyway
    pub fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }
}

#[async_trait]
impl<P, N> RequestPipeline for VauInterceptor<P, N>
where
    P: VauClientProvider,
    N: RequestPipeline,
{
    async fn execute(&self, mut request: HttpRequest) -> Result<HttpResponse, Error> {
        let Some(client) = self.provider.vau_client(&request.url).await? else {
            return self.next.execute(request).await;
        };

        client.encrypt_request(&mut request).await.map_err(Error::from)?;

        let cid = client
            .connection_id()
            .await
            .ok_or(TunnelError::NotConnected)?;
        let origin = request.url.origin();
        if !origin.is_tuple() {
            return Err(TunnelError::InvalidArgument("request URL has no authority").into());
        }
        let destination = format!("{}/{}", origin.ascii_serialization(), cid);
        request.url = Url::parse(&destination)
            .map_err(|e| TunnelError::Protocol(format!("bad tunnel destination: {e}")))?;
        request.follow_redirects = self.follow_redirects;
        debug!(%destination, "request diverted through tunnel");

        let mut response = self.next.execute(request).await?;
        client.decrypt_response(&mut response).await.map_err(Error::from)?;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{ChannelCrypto, CryptoError};
    use crate::transport::{HttpTransport, TransportError};
    use crate::tunnel::VauClient;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Identity crypto: handshake always succeeds, messages pass unchanged
    struct NullCrypto;

    impl ChannelCrypto for NullCrypto {
        fn produce_message1(&mut self) -> Result<Vec<u8>, CryptoError> {
            Ok(b"M1".to_vec())
        }
        fn consume_message2(&mut self, _m: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(b"M3".to_vec())
        }
        fn consume_message4(&mut self, _m: &[u8]) -> Result<(), CryptoError> {
            Ok(())
        }
        fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(plaintext.to_vec())
        }
        fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
            Ok(ciphertext.to_vec())
        }
    }

    /// Handshake counterpart for [`NullCrypto`]
    struct NullServer;

    #[async_trait]
    impl HttpTransport for NullServer {
        async fn post(
            &self,
            path: &str,
            _content_type: &str,
            _body: &[u8],
        ) -> Result<HttpResponse, TransportError> {
            let mut response = HttpResponse::new(200, "OK");
            if path == crate::HANDSHAKE_PATH {
                response
                    .headers
                    .push((crate::CID_HEADER.to_string(), "/cid-77".to_string()));
            }
            response.body = Some(Bytes::from_static(b"M2"));
            Ok(response)
        }
    }

    /// Terminal stage that records the forwarded request and returns a canned
    /// tunnel reply
    struct RecordingStage {
        seen: Mutex<Vec<HttpRequest>>,
        reply: &'static [u8],
    }

    impl RecordingStage {
        fn new(reply: &'static [u8]) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }
    }

    #[async_trait]
    impl RequestPipeline for Arc<RecordingStage> {
        async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, Error> {
            self.seen.lock().unwrap().push(request);
            let mut response = HttpResponse::new(200, "OK");
            response.body = Some(Bytes::from_static(self.reply));
            Ok(response)
        }
    }

    async fn connected_client() -> Arc<VauClient> {
        let client = VauClient::new(Arc::new(NullServer), Box::new(NullCrypto));
        client.perform_handshake().await.unwrap();
        Arc::new(client)
    }

    /// Provider that never tunnels
    struct NoTunnelProvider;

    #[async_trait]
    impl VauClientProvider for NoTunnelProvider {
        async fn vau_client(&self, _url: &Url) -> Result<Option<Arc<VauClient>>, Error> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn test_passthrough_without_tunnel() {
        let next = RecordingStage::new(b"");
        let stage = VauInterceptor::new(NoTunnelProvider, next.clone());

        let url = Url::parse("http://plain.example/path").unwrap();
        let request = HttpRequest::new("GET", url.clone());
        stage.execute(request).await.unwrap();

        let seen = next.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].method, "GET");
        assert_eq!(seen[0].url, url);
        assert!(seen[0].body.is_none());
        assert!(seen[0].follow_redirects);
    }

    #[tokio::test]
    async fn test_interception_rewrites_and_decrypts() {
        let client = connected_client().await;
        let next =
            RecordingStage::new(b"HTTP/1.1 201 Created\r\nETag: \"e1\"\r\n\r\ncreated");
        let stage = VauInterceptor::new(FixedClientProvider::new(client), next.clone());

        let url = Url::parse("http://record-system.example:8080/epa/records?verbose=1").unwrap();
        let request = HttpRequest::new("GET", url);
        let response = stage.execute(request).await.unwrap();

        // The forwarded request went to the connection-id path as ciphertext.
        let seen = next.seen.lock().unwrap();
        assert_eq!(
            seen[0].url.as_str(),
            "http://record-system.example:8080/cid-77"
        );
        assert_eq!(seen[0].method, "POST");
        assert!(!seen[0].follow_redirects);
        let body = seen[0].body.as_ref().unwrap();
        assert!(body.starts_with(b"GET /epa/records HTTP/1.1\r\n"));

        // The response was decrypted and decoded in place.
        assert_eq!(response.status, 201);
        assert_eq!(response.reason, "Created");
        assert_eq!(response.header("ETag"), Some("\"e1\""));
        assert_eq!(response.body.as_deref(), Some(&b"created"[..]));
    }

    #[tokio::test]
    async fn test_follow_redirects_flag_is_forwarded() {
        let client = connected_client().await;
        let next = RecordingStage::new(b"HTTP/1.1 200 OK\r\n\r\n");
        let stage = VauInterceptor::new(FixedClientProvider::new(client), next.clone())
            .with_follow_redirects(true);

        let url = Url::parse("http://record-system.example/x").unwrap();
        stage.execute(HttpRequest::new("GET", url)).await.unwrap();

        assert!(next.seen.lock().unwrap()[0].follow_redirects);
    }

    #[tokio::test]
    async fn test_fixed_provider_handshakes_once_and_reuses() {
        let client = VauClient::new(Arc::new(NullServer), Box::new(NullCrypto));
        let provider = FixedClientProvider::new(Arc::new(client));
        let url = Url::parse("http://a.example/x").unwrap();

        let first = provider.vau_client(&url).await.unwrap().unwrap();
        assert!(first.is_connected().await);
        let second = provider.vau_client(&url).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_lazy_provider_caches_per_authority() {
        let created = Arc::new(AtomicUsize::new(0));
        let counter = created.clone();
        let provider =
            LazyAuthorityProvider::new(move |base: &Url| -> Result<Option<VauClient>, Error> {
                counter.fetch_add(1, Ordering::SeqCst);
                if base.host_str() == Some("skip.example") {
                    return Ok(None);
                }
                Ok(Some(VauClient::new(Arc::new(NullServer), Box::new(NullCrypto))))
            });

        let a1 = Url::parse("http://a.example/one").unwrap();
        let a2 = Url::parse("http://a.example/two").unwrap();
        let b = Url::parse("http://b.example/one").unwrap();
        let skip = Url::parse("http://skip.example/one").unwrap();

        let first = provider.vau_client(&a1).await.unwrap().unwrap();
        assert!(first.is_connected().await);
        let again = provider.vau_client(&a2).await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert_eq!(created.load(Ordering::SeqCst), 1);

        let other = provider.vau_client(&b).await.unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(created.load(Ordering::SeqCst), 2);

        assert!(provider.vau_client(&skip).await.unwrap().is_none());
    }
}
