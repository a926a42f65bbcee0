//! Tunnel client providers
//!
//! The interception stage asks a provider for a ready-to-use client per
//! request. A provider may answer `None`, which means the destination is not
//! tunneled and the request passes through untouched.
//!
//! Two strategies ship with the crate: a fixed single instance, and a lazy
//! per-authority cache that builds and handshakes one client per origin.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::tunnel::{TunnelError, VauClient};
use crate::Error;
use url::Url;

/// Capability of supplying a connected [`VauClient`] for a destination
#[async_trait]
pub trait VauClientProvider: Send + Sync {
    /// A connected client for the given destination, or `None` when requests
    /// to it should bypass the tunnel
    async fn vau_client(&self, url: &Url) -> Result<Option<Arc<VauClient>>, Error>;
}

/// Ensure the client is connected, tolerating a lost handshake race
async fn connect_if_needed(client: &VauClient) -> Result<(), Error> {
    if client.is_connected().await {
        return Ok(());
    }
    match client.perform_handshake().await {
        Ok(_) => Ok(()),
        // Another caller may have won the race between the check and the
        // handshake; only a genuinely unconnected instance is an error.
        Err(TunnelError::AlreadyConnected) => {
            if client.is_connected().await {
                Ok(())
            } else {
                Err(TunnelError::AlreadyConnected.into())
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Always hands out the same instance, handshaking it on first use
pub struct FixedClientProvider {
    client: Arc<VauClient>,
}

impl FixedClientProvider {
    pub fn new(client: Arc<VauClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl VauClientProvider for FixedClientProvider {
    async fn vau_client(&self, _url: &Url) -> Result<Option<Arc<VauClient>>, Error> {
        connect_if_needed(&self.client).await?;
        Ok(Some(self.client.clone()))
    }
}

/// Builds a client for an origin, or declines to tunnel it
pub trait VauClientFactory: Send + Sync {
    /// Create an unconnected client for the given origin base URL, or `None`
    /// when the origin should not be tunneled
    fn create(&self, base: &Url) -> Result<Option<VauClient>, Error>;
}

impl<F> VauClientFactory for F
where
    F: Fn(&Url) -> Result<Option<VauClient>, Error> + Send + Sync,
{
    fn create(&self, base: &Url) -> Result<Option<VauClient>, Error> {
        self(base)
    }
}

/// One lazily handshaken client per authority.
///
/// The first request to an origin builds a client through the factory and
/// runs the handshake; later requests to the same origin reuse the cached
/// instance. The cache lock is held across the handshake, which serializes
/// first contact per provider.
pub struct LazyAuthorityProvider<F: VauClientFactory> {
    factory: F,
    clients: Mutex<HashMap<String, Arc<VauClient>>>,
}

impl<F: VauClientFactory> LazyAuthorityProvider<F> {
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl<F: VauClientFactory> VauClientProvider for LazyAuthorityProvider<F> {
    async fn vau_client(&self, url: &Url) -> Result<Option<Arc<VauClient>>, Error> {
        let origin = url.origin();
        if !origin.is_tuple() {
            return Err(TunnelError::InvalidArgument("request URL has no authority").into());
        }
        let key = origin.ascii_serialization();

        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(&key) {
            return Ok(Some(client.clone()));
        }

        let base = Url::parse(&format!("{key}/"))
            .map_err(|e| Error::Config(format!("bad origin {key}: {e}")))?;
        let Some(client) = self.factory.create(&base)? else {
            return Ok(None);
        };

        debug!(%key, "establishing tunnel for new authority");
        client.perform_handshake().await.map_err(Error::from)?;

        let client = Arc::new(client);
        clients.insert(key, client.clone());
        Ok(Some(client))
    }
}
