//! Session establishment: gateway, network and contract handles.
//!
//! ```text
//! Gateway::connect(profile, wallet, "appUser", options)   handshake, timed
//!   └─ gateway.network("mychannel")                       checked against discovery
//!        └─ network.contract("basic")                     local, infallible
//!             ├─ submit_transaction(...)
//!             └─ evaluate_transaction(...)
//! gateway.close()                                         exactly once
//! ```
//!
//! The connect handshake asks the gateway which channels the identity can
//! use and which peers serve each channel. In a local test deployment those
//! peers are advertised under container host names; with
//! [`GatewayOptions::discovery_as_localhost`] set they are rewritten to
//! `localhost`. The toggle is part of the options for this one call and
//! never touches process-wide state.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Url;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::contract::Contract;
use crate::identity::X509Identity;
use crate::profile::{as_localhost, http_url, ConnectionProfile, ProfileError};
use crate::transport::{HttpTransport, LedgerTransport, TransportError};
use crate::wallet::{Wallet, WalletError};

/// Handshake deadline when [`GatewayOptions::timeout`] is `None`.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

// ---------------------------------------------------------------------------
// Options / errors
// ---------------------------------------------------------------------------

/// Per-connection settings.
#[derive(Debug, Clone, Default)]
pub struct GatewayOptions {
    /// Upper bound on the whole connect handshake.
    pub timeout: Option<Duration>,
    /// Rewrite discovered peer hosts to `localhost`.
    pub discovery_as_localhost: bool,
}

/// Errors from establishing a session or resolving a network in it.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("identity {0:?} not found in wallet")]
    IdentityNotFound(String),

    #[error("cannot read identity from wallet: {0}")]
    Wallet(#[from] WalletError),

    #[error("invalid connection profile: {0}")]
    Profile(#[from] ProfileError),

    #[error("gateway handshake timed out after {0:?}")]
    Timeout(Duration),

    #[error("gateway handshake failed: {0}")]
    Handshake(#[source] TransportError),

    #[error("network {name:?} not found (available: {available:?})")]
    NetworkNotFound {
        name: String,
        available: Vec<String>,
    },
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// One discovered channel with its usable peer endpoints.
#[derive(Debug, Clone)]
struct Channel {
    name: String,
    peers: Vec<Url>,
}

/// A live session for one identity.
///
/// Dropping a gateway releases its transport; [`close`](Gateway::close) does
/// the same explicitly. The transport is released exactly once either way.
pub struct Gateway {
    transport: Arc<dyn LedgerTransport>,
    identity: Arc<X509Identity>,
    label: String,
    channels: Vec<Channel>,
    closed: bool,
}

impl Gateway {
    /// Connect as `label` using the endpoint and trust roots in `profile`.
    pub async fn connect(
        profile: &ConnectionProfile,
        wallet: &dyn Wallet,
        label: &str,
        options: GatewayOptions,
    ) -> Result<Self, ConnectionError> {
        let identity = match wallet.get(label).await {
            Ok(identity) => identity,
            Err(WalletError::NotFound(_)) => {
                return Err(ConnectionError::IdentityNotFound(label.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        if let Some(msp_id) = profile.client_msp_id() {
            if msp_id != identity.msp_id() {
                warn!(
                    "gateway: identity {label} belongs to {} but the profile's client org is {msp_id}",
                    identity.msp_id()
                );
            }
        }

        let endpoint = profile.gateway_endpoint().await?;
        let transport = HttpTransport::new(endpoint.url.clone(), endpoint.tls_root.as_deref())
            .map_err(ConnectionError::Handshake)?;
        info!("gateway: connecting to {} at {}", endpoint.name, endpoint.url);

        Self::connect_with_transport(Arc::new(transport), identity, label, options).await
    }

    /// Run the handshake over an already-built transport.
    ///
    /// On failure the transport is released before returning.
    pub async fn connect_with_transport(
        transport: Arc<dyn LedgerTransport>,
        identity: X509Identity,
        label: &str,
        options: GatewayOptions,
    ) -> Result<Self, ConnectionError> {
        let deadline = options.timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        let discovered = match tokio::time::timeout(deadline, transport.discover(&identity)).await {
            Ok(Ok(discovered)) => discovered,
            Ok(Err(e)) => {
                transport.close();
                return Err(ConnectionError::Handshake(e));
            }
            Err(_) => {
                transport.close();
                return Err(ConnectionError::Timeout(deadline));
            }
        };

        let channels = discovered
            .channels
            .into_iter()
            .map(|info| Channel {
                peers: info
                    .peers
                    .iter()
                    .filter_map(|raw| resolve_peer(raw, options.discovery_as_localhost))
                    .collect(),
                name: info.name,
            })
            .collect::<Vec<_>>();

        debug!(
            "gateway: discovered channels {:?}",
            channels.iter().map(|c| c.name.as_str()).collect::<Vec<_>>()
        );

        Ok(Self {
            transport,
            identity: Arc::new(identity),
            label: label.to_string(),
            channels,
            closed: false,
        })
    }

    /// The wallet label this session authenticates as.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn identity(&self) -> &X509Identity {
        &self.identity
    }

    /// Names of the channels discovery reported.
    pub fn channel_names(&self) -> Vec<&str> {
        self.channels.iter().map(|c| c.name.as_str()).collect()
    }

    /// Bind to the channel called `name`.
    pub fn network(&self, name: &str) -> Result<Network, ConnectionError> {
        let channel = self
            .channels
            .iter()
            .find(|c| c.name == name)
            .ok_or_else(|| ConnectionError::NetworkNotFound {
                name: name.to_string(),
                available: self.channels.iter().map(|c| c.name.clone()).collect(),
            })?;

        Ok(Network {
            name: channel.name.clone(),
            peers: channel.peers.clone(),
            transport: Arc::clone(&self.transport),
            identity: Arc::clone(&self.identity),
        })
    }

    /// Release the session. Handles derived from it stop working.
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.transport.close();
            info!("gateway: closed session for {}", self.label);
        }
    }
}

impl Drop for Gateway {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway")
            .field("label", &self.label)
            .field("channels", &self.channel_names())
            .field("closed", &self.closed)
            .finish()
    }
}

/// Parse a discovered peer address, optionally pointing it at localhost.
/// Unusable addresses are skipped with a warning.
fn resolve_peer(raw: &str, as_local: bool) -> Option<Url> {
    match http_url(raw) {
        Ok(url) if as_local => Some(as_localhost(&url)),
        Ok(url) => Some(url),
        Err(reason) => {
            warn!("gateway: ignoring discovered peer {raw:?}: {reason}");
            None
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// A channel within a session.
#[derive(Clone)]
pub struct Network {
    name: String,
    peers: Vec<Url>,
    transport: Arc<dyn LedgerTransport>,
    identity: Arc<X509Identity>,
}

impl Network {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Peer endpoints serving evaluations on this channel.
    pub fn peers(&self) -> &[Url] {
        &self.peers
    }

    /// Bind to the contract called `name`. Evaluations go to the first
    /// discovered peer, or to the gateway when discovery listed none.
    pub fn contract(&self, name: &str) -> Contract {
        Contract::new(
            self.name.clone(),
            name.to_string(),
            self.peers.first().cloned(),
            Arc::clone(&self.transport),
            Arc::clone(&self.identity),
        )
    }
}

impl fmt::Debug for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("name", &self.name)
            .field("peers", &self.peers.iter().map(Url::as_str).collect::<Vec<_>>())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
