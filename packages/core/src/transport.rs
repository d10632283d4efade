//! Wire access to the ledger gateway.
//!
//! [`LedgerTransport`] is the seam between the session layer and the network.
//! The production implementation, [`HttpTransport`], speaks the gateway's
//! HTTP contract:
//!
//! | Method | Path | Purpose |
//! |--------|------|---------|
//! | GET | `/v1/discovery` | channels visible to the caller, with their peers |
//! | POST | `/v1/channels/{channel}/contracts/{contract}/submit` | ordered, state-changing call |
//! | POST | `/v1/channels/{channel}/contracts/{contract}/evaluate` | read-only call on one peer |
//!
//! Every request carries the caller's identity in `x-msp-id` and
//! `x-client-cert` (hex of the PEM certificate). Call bodies are
//! [`CallBody`]; a successful response body is the raw result payload. A
//! non-2xx response may carry an [`ErrorBody`].

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use reqwest::{Client, Response, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use urlencoding::encode;

use crate::identity::X509Identity;

pub const HEADER_MSP_ID: &str = "x-msp-id";
pub const HEADER_CLIENT_CERT: &str = "x-client-cert";
pub const HEADER_TRANSACTION_ID: &str = "x-transaction-id";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Response of `GET /v1/discovery`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiscoveryResponse {
    pub channels: Vec<ChannelInfo>,
}

/// One channel the caller may use, with the peers that serve evaluations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelInfo {
    pub name: String,
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Request body for submit and evaluate.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallBody {
    pub transaction: String,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Error body a gateway may return with a non-2xx status.
///
/// ```json
/// { "error": "asset asset13 already exists", "code": "endorsement_failed" }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    pub error: String,
    #[serde(default)]
    pub code: Option<String>,
}

impl ErrorBody {
    pub fn new(code: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: Some(code.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum TransportError {
    /// The HTTP request failed before a response arrived (connect, TLS, I/O).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The gateway answered with a non-2xx status.
    #[error("gateway returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The gateway answered 2xx but the body was not what we expected.
    #[error("invalid gateway response: {0}")]
    InvalidResponse(String),

    /// The transport was already released.
    #[error("transport is closed")]
    Closed,
}

// ---------------------------------------------------------------------------
// LedgerTransport
// ---------------------------------------------------------------------------

/// One contract call as the transport sees it.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    pub identity: &'a X509Identity,
    pub channel: &'a str,
    pub contract: &'a str,
    pub transaction: &'a str,
    pub args: &'a [&'a str],
    /// Client-generated id for log correlation. Not an idempotency key.
    pub tx_id: &'a str,
}

/// Network access used by [`Gateway`](crate::gateway::Gateway).
#[async_trait]
pub trait LedgerTransport: Send + Sync + 'static {
    /// Handshake: return the channels (and their peers) visible to `identity`.
    async fn discover(&self, identity: &X509Identity) -> Result<DiscoveryResponse, TransportError>;

    /// Send a call through ordering and endorsement.
    async fn submit(&self, call: Invocation<'_>) -> Result<Vec<u8>, TransportError>;

    /// Send a read-only call to `peer`, or to the gateway itself when `None`.
    async fn evaluate(
        &self,
        peer: Option<&Url>,
        call: Invocation<'_>,
    ) -> Result<Vec<u8>, TransportError>;

    /// Release held connections. Called exactly once by the owning gateway.
    fn close(&self) {}
}

// ---------------------------------------------------------------------------
// HttpTransport
// ---------------------------------------------------------------------------

/// reqwest-backed [`LedgerTransport`].
///
/// The client is built without an overall request timeout: submit and
/// evaluate block until the gateway answers or the connection faults. The
/// handshake deadline is enforced by the gateway, not here.
///
/// [`close`](LedgerTransport::close) drops the client, and with it the
/// connection pool, even while `Network` and `Contract` handles still share
/// this transport. Calls after that fail with [`TransportError::Closed`].
pub struct HttpTransport {
    client: RwLock<Option<Client>>,
    gateway: Url,
}

impl HttpTransport {
    /// Build a transport for `gateway`, trusting `tls_root` (PEM) in addition
    /// to the system roots.
    pub fn new(gateway: Url, tls_root: Option<&[u8]>) -> Result<Self, TransportError> {
        let mut builder = Client::builder();
        if let Some(pem) = tls_root {
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(pem)?);
        }
        Ok(Self::with_client(builder.build()?, gateway))
    }

    /// Wrap a pre-configured client.
    pub fn with_client(client: Client, gateway: Url) -> Self {
        Self {
            client: RwLock::new(Some(client)),
            gateway,
        }
    }

    pub fn gateway(&self) -> &Url {
        &self.gateway
    }

    pub fn is_open(&self) -> bool {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// A handle on the live client, or `Closed`.
    fn client(&self) -> Result<Client, TransportError> {
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::Closed)
    }

    async fn call(&self, base: &Url, kind: &str, call: Invocation<'_>) -> Result<Vec<u8>, TransportError> {
        let client = self.client()?;
        let url = format!(
            "{}/v1/channels/{}/contracts/{}/{kind}",
            base.as_str().trim_end_matches('/'),
            encode(call.channel),
            encode(call.contract),
        );
        let body = CallBody {
            transaction: call.transaction.to_string(),
            args: call.args.iter().map(|a| a.to_string()).collect(),
        };

        debug!(tx_id = call.tx_id, "{kind} {} -> {url}", call.transaction);
        let response = client
            .post(&url)
            .header(HEADER_MSP_ID, call.identity.msp_id())
            .header(HEADER_CLIENT_CERT, hex::encode(call.identity.certificate()))
            .header(HEADER_TRANSACTION_ID, call.tx_id)
            .json(&body)
            .send()
            .await?;

        let response = check_status(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}

/// Turn a non-2xx response into [`TransportError::Status`], preferring the
/// gateway's [`ErrorBody`] message over the raw body.
async fn check_status(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let text = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => body.error,
        Err(_) if text.is_empty() => status.canonical_reason().unwrap_or("").to_string(),
        Err(_) => text,
    };
    Err(TransportError::Status {
        status: status.as_u16(),
        message,
    })
}

#[async_trait]
impl LedgerTransport for HttpTransport {
    async fn discover(&self, identity: &X509Identity) -> Result<DiscoveryResponse, TransportError> {
        let client = self.client()?;
        let url = format!("{}/v1/discovery", self.gateway.as_str().trim_end_matches('/'));
        let response = client
            .get(&url)
            .header(HEADER_MSP_ID, identity.msp_id())
            .header(HEADER_CLIENT_CERT, hex::encode(identity.certificate()))
            .send()
            .await?;

        let response = check_status(response).await?;
        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| TransportError::InvalidResponse(e.to_string()))
    }

    async fn submit(&self, call: Invocation<'_>) -> Result<Vec<u8>, TransportError> {
        self.call(&self.gateway, "submit", call).await
    }

    async fn evaluate(
        &self,
        peer: Option<&Url>,
        call: Invocation<'_>,
    ) -> Result<Vec<u8>, TransportError> {
        let base = peer.unwrap_or(&self.gateway);
        self.call(base, "evaluate", call).await
    }

    fn close(&self) {
        let released = self
            .client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if released.is_some() {
            debug!("transport: released connection to {}", self.gateway);
        }
    }
}

// ---------------------------------------------------------------------------
// Test double
// ---------------------------------------------------------------------------


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use axum::{
        extract::Path,
        http::{HeaderMap, StatusCode},
        routing::{get, post},
        Json, Router,
    };
    use tokio::net::TcpListener;

    async fn discovery() -> Json<DiscoveryResponse> {
        Json(DiscoveryResponse {
            channels: vec![ChannelInfo {
                name: "mychannel".into(),
                peers: vec!["http://peer0.org1.example.com:7051".into()],
            }],
        })
    }

    async fn echo_submit(
        Path((channel, contract)): Path<(String, String)>,
        headers: HeaderMap,
        Json(body): Json<CallBody>,
    ) -> Result<String, (StatusCode, Json<ErrorBody>)> {
        if body.transaction == "Fail" {
            return Err((
                StatusCode::BAD_GATEWAY,
                Json(ErrorBody::new("ordering_failed", "orderer unreachable")),
            ));
        }
        let msp = headers
            .get(HEADER_MSP_ID)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        Ok(format!("{channel}/{contract}/{}/{}/{msp}", body.transaction, body.args.join(",")))
    }

    async fn spawn_mock_server(router: Router) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        Url::parse(&format!("http://{addr}")).unwrap()
    }

    fn identity() -> X509Identity {
        X509Identity::new("Org1MSP", "CERT", "KEY")
    }

    fn invocation<'a>(id: &'a X509Identity, tx: &'a str, args: &'a [&'a str]) -> Invocation<'a> {
        Invocation {
            identity: id,
            channel: "mychannel",
            contract: "basic",
            transaction: tx,
            args,
            tx_id: "tx-1",
        }
    }

    #[tokio::test]
    async fn discover_decodes_channels() {
        let base = spawn_mock_server(Router::new().route("/v1/discovery", get(discovery))).await;
        let transport = HttpTransport::new(base, None).unwrap();

        let found = transport.discover(&identity()).await.unwrap();
        assert_eq!(found.channels.len(), 1);
        assert_eq!(found.channels[0].name, "mychannel");
    }

    #[tokio::test]
    async fn submit_posts_body_and_identity() {
        let app = Router::new().route(
            "/v1/channels/{channel}/contracts/{contract}/submit",
            post(echo_submit),
        );
        let base = spawn_mock_server(app).await;
        let transport = HttpTransport::new(base, None).unwrap();
        let id = identity();

        let out = transport
            .submit(invocation(&id, "CreateAsset", &["asset13", "yellow"]))
            .await
            .unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "mychannel/basic/CreateAsset/asset13,yellow/Org1MSP"
        );
    }

    #[tokio::test]
    async fn error_body_becomes_status_error() {
        let app = Router::new().route(
            "/v1/channels/{channel}/contracts/{contract}/submit",
            post(echo_submit),
        );
        let base = spawn_mock_server(app).await;
        let transport = HttpTransport::new(base, None).unwrap();
        let id = identity();

        let err = transport.submit(invocation(&id, "Fail", &[])).await.unwrap_err();
        match err {
            TransportError::Status { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "orderer unreachable");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn closed_transport_refuses_calls() {
        let transport =
            HttpTransport::new(Url::parse("http://127.0.0.1:9").unwrap(), None).unwrap();
        transport.close();
        let id = identity();
        assert!(matches!(
            transport.submit(invocation(&id, "InitLedger", &[])).await,
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.discover(&id).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_drops_client_while_shared() {
        let transport = Arc::new(
            HttpTransport::new(Url::parse("http://127.0.0.1:9").unwrap(), None).unwrap(),
        );
        let held_by_contract = Arc::clone(&transport);
        assert!(held_by_contract.is_open());

        transport.close();
        assert!(!held_by_contract.is_open());
        assert!(held_by_contract.client.read().unwrap().is_none());

        // A second close is a no-op.
        transport.close();
        assert!(!transport.is_open());
    }

    #[tokio::test]
    async fn unreachable_gateway_is_http_error() {
        // Port 9 (discard) is closed on loopback in test environments.
        let transport =
            HttpTransport::new(Url::parse("http://127.0.0.1:9").unwrap(), None).unwrap();
        assert!(matches!(
            transport.discover(&identity()).await,
            Err(TransportError::Http(_))
        ));
    }
}
