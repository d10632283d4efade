//! Connection profile: where the gateway lives and which roots to trust.
//!
//! The profile is the YAML (or JSON) document the test network generates for
//! each organisation (`connection-org1.yaml`). Only the fields needed to
//! reach the gateway are read; everything else in the document is ignored.
//!
//! ```yaml
//! name: test-network-org1
//! client:
//!   organization: Org1
//! organizations:
//!   Org1:
//!     mspid: Org1MSP
//!     peers: [peer0.org1.example.com]
//! peers:
//!   peer0.org1.example.com:
//!     url: grpcs://localhost:7051
//!     tlsCACerts:
//!       pem: |
//!         -----BEGIN CERTIFICATE-----
//!         ...
//! ```
//!
//! `grpc://` and `grpcs://` URLs are mapped to `http://` and `https://`.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use reqwest::Url;
use serde::Deserialize;
use thiserror::Error;

/// Host that discovered endpoints are rewritten to when discovery-as-localhost
/// is on.
pub const LOCALHOST: &str = "localhost";

// ---------------------------------------------------------------------------
// ProfileError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("cannot read connection profile {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot parse connection profile: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("connection profile declares no peers")]
    NoPeers,

    #[error("peer {peer} has an invalid url {url:?}: {reason}")]
    InvalidUrl {
        peer: String,
        url: String,
        reason: String,
    },

    #[error("cannot read TLS root for peer {peer}: {reason}")]
    TlsRoot { peer: String, reason: String },
}

// ---------------------------------------------------------------------------
// Document shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize)]
struct ClientSection {
    organization: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct OrganizationSection {
    mspid: Option<String>,
    #[serde(default)]
    peers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct PeerSection {
    url: String,
    #[serde(rename = "tlsCACerts")]
    tls_ca_certs: Option<TlsCaCerts>,
}

#[derive(Debug, Clone, Deserialize)]
struct TlsCaCerts {
    pem: Option<String>,
    path: Option<PathBuf>,
}

/// A parsed connection profile.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionProfile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    client: ClientSection,
    #[serde(default)]
    organizations: BTreeMap<String, OrganizationSection>,
    #[serde(default)]
    peers: BTreeMap<String, PeerSection>,
    /// Directory relative `tlsCACerts.path` entries are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

/// A resolved endpoint: peer name, HTTP(S) URL and optional PEM trust root.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub name: String,
    pub url: Url,
    pub tls_root: Option<Vec<u8>>,
}

impl ConnectionProfile {
    /// Read and parse the profile at `path`.
    pub async fn from_file(path: &Path) -> Result<Self, ProfileError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ProfileError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, base_dir)
    }

    /// Parse profile text. YAML is a superset of JSON, so both are accepted.
    pub fn parse(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ProfileError> {
        let mut profile: ConnectionProfile = serde_yaml::from_str(text)?;
        profile.base_dir = base_dir.into();
        Ok(profile)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// MSP id of the client's own organisation, if the profile names one.
    pub fn client_msp_id(&self) -> Option<&str> {
        let org = self.client.organization.as_ref()?;
        self.organizations.get(org)?.mspid.as_deref()
    }

    /// The endpoint the session connects to: the first peer listed under the
    /// client's organisation, else the first peer in the document (by name).
    pub async fn gateway_endpoint(&self) -> Result<Endpoint, ProfileError> {
        let org_peer = self
            .client
            .organization
            .as_ref()
            .and_then(|org| self.organizations.get(org))
            .and_then(|org| org.peers.iter().find(|p| self.peers.contains_key(*p)));

        let (name, peer) = match org_peer {
            Some(name) => (name.as_str(), &self.peers[name]),
            None => self
                .peers
                .iter()
                .next()
                .map(|(n, p)| (n.as_str(), p))
                .ok_or(ProfileError::NoPeers)?,
        };

        let url = http_url(&peer.url).map_err(|reason| ProfileError::InvalidUrl {
            peer: name.to_string(),
            url: peer.url.clone(),
            reason,
        })?;
        let tls_root = self.tls_root(name, peer).await?;

        Ok(Endpoint {
            name: name.to_string(),
            url,
            tls_root,
        })
    }

    async fn tls_root(&self, name: &str, peer: &PeerSection) -> Result<Option<Vec<u8>>, ProfileError> {
        let Some(certs) = &peer.tls_ca_certs else {
            return Ok(None);
        };
        if let Some(pem) = &certs.pem {
            return Ok(Some(pem.as_bytes().to_vec()));
        }
        match &certs.path {
            Some(path) => {
                let path = self.base_dir.join(path);
                tokio::fs::read(&path)
                    .await
                    .map(Some)
                    .map_err(|e| ProfileError::TlsRoot {
                        peer: name.to_string(),
                        reason: format!("{}: {e}", path.display()),
                    })
            }
            None => Ok(None),
        }
    }
}

/// Parse an endpoint URL, mapping gRPC schemes onto their HTTP equivalents.
pub fn http_url(raw: &str) -> Result<Url, String> {
    let mapped = if let Some(rest) = raw.strip_prefix("grpcs://") {
        format!("https://{rest}")
    } else if let Some(rest) = raw.strip_prefix("grpc://") {
        format!("http://{rest}")
    } else {
        raw.to_string()
    };

    let url = Url::parse(&mapped).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(format!("unsupported scheme {other:?}")),
    }
}

/// Rewrite `url`'s host to [`LOCALHOST`], keeping scheme, port and path.
///
/// Used for endpoints advertised by discovery in a local test deployment,
/// where they name container-internal hosts the client cannot resolve.
pub fn as_localhost(url: &Url) -> Url {
    let mut local = url.clone();
    if local.set_host(Some(LOCALHOST)).is_err() {
        return url.clone();
    }
    local
}

#[cfg(test)]
mod tests {
    use super::*;

    const PROFILE: &str = r#"
name: test-network-org1
version: 1.0.0
client:
  organization: Org1
organizations:
  Org1:
    mspid: Org1MSP
    peers:
      - peer0.org1.example.com
peers:
  aaa.other.example.com:
    url: grpc://other:9051
  peer0.org1.example.com:
    url: grpcs://localhost:7051
    tlsCACerts:
      pem: |
        -----BEGIN CERTIFICATE-----
        MIIB
        -----END CERTIFICATE-----
    grpcOptions:
      ssl-target-name-override: peer0.org1.example.com
"#;

    #[tokio::test]
    async fn picks_client_org_peer() {
        let profile = ConnectionProfile::parse(PROFILE, ".").unwrap();
        assert_eq!(profile.name(), Some("test-network-org1"));
        assert_eq!(profile.client_msp_id(), Some("Org1MSP"));

        let ep = profile.gateway_endpoint().await.unwrap();
        assert_eq!(ep.name, "peer0.org1.example.com");
        assert_eq!(ep.url.as_str(), "https://localhost:7051/");
        assert!(ep.tls_root.unwrap().starts_with(b"-----BEGIN CERTIFICATE-----"));
    }

    #[tokio::test]
    async fn falls_back_to_first_peer() {
        let json = r#"{"peers":{"peer0":{"url":"http://127.0.0.1:8080"}}}"#;
        let profile = ConnectionProfile::parse(json, ".").unwrap();
        let ep = profile.gateway_endpoint().await.unwrap();
        assert_eq!(ep.name, "peer0");
        assert_eq!(ep.url.port(), Some(8080));
        assert!(ep.tls_root.is_none());
    }

    #[tokio::test]
    async fn no_peers() {
        let profile = ConnectionProfile::parse("name: empty\n", ".").unwrap();
        assert!(matches!(
            profile.gateway_endpoint().await,
            Err(ProfileError::NoPeers)
        ));
    }

    #[tokio::test]
    async fn tls_path_is_relative_to_profile() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("ca.pem"), "ROOT").unwrap();
        let yaml = "peers:\n  p:\n    url: grpcs://localhost:7051\n    tlsCACerts:\n      path: ca.pem\n";
        std::fs::write(dir.path().join("ccp.yaml"), yaml).unwrap();

        let profile = ConnectionProfile::from_file(&dir.path().join("ccp.yaml"))
            .await
            .unwrap();
        let ep = profile.gateway_endpoint().await.unwrap();
        assert_eq!(ep.tls_root.as_deref(), Some(&b"ROOT"[..]));
    }

    #[test]
    fn maps_grpc_schemes() {
        assert_eq!(http_url("grpc://peer0:7051").unwrap().as_str(), "http://peer0:7051/");
        assert_eq!(http_url("grpcs://peer0:7051").unwrap().scheme(), "https");
        assert!(http_url("ftp://peer0").is_err());
    }

    #[test]
    fn localhost_remap_keeps_port() {
        let url = Url::parse("http://peer0.org1.example.com:7051/").unwrap();
        assert_eq!(as_localhost(&url).as_str(), "http://localhost:7051/");
    }
}
