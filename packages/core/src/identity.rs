//! Client identity: an MSP id plus PEM certificate and private key.
//!
//! The certificate and key are carried as opaque byte blobs. Nothing in this
//! crate parses them; they are handed to the gateway, which owns the X.509
//! semantics.
//!
//! # Credential directory layout
//!
//! ```text
//! <cred_path>/
//!   signcerts/cert.pem     signing certificate (fixed name)
//!   keystore/<anything>    exactly one private key file
//! ```
//!
//! This is the layout produced by the test network's certificate authority
//! for each enrolled user (`users/User1@org1.example.com/msp`).

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

/// Relative path of the signing certificate inside a credential directory.
pub const CERT_SUBPATH: &str = "signcerts/cert.pem";

/// Directory inside a credential directory that holds the private key.
pub const KEYSTORE_DIR: &str = "keystore";

/// Identity type tag written into wallet entries.
pub const X509_TYPE: &str = "X.509";

// ---------------------------------------------------------------------------
// CredentialError
// ---------------------------------------------------------------------------

/// Errors returned by [`load_credentials`]. All of them are configuration
/// errors; none is worth retrying.
#[derive(Debug, Error)]
pub enum CredentialError {
    /// The signing certificate is missing or cannot be read.
    #[error("certificate not found at {path}: {source}")]
    CredentialNotFound {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The keystore holds zero or several files; exactly one is required.
    #[error("keystore {dir} should contain exactly one file, found {count}")]
    KeystoreAmbiguous { dir: PathBuf, count: usize },

    /// The single key file was found but could not be read.
    #[error("private key at {path} is unreadable: {source}")]
    KeystoreUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

// ---------------------------------------------------------------------------
// X509Identity
// ---------------------------------------------------------------------------

/// A signing identity: organisation MSP id, PEM certificate, PEM private key.
///
/// Immutable once built. Cloning copies the key material, which is how the
/// wallet persists it.
#[derive(Clone, PartialEq, Eq)]
pub struct X509Identity {
    msp_id: String,
    certificate: Vec<u8>,
    private_key: Vec<u8>,
}

impl X509Identity {
    pub fn new(
        msp_id: impl Into<String>,
        certificate: impl Into<Vec<u8>>,
        private_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            msp_id: msp_id.into(),
            certificate: certificate.into(),
            private_key: private_key.into(),
        }
    }

    /// The membership service provider id, e.g. `Org1MSP`.
    pub fn msp_id(&self) -> &str {
        &self.msp_id
    }

    /// PEM-encoded signing certificate.
    pub fn certificate(&self) -> &[u8] {
        &self.certificate
    }

    /// PEM-encoded private key. **Keep this secret.**
    pub fn private_key(&self) -> &[u8] {
        &self.private_key
    }
}

// Key material stays out of logs.
impl fmt::Debug for X509Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("X509Identity")
            .field("msp_id", &self.msp_id)
            .field("certificate", &format_args!("<{} bytes>", self.certificate.len()))
            .field("private_key", &"<redacted>")
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Loader
// ---------------------------------------------------------------------------

/// Read the certificate and private key under `cred_path` and assemble an
/// identity for `msp_id`.
///
/// The key file may have any name, but it must be the only file in
/// `keystore/`. A missing keystore directory counts as an empty one.
pub async fn load_credentials(
    cred_path: &Path,
    msp_id: &str,
) -> Result<X509Identity, CredentialError> {
    let cert_path = cred_path.join(CERT_SUBPATH);
    let certificate = tokio::fs::read(&cert_path)
        .await
        .map_err(|source| CredentialError::CredentialNotFound {
            path: cert_path.clone(),
            source,
        })?;

    let key_dir = cred_path.join(KEYSTORE_DIR);
    let key_path = sole_file(&key_dir).await?;
    let private_key = tokio::fs::read(&key_path)
        .await
        .map_err(|source| CredentialError::KeystoreUnreadable {
            path: key_path.clone(),
            source,
        })?;

    debug!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "loaded credentials for {msp_id}"
    );
    Ok(X509Identity::new(msp_id, certificate, private_key))
}

/// Return the path of the only regular file in `dir`.
async fn sole_file(dir: &Path) -> Result<PathBuf, CredentialError> {
    let ambiguous = |count| CredentialError::KeystoreAmbiguous {
        dir: dir.to_path_buf(),
        count,
    };

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return Err(ambiguous(0)),
    };

    let mut files = Vec::new();
    loop {
        match entries.next_entry().await {
            Ok(Some(entry)) => {
                let is_file = entry
                    .file_type()
                    .await
                    .map(|t| !t.is_dir())
                    .unwrap_or(false);
                if is_file {
                    files.push(entry.path());
                }
            }
            Ok(None) => break,
            Err(source) => {
                return Err(CredentialError::KeystoreUnreadable {
                    path: dir.to_path_buf(),
                    source,
                })
            }
        }
    }

    match files.len() {
        1 => Ok(files.remove(0)),
        n => Err(ambiguous(n)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
