//! Identity wallet: a persistent `label → X509Identity` store.
//!
//! The [`Wallet`] trait is the contract between the provisioning step and the
//! session factory. Provisioning writes an identity once; every later run
//! finds it with [`Wallet::exists`] and skips the credential directory
//! entirely.
//!
//! # Implementations
//!
//! | Type | When to use |
//! |------|-------------|
//! | [`FileSystemWallet`] | Default; one `<label>.id` file per identity, SDK-compatible |
//! | [`SqliteWallet`] | Single-file database; many identities in one place |
//! | [`MemoryWallet`] | Tests and throw-away runs |
//!
//! [`FileSystemWallet`]: file::FileSystemWallet
//! [`SqliteWallet`]: sqlite::SqliteWallet
//! [`MemoryWallet`]: memory::MemoryWallet

pub mod file;
pub mod memory;
pub mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::identity::{load_credentials, CredentialError, X509Identity, X509_TYPE};

pub use file::FileSystemWallet;
pub use memory::MemoryWallet;
pub use sqlite::SqliteWallet;

// ---------------------------------------------------------------------------
// WalletError
// ---------------------------------------------------------------------------

/// Errors that wallet operations can return.
#[derive(Debug, Error)]
pub enum WalletError {
    /// No identity is stored under this label.
    #[error("identity {0:?} not found in wallet")]
    NotFound(String),

    /// The label cannot be used as a storage key (empty, or contains a path
    /// separator).
    #[error("invalid wallet label {0:?}")]
    InvalidLabel(String),

    /// A stored entry exists but cannot be decoded.
    #[error("corrupt wallet entry {label:?}: {reason}")]
    Corrupt { label: String, reason: String },

    /// An unexpected error in the backing store.
    #[error("wallet storage error: {0}")]
    Internal(String),
}

// ---------------------------------------------------------------------------
// Wallet trait
// ---------------------------------------------------------------------------

/// A keyed, persistent identity store.
///
/// At most one identity exists per label. [`put`](Wallet::put) is the only
/// mutation and overwrites explicitly.
///
/// Implementations do no cross-process locking. Two processes that both see
/// `exists == false` will both `put`; callers that provision concurrently
/// must serialise `put` themselves.
#[async_trait]
pub trait Wallet: Send + Sync + 'static {
    /// Return `true` if an identity is stored under `label`.
    ///
    /// A miss is a normal `false`, not an error. Backend failures are logged
    /// by the implementation and also reported as `false`.
    async fn exists(&self, label: &str) -> bool;

    /// Store `identity` under `label`, replacing any previous entry.
    ///
    /// Creates the backing location on first use.
    async fn put(&self, label: &str, identity: &X509Identity) -> Result<(), WalletError>;

    /// Retrieve the identity stored under `label`.
    async fn get(&self, label: &str) -> Result<X509Identity, WalletError>;

    /// Return all stored labels, in unspecified order.
    async fn list(&self) -> Result<Vec<String>, WalletError>;
}

// ---------------------------------------------------------------------------
// Serialised entry
// ---------------------------------------------------------------------------

/// On-disk form of a wallet entry, shared by the file and SQLite backends.
///
/// ```json
/// {"credentials":{"certificate":"-----BEGIN…","privateKey":"-----BEGIN…"},
///  "mspId":"Org1MSP","type":"X.509","version":1}
/// ```
#[derive(Debug, Serialize, Deserialize)]
struct WalletEntry {
    credentials: EntryCredentials,
    #[serde(rename = "mspId")]
    msp_id: String,
    #[serde(rename = "type")]
    kind: String,
    version: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct EntryCredentials {
    certificate: String,
    #[serde(rename = "privateKey")]
    private_key: String,
}

const ENTRY_VERSION: u32 = 1;

fn encode_entry(label: &str, identity: &X509Identity) -> Result<String, WalletError> {
    let text = |bytes: &[u8], what: &str| {
        String::from_utf8(bytes.to_vec()).map_err(|_| WalletError::Corrupt {
            label: label.to_string(),
            reason: format!("{what} is not valid UTF-8 PEM"),
        })
    };

    let entry = WalletEntry {
        credentials: EntryCredentials {
            certificate: text(identity.certificate(), "certificate")?,
            private_key: text(identity.private_key(), "private key")?,
        },
        msp_id: identity.msp_id().to_string(),
        kind: X509_TYPE.to_string(),
        version: ENTRY_VERSION,
    };
    serde_json::to_string(&entry).map_err(|e| WalletError::Internal(format!("JSON error: {e}")))
}

fn decode_entry(label: &str, data: &str) -> Result<X509Identity, WalletError> {
    let corrupt = |reason: String| WalletError::Corrupt {
        label: label.to_string(),
        reason,
    };

    let entry: WalletEntry = serde_json::from_str(data).map_err(|e| corrupt(e.to_string()))?;
    if entry.kind != X509_TYPE {
        return Err(corrupt(format!("unsupported identity type {:?}", entry.kind)));
    }
    Ok(X509Identity::new(
        entry.msp_id,
        entry.credentials.certificate,
        entry.credentials.private_key,
    ))
}

/// Labels become file names, so they must not be empty or escape the wallet
/// directory.
fn check_label(label: &str) -> Result<(), WalletError> {
    let bad = label.is_empty()
        || label == "."
        || label == ".."
        || label.contains(['/', '\\', '\0']);
    if bad {
        Err(WalletError::InvalidLabel(label.to_string()))
    } else {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Provisioning
// ---------------------------------------------------------------------------

/// Outcome of [`provision`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provisioned {
    /// The label was already in the wallet; credentials were not read.
    AlreadyPresent,
    /// Credentials were loaded from disk and stored.
    Stored,
}

/// Errors returned by [`provision`].
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("failed to load credentials: {0}")]
    Credentials(#[from] CredentialError),

    #[error("failed to store identity: {0}")]
    Wallet(#[from] WalletError),
}

/// Make sure `label` is in `wallet`, loading it from `cred_path` if needed.
///
/// Checks [`Wallet::exists`] first, so repeated runs never touch the
/// credential directory again and never rewrite the entry.
pub async fn provision(
    wallet: &dyn Wallet,
    label: &str,
    cred_path: &Path,
    msp_id: &str,
) -> Result<Provisioned, ProvisionError> {
    if wallet.exists(label).await {
        info!("wallet: identity {label} already present");
        return Ok(Provisioned::AlreadyPresent);
    }

    let identity = load_credentials(cred_path, msp_id).await?;
    wallet.put(label, &identity).await?;
    info!("wallet: stored identity {label} ({msp_id})");
    Ok(Provisioned::Stored)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
