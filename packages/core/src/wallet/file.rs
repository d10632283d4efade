//! Directory-backed wallet, one `<label>.id` JSON file per identity.
//!
//! The file format is the one the Fabric SDKs use for their file-system
//! wallets, so a wallet directory can be shared with applications written
//! against those SDKs.
//!
//! Writes go to a temporary file in the same directory and are then renamed
//! over the target, so a crash mid-write never leaves a truncated entry.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{check_label, decode_entry, encode_entry, Wallet, WalletError};
use crate::identity::X509Identity;

const ENTRY_EXTENSION: &str = "id";

/// File-system implementation of [`Wallet`].
#[derive(Debug, Clone)]
pub struct FileSystemWallet {
    dir: PathBuf,
}

impl FileSystemWallet {
    /// Open the wallet rooted at `dir`.
    ///
    /// The directory does not need to exist yet; the first [`put`] creates
    /// it. Fails only if `dir` exists and is not a directory.
    ///
    /// [`put`]: Wallet::put
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, WalletError> {
        let dir = dir.into();
        if dir.exists() && !dir.is_dir() {
            return Err(WalletError::Internal(format!(
                "wallet path {} is not a directory",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    /// The wallet directory.
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, label: &str) -> PathBuf {
        self.dir.join(format!("{label}.{ENTRY_EXTENSION}"))
    }
}

fn io_err(e: io::Error) -> WalletError {
    WalletError::Internal(e.to_string())
}

#[async_trait]
impl Wallet for FileSystemWallet {
    async fn exists(&self, label: &str) -> bool {
        if check_label(label).is_err() {
            return false;
        }
        match tokio::fs::try_exists(self.entry_path(label)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("wallet: cannot check {label} in {}: {e}", self.dir.display());
                false
            }
        }
    }

    async fn put(&self, label: &str, identity: &X509Identity) -> Result<(), WalletError> {
        check_label(label)?;
        let data = encode_entry(label, identity)?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(io_err)?;

        let target = self.entry_path(label);
        let staging = self.dir.join(format!(".{label}.{ENTRY_EXTENSION}.tmp"));
        tokio::fs::write(&staging, data).await.map_err(io_err)?;
        tokio::fs::rename(&staging, &target).await.map_err(io_err)?;

        debug!("wallet: wrote {}", target.display());
        Ok(())
    }

    async fn get(&self, label: &str) -> Result<X509Identity, WalletError> {
        check_label(label)?;
        let data = match tokio::fs::read_to_string(self.entry_path(label)).await {
            Ok(data) => data,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(WalletError::NotFound(label.to_string()))
            }
            Err(e) => return Err(io_err(e)),
        };
        decode_entry(label, &data)
    }

    async fn list(&self) -> Result<Vec<String>, WalletError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(e)),
        };

        let mut labels = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                labels.push(stem.to_string());
            }
        }
        Ok(labels)
    }
}
