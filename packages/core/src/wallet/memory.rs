//! In-memory wallet.
//!
//! Identities live in a `HashMap` behind a [`RwLock`] and are lost when the
//! process exits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{check_label, Wallet, WalletError};
use crate::identity::X509Identity;

/// Thread-safe, in-memory implementation of [`Wallet`].
#[derive(Default)]
pub struct MemoryWallet {
    identities: RwLock<HashMap<String, X509Identity>>,
}

impl MemoryWallet {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Wallet for MemoryWallet {
    async fn exists(&self, label: &str) -> bool {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        identities.contains_key(label)
    }

    async fn put(&self, label: &str, identity: &X509Identity) -> Result<(), WalletError> {
        check_label(label)?;
        let mut identities = self.identities.write().unwrap_or_else(PoisonError::into_inner);
        identities.insert(label.to_string(), identity.clone());
        Ok(())
    }

    async fn get(&self, label: &str) -> Result<X509Identity, WalletError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        identities
            .get(label)
            .cloned()
            .ok_or_else(|| WalletError::NotFound(label.to_string()))
    }

    async fn list(&self) -> Result<Vec<String>, WalletError> {
        let identities = self.identities.read().unwrap_or_else(PoisonError::into_inner);
        Ok(identities.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_overwrites_existing_label() {
        let wallet = MemoryWallet::new();
        wallet
            .put("appUser", &X509Identity::new("Org1MSP", "A", "K"))
            .await
            .unwrap();
        wallet
            .put("appUser", &X509Identity::new("Org2MSP", "B", "K"))
            .await
            .unwrap();

        assert_eq!(wallet.list().await.unwrap().len(), 1);
        assert_eq!(wallet.get("appUser").await.unwrap().msp_id(), "Org2MSP");
    }

    #[tokio::test]
    async fn get_unknown_label() {
        let wallet = MemoryWallet::new();
        assert!(matches!(
            wallet.get("nobody").await,
            Err(WalletError::NotFound(_))
        ));
    }
}
