//! Contract calls and the submit / evaluate split.
//!
//! A [`Contract`] is a name bound inside a [`Network`](crate::gateway::Network).
//! Binding never fails; a missing contract only shows up when a call against
//! it is rejected by the gateway.
//!
//! - [`Contract::submit_transaction`] goes through ordering and endorsement.
//!   It changes ledger state. The client neither retries nor de-duplicates:
//!   if the connection drops after the gateway accepted the call, the
//!   transaction may still commit, and a caller that re-submits may apply it
//!   twice.
//! - [`Contract::evaluate_transaction`] is answered by a single peer without
//!   ordering. It may observe state from before a submit that has just
//!   returned.
//!
//! Arguments are positional strings passed through untouched; checking their
//! number and meaning is the contract's job.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use reqwest::Url;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::identity::X509Identity;
use crate::transport::{Invocation, LedgerTransport, TransportError};

// ---------------------------------------------------------------------------
// CallResult / TransactionError
// ---------------------------------------------------------------------------

/// The raw payload returned by a call, with the transaction id it was sent
/// under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResult {
    payload: Vec<u8>,
    tx_id: String,
}

impl CallResult {
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn tx_id(&self) -> &str {
        &self.tx_id
    }

    /// The payload as UTF-8 text, with invalid sequences replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// A failed contract call.
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("failed to submit transaction {transaction}: {source}")]
    Submit {
        transaction: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to evaluate transaction {transaction}: {source}")]
    Evaluate {
        transaction: String,
        #[source]
        source: TransportError,
    },
}

impl TransactionError {
    /// Name of the transaction that failed.
    pub fn transaction(&self) -> &str {
        match self {
            Self::Submit { transaction, .. } | Self::Evaluate { transaction, .. } => transaction,
        }
    }

    pub fn is_submit(&self) -> bool {
        matches!(self, Self::Submit { .. })
    }
}

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// A contract on one channel, ready to take calls.
#[derive(Clone)]
pub struct Contract {
    channel: String,
    name: String,
    /// Peer that serves evaluations; `None` means the gateway itself.
    peer: Option<Url>,
    transport: Arc<dyn LedgerTransport>,
    identity: Arc<X509Identity>,
}

impl Contract {
    pub(crate) fn new(
        channel: String,
        name: String,
        peer: Option<Url>,
        transport: Arc<dyn LedgerTransport>,
        identity: Arc<X509Identity>,
    ) -> Self {
        Self {
            channel,
            name,
            peer,
            transport,
            identity,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Submit a state-changing transaction and wait for it to commit.
    pub async fn submit_transaction(
        &self,
        transaction: &str,
        args: &[&str],
    ) -> Result<CallResult, TransactionError> {
        let tx_id = Uuid::now_v7().to_string();
        debug!(tx_id = %tx_id, "submit {transaction}{args:?}");

        self.transport
            .submit(self.invocation(transaction, args, &tx_id))
            .await
            .map(|payload| CallResult {
                payload,
                tx_id: tx_id.clone(),
            })
            .map_err(|source| TransactionError::Submit {
                transaction: transaction.to_string(),
                source,
            })
    }

    /// Evaluate a read-only transaction on a single peer.
    pub async fn evaluate_transaction(
        &self,
        transaction: &str,
        args: &[&str],
    ) -> Result<CallResult, TransactionError> {
        let tx_id = Uuid::now_v7().to_string();
        debug!(tx_id = %tx_id, "evaluate {transaction}{args:?}");

        self.transport
            .evaluate(self.peer.as_ref(), self.invocation(transaction, args, &tx_id))
            .await
            .map(|payload| CallResult {
                payload,
                tx_id: tx_id.clone(),
            })
            .map_err(|source| TransactionError::Evaluate {
                transaction: transaction.to_string(),
                source,
            })
    }

    fn invocation<'a>(
        &'a self,
        transaction: &'a str,
        args: &'a [&'a str],
        tx_id: &'a str,
    ) -> Invocation<'a> {
        Invocation {
            identity: &self.identity,
            channel: &self.channel,
            contract: &self.name,
            transaction,
            args,
            tx_id,
        }
    }
}

impl fmt::Debug for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Contract")
            .field("channel", &self.channel)
            .field("name", &self.name)
            .field("peer", &self.peer.as_ref().map(Url::as_str))
            .finish()
    }
}
