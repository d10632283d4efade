//! Client library for a ledger gateway.
//!
//! This crate holds everything a client needs to act against a named smart
//! contract on a remote transactional ledger: a persistent identity wallet,
//! a timed session to the network gateway, the submit/evaluate call model,
//! result rendering, and a diagnostic probe for failed submits. The
//! `asset-transfer` binary and the conformance suite are both thin callers
//! of [`workflow`].
//!
//! # Crate layout
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`identity`] | X.509 identity type and the credential directory loader |
//! | [`wallet`] | [`Wallet`] trait, file/SQLite/memory backends, idempotent [`provision`] |
//! | [`profile`] | Connection profile parsing and endpoint resolution |
//! | [`transport`] | [`LedgerTransport`] seam and the reqwest-backed [`HttpTransport`] |
//! | [`gateway`] | Session establishment: [`Gateway`] → [`Network`] → [`Contract`] |
//! | [`contract`] | `submit_transaction` / `evaluate_transaction` |
//! | [`render`] | Pretty-printing of opaque result payloads |
//! | [`diagnostics`] | Container listing and the submit-failure [`DiagnosticProbe`] |
//! | [`workflow`] | The asset-transfer transaction sequence and its error type |
//!
//! # Quick start
//!
//! ```rust,ignore
//! use ledger_gateway::{workflow, WorkflowConfig};
//!
//! let report = workflow::run(&WorkflowConfig::default()).await?;
//! for step in &report.steps {
//!     if let Some(output) = step.output() {
//!         println!("{}: {}", step.transaction, output.text);
//!     }
//! }
//! ```

pub mod contract;
pub mod diagnostics;
pub mod gateway;
pub mod identity;
pub mod profile;
pub mod render;
pub mod transport;
pub mod wallet;
pub mod workflow;

pub use contract::{CallResult, Contract, TransactionError};
pub use diagnostics::{
    ContainerInfo, DiagnosticError, DiagnosticProbe, DiagnosticReport, DockerCli, ProcessLister,
};
pub use gateway::{ConnectionError, Gateway, GatewayOptions, Network};
pub use identity::{load_credentials, CredentialError, X509Identity};
pub use profile::{ConnectionProfile, ProfileError};
pub use render::{present, Presentation, PresentationError};
pub use transport::{HttpTransport, LedgerTransport, TransportError};
pub use wallet::{
    provision, FileSystemWallet, MemoryWallet, ProvisionError, Provisioned, SqliteWallet, Wallet,
    WalletError,
};
pub use workflow::{
    Stage, StepOutcome, StepStatus, WalletBackend, WorkflowConfig, WorkflowError, WorkflowErrorKind,
    WorkflowReport,
};
