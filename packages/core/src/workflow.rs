//! The asset-transfer sample run, end to end.
//!
//! ```text
//! open wallet ─► provision appUser ─► load profile ─► connect ─► network ─► contract
//!                                                                              │
//!     InitLedger · GetAllAssets · CreateAsset · ReadAsset · AssetExists ·      │
//!     TransferAsset · ReadAsset                                   ◄────────────┘
//! ```
//!
//! Every stage either succeeds or returns a [`WorkflowError`] naming the
//! stage; nothing here exits the process. Once connected, the gateway is
//! closed exactly once whatever the outcome.
//!
//! A failed submit runs the [`DiagnosticProbe`] (when one is configured)
//! before the error is returned, and the probe's findings travel inside the
//! error. A failed evaluate does not run it.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, warn};

use crate::contract::{Contract, TransactionError};
use crate::diagnostics::{DiagnosticError, DiagnosticProbe, DiagnosticReport, DockerCli, DEFAULT_KEYWORD};
use crate::gateway::{ConnectionError, Gateway, GatewayOptions};
use crate::profile::{ConnectionProfile, ProfileError};
use crate::render::{present, Presentation};
use crate::wallet::{provision, FileSystemWallet, ProvisionError, Provisioned, SqliteWallet, Wallet, WalletError};

/// Credential directory of the test network's Org1 user.
pub const DEFAULT_CRED_PATH: &str =
    "../../test-network/organizations/peerOrganizations/org1.example.com/users/User1@org1.example.com/msp";

/// Org1 connection profile in the test network.
pub const DEFAULT_PROFILE_PATH: &str =
    "../../test-network/organizations/peerOrganizations/org1.example.com/connection-org1.yaml";

/// File name of the SQLite wallet inside the wallet directory.
pub const SQLITE_WALLET_FILE: &str = "wallet.sqlite";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Where identities are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WalletBackend {
    /// One `<label>.id` JSON file per identity.
    #[default]
    FileSystem,
    /// A single SQLite database, `wallet.sqlite` in the wallet directory.
    Sqlite,
}

/// Everything a run needs.
///
/// | Field | Default |
/// |-------|---------|
/// | `wallet_path` | `wallet` |
/// | `wallet_backend` | file system |
/// | `user` | `appUser` |
/// | `msp_id` | `Org1MSP` |
/// | `cred_path` | [`DEFAULT_CRED_PATH`] |
/// | `profile_path` | [`DEFAULT_PROFILE_PATH`] |
/// | `channel` | `mychannel` |
/// | `contract` | `basic` |
/// | `connect_timeout` | 100 s |
/// | `discovery_as_localhost` | `true` |
/// | `diagnostics` | `true` |
/// | `diagnostic_keyword` | `orderer` |
/// | `docker_program` | `docker` |
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub wallet_path: PathBuf,
    pub wallet_backend: WalletBackend,
    /// Wallet label the session authenticates as.
    pub user: String,
    pub msp_id: String,
    /// MSP directory holding `signcerts/cert.pem` and `keystore/`.
    pub cred_path: PathBuf,
    pub profile_path: PathBuf,
    pub channel: String,
    pub contract: String,
    /// Bound on the connect handshake only.
    pub connect_timeout: Duration,
    pub discovery_as_localhost: bool,
    /// Inspect running containers when a submit fails.
    pub diagnostics: bool,
    pub diagnostic_keyword: String,
    pub docker_program: String,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            wallet_path: PathBuf::from("wallet"),
            wallet_backend: WalletBackend::FileSystem,
            user: "appUser".into(),
            msp_id: "Org1MSP".into(),
            cred_path: PathBuf::from(DEFAULT_CRED_PATH),
            profile_path: PathBuf::from(DEFAULT_PROFILE_PATH),
            channel: "mychannel".into(),
            contract: "basic".into(),
            connect_timeout: Duration::from_secs(100),
            discovery_as_localhost: true,
            diagnostics: true,
            diagnostic_keyword: DEFAULT_KEYWORD.into(),
            docker_program: "docker".into(),
        }
    }
}

impl WorkflowConfig {
    pub fn gateway_options(&self) -> GatewayOptions {
        GatewayOptions {
            timeout: Some(self.connect_timeout),
            discovery_as_localhost: self.discovery_as_localhost,
        }
    }

    /// The probe to run on submit failures, if diagnostics are enabled.
    pub fn probe(&self) -> Option<DiagnosticProbe> {
        self.diagnostics.then(|| {
            DiagnosticProbe::new(
                Arc::new(DockerCli::with_program(&self.docker_program)),
                &self.diagnostic_keyword,
            )
        })
    }

    fn open_wallet(&self) -> Result<Box<dyn Wallet>, WalletError> {
        let wallet: Box<dyn Wallet> = match self.wallet_backend {
            WalletBackend::FileSystem => Box::new(FileSystemWallet::open(&self.wallet_path)?),
            WalletBackend::Sqlite => {
                Box::new(SqliteWallet::open(&self.wallet_path.join(SQLITE_WALLET_FILE))?)
            }
        };
        Ok(wallet)
    }
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Submit,
    Evaluate,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Submit => "Submit",
            Self::Evaluate => "Evaluate",
        })
    }
}

/// What a failed step does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Stop and return the error.
    Fatal,
    /// Log it and carry on with the next step.
    Tolerated,
}

/// One contract call in a scripted sequence.
#[derive(Debug, Clone, Copy)]
pub struct Step {
    pub transaction: &'static str,
    pub args: &'static [&'static str],
    pub kind: CallKind,
    pub policy: FailurePolicy,
    /// Shown in the transcript before the call.
    pub description: &'static str,
}

const fn submit(transaction: &'static str, args: &'static [&'static str], description: &'static str) -> Step {
    Step {
        transaction,
        args,
        kind: CallKind::Submit,
        policy: FailurePolicy::Fatal,
        description,
    }
}

const fn evaluate(transaction: &'static str, args: &'static [&'static str], description: &'static str) -> Step {
    Step {
        transaction,
        args,
        kind: CallKind::Evaluate,
        policy: FailurePolicy::Fatal,
        description,
    }
}

/// The asset-transfer-basic walkthrough.
///
/// `CreateAsset` is tolerated so that re-running against a ledger that
/// already holds `asset13` still reaches the remaining steps.
pub const ASSET_TRANSFER_STEPS: &[Step] = &[
    submit("InitLedger", &[], "creates the initial set of assets on the ledger"),
    evaluate("GetAllAssets", &[], "returns all the current assets on the ledger"),
    Step {
        policy: FailurePolicy::Tolerated,
        ..submit(
            "CreateAsset",
            &["asset13", "yellow", "5", "Tom", "1300"],
            "creates new asset with ID, color, size, owner and appraised value",
        )
    },
    evaluate("ReadAsset", &["asset13"], "returns an asset with a given asset ID"),
    evaluate("AssetExists", &["asset1"], "returns 'true' if an asset with given asset ID exists"),
    submit("TransferAsset", &["asset1", "Tom"], "transfers an asset to a new owner"),
    evaluate("ReadAsset", &["asset1"], "returns asset attributes"),
];

// ---------------------------------------------------------------------------
// Report / errors
// ---------------------------------------------------------------------------

/// How one step ended.
#[derive(Debug)]
pub enum StepStatus {
    Completed {
        tx_id: String,
        output: Presentation,
    },
    /// Failed under [`FailurePolicy::Tolerated`].
    Tolerated {
        error: TransactionError,
        diagnostics: Option<Result<DiagnosticReport, DiagnosticError>>,
    },
}

#[derive(Debug)]
pub struct StepOutcome {
    pub transaction: &'static str,
    pub kind: CallKind,
    pub status: StepStatus,
}

impl StepOutcome {
    /// The rendered result, if the step completed.
    pub fn output(&self) -> Option<&Presentation> {
        match &self.status {
            StepStatus::Completed { output, .. } => Some(output),
            StepStatus::Tolerated { .. } => None,
        }
    }
}

/// Per-step results of a run, in execution order.
#[derive(Debug, Default)]
pub struct WorkflowReport {
    pub steps: Vec<StepOutcome>,
}

/// The stage a run failed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    OpenWallet,
    PopulateWallet,
    LoadProfile,
    Connect,
    ResolveNetwork,
    Transaction(&'static str),
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OpenWallet => f.write_str("create wallet"),
            Self::PopulateWallet => f.write_str("populate wallet contents"),
            Self::LoadProfile => f.write_str("load connection profile"),
            Self::Connect => f.write_str("connect to gateway"),
            Self::ResolveNetwork => f.write_str("get network"),
            Self::Transaction(name) => write!(f, "run transaction {name}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum WorkflowErrorKind {
    #[error(transparent)]
    Wallet(#[from] WalletError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl WorkflowErrorKind {
    /// Bad local setup: wallet, credentials or profile.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Wallet(_)
                | Self::Provision(_)
                | Self::Profile(_)
                | Self::Connection(ConnectionError::Profile(_) | ConnectionError::Wallet(_))
        )
    }
}

/// A run that stopped early.
#[derive(Debug, Error)]
#[error("failed to {stage}: {kind}")]
pub struct WorkflowError {
    pub stage: Stage,
    #[source]
    pub kind: WorkflowErrorKind,
    /// Probe findings gathered before giving up on a submit.
    pub diagnostics: Option<Result<DiagnosticReport, DiagnosticError>>,
}

impl WorkflowError {
    fn new(stage: Stage, kind: impl Into<WorkflowErrorKind>) -> Self {
        Self {
            stage,
            kind: kind.into(),
            diagnostics: None,
        }
    }

    /// Process exit status for this failure.
    pub fn exit_code(&self) -> i32 {
        if self.kind.is_configuration() {
            2
        } else {
            1
        }
    }
}

// ---------------------------------------------------------------------------
// Running
// ---------------------------------------------------------------------------

/// Provision, connect and run [`ASSET_TRANSFER_STEPS`].
pub async fn run(config: &WorkflowConfig) -> Result<WorkflowReport, WorkflowError> {
    let wallet = config
        .open_wallet()
        .map_err(|e| WorkflowError::new(Stage::OpenWallet, e))?;
    info!("AssetTransfer: wallet opened at {}", config.wallet_path.display());

    populate_wallet(wallet.as_ref(), config).await?;

    let profile = ConnectionProfile::from_file(&config.profile_path)
        .await
        .map_err(|e| WorkflowError::new(Stage::LoadProfile, e))?;

    let gateway = Gateway::connect(&profile, wallet.as_ref(), &config.user, config.gateway_options())
        .await
        .map_err(|e| WorkflowError::new(Stage::Connect, e))?;
    info!("AssetTransfer: gateway connected with identity {}", gateway.label());

    let probe = config.probe();
    run_with_gateway(gateway, config, probe.as_ref()).await
}

/// Provision `config.user` into `wallet` and log the labels it now holds.
///
/// Returns the labels. A failure to list them is logged and yields an empty
/// list; only provisioning itself can fail the run.
pub async fn populate_wallet(
    wallet: &dyn Wallet,
    config: &WorkflowConfig,
) -> Result<Vec<String>, WorkflowError> {
    let provisioned = provision(wallet, &config.user, &config.cred_path, &config.msp_id)
        .await
        .map_err(|e| WorkflowError::new(Stage::PopulateWallet, e))?;
    if provisioned == Provisioned::Stored {
        info!("AssetTransfer: wallet updated for user {}", config.user);
    }

    match wallet.list().await {
        Ok(mut labels) => {
            labels.sort();
            info!("AssetTransfer: wallet holds {labels:?}");
            Ok(labels)
        }
        Err(e) => {
            warn!("AssetTransfer: cannot list wallet labels: {e}");
            Ok(Vec::new())
        }
    }
}

/// Resolve the configured network and contract, run the steps, close.
pub async fn run_with_gateway(
    gateway: Gateway,
    config: &WorkflowConfig,
    probe: Option<&DiagnosticProbe>,
) -> Result<WorkflowReport, WorkflowError> {
    let result = match gateway.network(&config.channel) {
        Ok(network) => {
            info!("AssetTransfer: network declared as {}", network.name());
            let contract = network.contract(&config.contract);
            info!("AssetTransfer: contract declared as {}", contract.name());
            run_transactions(&contract, probe).await
        }
        Err(e) => Err(WorkflowError::new(Stage::ResolveNetwork, e)),
    };
    gateway.close();
    result
}

/// Run [`ASSET_TRANSFER_STEPS`] against `contract`.
pub async fn run_transactions(
    contract: &Contract,
    probe: Option<&DiagnosticProbe>,
) -> Result<WorkflowReport, WorkflowError> {
    run_steps(contract, ASSET_TRANSFER_STEPS, probe).await
}

/// Run `steps` in order, stopping at the first fatal failure.
pub async fn run_steps(
    contract: &Contract,
    steps: &[Step],
    probe: Option<&DiagnosticProbe>,
) -> Result<WorkflowReport, WorkflowError> {
    let mut report = WorkflowReport::default();

    for step in steps {
        info!("--> {} Transaction: {}, function {}", step.kind, step.transaction, step.description);
        if !step.args.is_empty() {
            info!("--> {} Transaction: {}, {}", step.kind, step.transaction, step.args.join(", "));
        }

        let called = match step.kind {
            CallKind::Submit => contract.submit_transaction(step.transaction, step.args).await,
            CallKind::Evaluate => contract.evaluate_transaction(step.transaction, step.args).await,
        };

        let status = match called {
            Ok(result) => {
                let output = present(result.payload());
                if let Some(diagnostic) = &output.diagnostic {
                    warn!("AssetTransfer: {diagnostic}");
                }
                if !output.text.is_empty() {
                    info!("{}", output.text);
                }
                StepStatus::Completed {
                    tx_id: result.tx_id().to_string(),
                    output,
                }
            }
            Err(error) => {
                let diagnostics = match (error.is_submit(), probe) {
                    (true, Some(probe)) => Some(run_probe(probe).await),
                    _ => None,
                };
                match step.policy {
                    FailurePolicy::Fatal => {
                        return Err(WorkflowError {
                            stage: Stage::Transaction(step.transaction),
                            kind: error.into(),
                            diagnostics,
                        })
                    }
                    FailurePolicy::Tolerated => {
                        warn!("AssetTransfer: {error}; continuing");
                        StepStatus::Tolerated { error, diagnostics }
                    }
                }
            }
        };

        report.steps.push(StepOutcome {
            transaction: step.transaction,
            kind: step.kind,
            status,
        });
    }

    Ok(report)
}

async fn run_probe(probe: &DiagnosticProbe) -> Result<DiagnosticReport, DiagnosticError> {
    let outcome = probe.inspect().await;
    match &outcome {
        Ok(report) => info!("diagnostics: {report}"),
        Err(e) => warn!("diagnostics: {e}"),
    }
    outcome
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
