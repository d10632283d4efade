//! `asset-transfer`: asset-transfer-basic sample client.
//!
//! Provisions `appUser` into a wallet from the test network's credential
//! directory, connects to the Org1 gateway and walks through the basic asset
//! contract: create the seed assets, list them, create `asset13`, read it
//! back, check that `asset1` exists, transfer `asset1` to Tom and read it.
//!
//! ```sh
//! # Against the local test network, from its sample directory:
//! asset-transfer
//!
//! # Skip the container listing that normally follows a failed submit:
//! asset-transfer --no-diagnostics
//!
//! # SQLite wallet, explicit profile:
//! ASSET_TRANSFER_PROFILE=./connection-org1.yaml asset-transfer --wallet-backend sqlite
//! ```
//!
//! Exit status is 0 on success, 2 when the local setup is wrong (wallet,
//! credentials, profile) and 1 for any other failure.

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use clap::{Parser, ValueEnum};
use ledger_gateway::workflow::{self, DEFAULT_CRED_PATH, DEFAULT_PROFILE_PATH};
use ledger_gateway::{WalletBackend, WorkflowConfig, WorkflowError};
use tracing::{error, info};

/// asset-transfer: run the basic asset walkthrough against a ledger gateway
#[derive(Parser)]
#[command(name = "asset-transfer", version, about, long_about = None)]
struct Cli {
    /// Wallet directory.
    #[arg(long, env = "ASSET_TRANSFER_WALLET", default_value = "wallet")]
    wallet: PathBuf,

    /// Wallet storage backend.
    #[arg(long, env = "ASSET_TRANSFER_WALLET_BACKEND", value_enum, default_value_t = Backend::Fs)]
    wallet_backend: Backend,

    /// Wallet label to provision and connect as.
    #[arg(long, env = "ASSET_TRANSFER_USER", default_value = "appUser")]
    user: String,

    /// MSP id recorded with the identity.
    #[arg(long, env = "ASSET_TRANSFER_MSP_ID", default_value = "Org1MSP")]
    msp_id: String,

    /// MSP directory holding `signcerts/cert.pem` and `keystore/`.
    #[arg(long, env = "ASSET_TRANSFER_CRED_PATH", default_value = DEFAULT_CRED_PATH)]
    cred_path: PathBuf,

    /// Connection profile (YAML or JSON).
    #[arg(long, env = "ASSET_TRANSFER_PROFILE", default_value = DEFAULT_PROFILE_PATH)]
    profile: PathBuf,

    #[arg(long, env = "ASSET_TRANSFER_CHANNEL", default_value = "mychannel")]
    channel: String,

    #[arg(long, env = "ASSET_TRANSFER_CONTRACT", default_value = "basic")]
    contract: String,

    /// Seconds allowed for the gateway handshake.
    #[arg(long, env = "ASSET_TRANSFER_TIMEOUT_SECS", default_value_t = 100)]
    timeout_secs: u64,

    /// Keep discovered peer host names instead of rewriting them to localhost.
    #[arg(long, env = "ASSET_TRANSFER_NO_DISCOVERY_AS_LOCALHOST")]
    no_discovery_as_localhost: bool,

    /// Do not list matching containers when a submit fails.
    #[arg(long, env = "ASSET_TRANSFER_NO_DIAGNOSTICS")]
    no_diagnostics: bool,

    /// Image substring the diagnostic listing matches on.
    #[arg(long, env = "ASSET_TRANSFER_DIAGNOSTIC_KEYWORD", default_value = "orderer")]
    diagnostic_keyword: String,

    /// Container CLI used for the diagnostic listing.
    #[arg(long, env = "ASSET_TRANSFER_DOCKER", default_value = "docker")]
    docker: String,

    /// Log wire-level detail.
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Backend {
    /// One JSON file per identity.
    Fs,
    /// Single SQLite database.
    Sqlite,
}

impl From<Backend> for WalletBackend {
    fn from(backend: Backend) -> Self {
        match backend {
            Backend::Fs => WalletBackend::FileSystem,
            Backend::Sqlite => WalletBackend::Sqlite,
        }
    }
}

impl From<Cli> for WorkflowConfig {
    fn from(cli: Cli) -> Self {
        WorkflowConfig {
            wallet_path: cli.wallet,
            wallet_backend: cli.wallet_backend.into(),
            user: cli.user,
            msp_id: cli.msp_id,
            cred_path: cli.cred_path,
            profile_path: cli.profile,
            channel: cli.channel,
            contract: cli.contract,
            connect_timeout: Duration::from_secs(cli.timeout_secs),
            discovery_as_localhost: !cli.no_discovery_as_localhost,
            diagnostics: !cli.no_diagnostics,
            diagnostic_keyword: cli.diagnostic_keyword,
            docker_program: cli.docker,
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "ledger_gateway=debug,asset_transfer=debug"
    } else {
        "ledger_gateway=info,asset_transfer=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();

    let config = WorkflowConfig::from(cli);
    info!(
        "AssetTransfer: discovery as localhost is {}",
        if config.discovery_as_localhost { "on" } else { "off" }
    );

    info!("============ asset-transfer starts ============");
    match workflow::run(&config).await {
        Ok(report) => {
            info!("============ asset-transfer ends ({} steps) ============", report.steps.len());
        }
        Err(e) => process::exit(report_failure(&e)),
    }
}

/// Log a fatal error and any diagnostics gathered with it.
fn report_failure(e: &WorkflowError) -> i32 {
    error!("Failed to {}: {}", e.stage, e.kind);
    match &e.diagnostics {
        Some(Ok(report)) => error!("diagnostics: {report}"),
        Some(Err(probe_error)) => error!("diagnostics unavailable: {probe_error}"),
        None => {}
    }
    e.exit_code()
}
