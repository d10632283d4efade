//! End-to-end tests: the real client against an in-process gateway.
//!
//! Each test spawns a mock gateway (real TCP, real HTTP) via
//! [`ledger_gateway_conformance::spawn_gateway`], writes credentials and a
//! connection profile into a temp directory, and drives the asset-transfer
//! walkthrough through the public `workflow` API.
//!
//! # Coverage
//!
//! | Test | Scenario |
//! |------|----------|
//! | `fresh_wallet_walkthrough_succeeds` | provision, connect, full sequence |
//! | `rerun_reuses_identity_and_tolerates_existing_asset` | idempotent provisioning, tolerated `CreateAsset` with diagnostics |
//! | `sqlite_wallet_walkthrough_succeeds` | SQLite wallet backend |
//! | `unreachable_orderer_runs_probe_and_fails` | submit failure with diagnostics |
//! | `diagnostics_failure_is_reported_next_to_submit_error` | default diagnostics, docker listing unavailable |
//! | `discovered_peers_need_localhost_rewrite` | discovery-as-localhost off |
//! | `unknown_channel_is_rejected_before_any_call` | network resolution |
//! | `unknown_contract_fails_first_submit` | contract binding is lazy |
//! | `closed_gateway_port_fails_connect` | handshake failure |
//! | `requests_without_identity_are_rejected` | mock enforces identity headers |

use std::sync::Arc;

use async_trait::async_trait;
use ledger_gateway::{
    provision, workflow, ConnectionProfile, ContainerInfo, DiagnosticError, DiagnosticProbe,
    FileSystemWallet, Gateway, ProcessLister, Provisioned, Stage, StepStatus, WalletBackend,
    Wallet, WorkflowErrorKind,
};
use ledger_gateway_conformance::{seed_assets, spawn_gateway, write_fixture, Asset, NO_DOCKER};

/// A host with no containers running.
struct NothingRunning;

#[async_trait]
impl ProcessLister for NothingRunning {
    async fn list(&self) -> Result<Vec<ContainerInfo>, DiagnosticError> {
        Ok(vec![])
    }
}

fn tom_asset13() -> Asset {
    Asset {
        id: "asset13".into(),
        color: "yellow".into(),
        size: 5,
        owner: "Tom".into(),
        appraised_value: 1300,
    }
}

// ---------------------------------------------------------------------------
// Success paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fresh_wallet_walkthrough_succeeds() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), &gw);

    let report = workflow::run(&config).await.unwrap();
    assert_eq!(report.steps.len(), 7);

    // GetAllAssets returns the seeded assets.
    let all: Vec<Asset> = serde_json::from_str(&report.steps[1].output().unwrap().text).unwrap();
    assert_eq!(all, seed_assets());

    // ReadAsset asset13 returns what CreateAsset wrote.
    let read: Asset = serde_json::from_str(&report.steps[3].output().unwrap().text).unwrap();
    assert_eq!(read, tom_asset13());

    assert_eq!(report.steps[4].output().unwrap().text, "true");

    let asset1: Asset = serde_json::from_str(&report.steps[6].output().unwrap().text).unwrap();
    assert_eq!(asset1.owner, "Tom");
    assert_eq!(gw.ledger.asset("asset1").unwrap().owner, "Tom");

    // Every call was issued in order, as the provisioned identity.
    let calls = gw.ledger.calls();
    let seen: Vec<(&str, &str)> = calls
        .iter()
        .map(|c| (c.kind, c.transaction.as_str()))
        .collect();
    assert_eq!(
        seen,
        vec![
            ("submit", "InitLedger"),
            ("evaluate", "GetAllAssets"),
            ("submit", "CreateAsset"),
            ("evaluate", "ReadAsset"),
            ("evaluate", "AssetExists"),
            ("submit", "TransferAsset"),
            ("evaluate", "ReadAsset"),
        ]
    );
    assert!(calls.iter().all(|c| c.msp_id == "Org1MSP"));

    // The identity landed in the file wallet.
    assert!(config.wallet_path.join("appUser.id").is_file());
}

#[tokio::test]
async fn rerun_reuses_identity_and_tolerates_existing_asset() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), &gw);

    workflow::run(&config).await.unwrap();

    // Credentials are no longer needed once the wallet holds the identity.
    std::fs::remove_dir_all(&config.cred_path).unwrap();
    let wallet = FileSystemWallet::open(&config.wallet_path).unwrap();
    let again = provision(&wallet, "appUser", &config.cred_path, "Org1MSP")
        .await
        .unwrap();
    assert_eq!(again, Provisioned::AlreadyPresent);

    let report = workflow::run(&config).await.unwrap();
    match &report.steps[2].status {
        StepStatus::Tolerated { error, diagnostics } => {
            assert!(error.to_string().contains("already exists"));
            assert!(matches!(diagnostics, Some(Err(DiagnosticError::Enumeration(_)))));
        }
        other => panic!("CreateAsset should have been tolerated, got {other:?}"),
    }
    assert_eq!(wallet.list().await.unwrap(), vec!["appUser".to_string()]);
}

#[tokio::test]
async fn sqlite_wallet_walkthrough_succeeds() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path(), &gw);
    config.wallet_backend = WalletBackend::Sqlite;

    let report = workflow::run(&config).await.unwrap();
    assert_eq!(report.steps.len(), 7);
    assert!(config
        .wallet_path
        .join(workflow::SQLITE_WALLET_FILE)
        .is_file());
}

// ---------------------------------------------------------------------------
// Failure paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_orderer_runs_probe_and_fails() {
    let gw = spawn_gateway().await;
    gw.ledger.set_orderer_down(true);
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), &gw);

    let wallet = FileSystemWallet::open(&config.wallet_path).unwrap();
    provision(&wallet, &config.user, &config.cred_path, &config.msp_id)
        .await
        .unwrap();
    let profile = ConnectionProfile::from_file(&config.profile_path).await.unwrap();
    let gateway = Gateway::connect(&profile, &wallet, &config.user, config.gateway_options())
        .await
        .unwrap();
    let probe = DiagnosticProbe::new(Arc::new(NothingRunning), "orderer");

    let err = workflow::run_with_gateway(gateway, &config, Some(&probe))
        .await
        .unwrap_err();

    assert_eq!(err.stage, Stage::Transaction("InitLedger"));
    assert!(matches!(err.kind, WorkflowErrorKind::Transaction(ref e) if e.is_submit()));
    assert!(err.to_string().contains("no orderer reachable"));
    match &err.diagnostics {
        Some(Ok(report)) => assert!(report.matches.is_empty()),
        other => panic!("expected an empty diagnostic report, got {other:?}"),
    }
    assert_ne!(err.exit_code(), 0);

    // Nothing after the failed submit was issued.
    assert_eq!(gw.ledger.calls().len(), 1);
}

#[tokio::test]
async fn diagnostics_failure_is_reported_next_to_submit_error() {
    let gw = spawn_gateway().await;
    gw.ledger.set_orderer_down(true);
    let dir = tempfile::tempdir().unwrap();
    let config = write_fixture(dir.path(), &gw);
    assert!(config.diagnostics);
    assert_eq!(config.docker_program, NO_DOCKER);

    let err = workflow::run(&config).await.unwrap_err();

    assert_eq!(err.stage, Stage::Transaction("InitLedger"));
    assert!(matches!(err.diagnostics, Some(Err(DiagnosticError::Enumeration(_)))));
    assert_eq!(err.exit_code(), 1);
}

#[tokio::test]
async fn discovered_peers_need_localhost_rewrite() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path(), &gw);
    config.discovery_as_localhost = false;

    let err = workflow::run(&config).await.unwrap_err();

    // The submit goes to the gateway itself; the evaluate goes to the
    // advertised `.invalid` peer host, which cannot resolve.
    assert_eq!(err.stage, Stage::Transaction("GetAllAssets"));
    assert!(err.diagnostics.is_none());
    let calls = gw.ledger.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].transaction, "InitLedger");
}

#[tokio::test]
async fn unknown_channel_is_rejected_before_any_call() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path(), &gw);
    config.channel = "otherchannel".into();

    let err = workflow::run(&config).await.unwrap_err();

    assert_eq!(err.stage, Stage::ResolveNetwork);
    assert_eq!(err.exit_code(), 1);
    assert!(gw.ledger.calls().is_empty());
}

#[tokio::test]
async fn unknown_contract_fails_first_submit() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path(), &gw);
    config.contract = "private".into();

    let err = workflow::run(&config).await.unwrap_err();

    assert_eq!(err.stage, Stage::Transaction("InitLedger"));
    assert!(err.to_string().contains("chaincode private not found"));
}

#[tokio::test]
async fn closed_gateway_port_fails_connect() {
    let gw = spawn_gateway().await;
    let dir = tempfile::tempdir().unwrap();
    let mut config = write_fixture(dir.path(), &gw);

    let closed_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let profile = dir.path().join("closed.yaml");
    std::fs::write(
        &profile,
        format!("peers:\n  peer0.org1.example.com:\n    url: grpc://127.0.0.1:{closed_port}\n"),
    )
    .unwrap();
    config.profile_path = profile;

    let err = workflow::run(&config).await.unwrap_err();

    assert_eq!(err.stage, Stage::Connect);
    assert_eq!(err.exit_code(), 1);
    // Provisioning happened before the connect attempt.
    assert!(config.wallet_path.join("appUser.id").is_file());
}

#[tokio::test]
async fn requests_without_identity_are_rejected() {
    let gw = spawn_gateway().await;

    let resp = reqwest::get(format!("{}/v1/discovery", gw.url)).await.unwrap();
    assert_eq!(resp.status().as_u16(), 401);

    let body: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(body["code"], "unauthorized");
}
