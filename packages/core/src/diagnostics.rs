//! Failure triage for submits: which backing containers are running?
//!
//! When a submit fails the most common cause in a local deployment is a
//! missing or misconfigured ordering service. [`DiagnosticProbe`] lists the
//! running containers through a [`ProcessLister`] and reports every one whose
//! image contains a keyword (`orderer` by default): name, image, id,
//! networks and port mappings.
//!
//! The probe only reads. If listing fails, that failure is reported next to
//! the submit error that triggered the probe; it never replaces it.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

/// Image keyword matched when none is configured.
pub const DEFAULT_KEYWORD: &str = "orderer";

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DiagnosticError {
    /// The process listing could not be obtained.
    #[error("cannot enumerate processes: {0}")]
    Enumeration(String),

    /// The listing was obtained but a line could not be decoded.
    #[error("cannot parse process listing line {line:?}: {reason}")]
    Parse { line: String, reason: String },
}

/// One running container, as reported by `docker ps`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    #[serde(rename = "Names")]
    pub name: String,
    #[serde(rename = "Image")]
    pub image: String,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Networks", default)]
    pub networks: String,
    #[serde(rename = "Ports", default)]
    pub ports: String,
}

/// Read-only source of running backing processes.
#[async_trait]
pub trait ProcessLister: Send + Sync + 'static {
    async fn list(&self) -> Result<Vec<ContainerInfo>, DiagnosticError>;
}

// ---------------------------------------------------------------------------
// DockerCli
// ---------------------------------------------------------------------------

/// [`ProcessLister`] backed by the `docker` command-line client.
///
/// Runs `docker ps --no-trunc --format '{{json .}}'`, which prints one JSON
/// object per running container.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl DockerCli {
    pub fn new() -> Self {
        Self::with_program("docker")
    }

    /// Use a different binary (e.g. `podman`, or an absolute path).
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLister for DockerCli {
    async fn list(&self) -> Result<Vec<ContainerInfo>, DiagnosticError> {
        debug!("diagnostics: running {} ps", self.program);
        let output = Command::new(&self.program)
            .args(["ps", "--no-trunc", "--format", "{{json .}}"])
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| DiagnosticError::Enumeration(format!("cannot run {}: {e}", self.program)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(DiagnosticError::Enumeration(format!(
                "{} ps exited with {}: {}",
                self.program,
                output.status,
                stderr.trim()
            )));
        }

        parse_listing(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Decode `docker ps --format '{{json .}}'` output. Blank lines are skipped.
pub fn parse_listing(text: &str) -> Result<Vec<ContainerInfo>, DiagnosticError> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line).map_err(|e| DiagnosticError::Parse {
                line: line.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// DiagnosticProbe
// ---------------------------------------------------------------------------

/// Lists running processes and keeps those whose image contains a keyword.
#[derive(Clone)]
pub struct DiagnosticProbe {
    lister: Arc<dyn ProcessLister>,
    keyword: String,
}

impl DiagnosticProbe {
    pub fn new(lister: Arc<dyn ProcessLister>, keyword: impl Into<String>) -> Self {
        Self {
            lister,
            keyword: keyword.into(),
        }
    }

    pub fn keyword(&self) -> &str {
        &self.keyword
    }

    /// Enumerate processes and report the matching ones.
    pub async fn inspect(&self) -> Result<DiagnosticReport, DiagnosticError> {
        let all = self.lister.list().await?;
        let total = all.len();
        let matches: Vec<ContainerInfo> = all
            .into_iter()
            .filter(|c| c.image.contains(&self.keyword))
            .collect();

        info!(
            "diagnostics: {} of {total} running process(es) match {:?}",
            matches.len(),
            self.keyword
        );
        Ok(DiagnosticReport {
            keyword: self.keyword.clone(),
            matches,
        })
    }
}

impl fmt::Debug for DiagnosticProbe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiagnosticProbe")
            .field("keyword", &self.keyword)
            .finish_non_exhaustive()
    }
}

/// Result of one probe run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticReport {
    pub keyword: String,
    pub matches: Vec<ContainerInfo>,
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.matches.is_empty() {
            return write!(f, "no running process matches {:?}", self.keyword);
        }
        write!(
            f,
            "{} running process(es) match {:?}",
            self.matches.len(),
            self.keyword
        )?;
        for c in &self.matches {
            write!(
                f,
                "\n  name:     {}\n  image:    {}\n  id:       {}\n  networks: {}\n  ports:    {}",
                c.name, c.image, c.id, c.networks, c.ports
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
