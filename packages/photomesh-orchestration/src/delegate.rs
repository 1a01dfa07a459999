//! External reconstruction delegate
//!
//! When a delegate executable is located, the run hands the photo list to it
//! instead of simulating the stages:
//!
//! ```text
//! <program> --input <p1,p2,…> --output <dir> --project <file>
//! ```
//!
//! stdout lines are streamed to the log sink as info, stderr lines as
//! warnings. Exit code 0 is success; anything else, a spawn error or the
//! timeout is a [`DelegateError`], which the orchestrator recovers from by
//! falling back to synthetic processing.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::DelegateSettings;
use crate::error::OrchestratorError;
use crate::log::LogSink;

#[derive(Debug, Error)]
pub enum DelegateError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("exited with status {}", code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()))]
    ExitStatus { code: Option<i32> },

    #[error("no result within {0:?}, aborted")]
    Timeout(Duration),

    #[error("job submission failed: {0}")]
    Submit(String),

    #[error("cluster job {job} failed: {reason}")]
    JobFailed { job: String, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<DelegateError> for OrchestratorError {
    fn from(e: DelegateError) -> Self {
        OrchestratorError::DelegateFailure(e.to_string())
    }
}

/// Everything the delegate is handed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateRequest {
    pub photos: Vec<PathBuf>,
    pub output_dir: PathBuf,
    pub project_file: PathBuf,
}

impl DelegateRequest {
    pub fn args(&self) -> Vec<String> {
        let inputs = self
            .photos
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(",");
        vec![
            "--input".to_string(),
            inputs,
            "--output".to_string(),
            self.output_dir.display().to_string(),
            "--project".to_string(),
            self.project_file.display().to_string(),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelegateOutcome {
    pub output_dir: PathBuf,
    pub duration: Duration,
}

#[async_trait]
pub trait Delegate: Send + Sync {
    fn name(&self) -> String;

    async fn run(
        &self,
        request: &DelegateRequest,
        log: &dyn LogSink,
    ) -> std::result::Result<DelegateOutcome, DelegateError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// Locator
// ═══════════════════════════════════════════════════════════════════════════

/// First existing regular file among the configured candidates wins
#[derive(Debug, Clone)]
pub struct DelegateLocator {
    candidates: Vec<PathBuf>,
}

impl DelegateLocator {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    pub async fn locate(&self) -> Option<PathBuf> {
        for candidate in &self.candidates {
            match tokio::fs::metadata(candidate).await {
                Ok(meta) if meta.is_file() => return Some(candidate.clone()),
                Ok(_) => debug!("Delegate candidate {} is not a file", candidate.display()),
                Err(_) => debug!("Delegate candidate {} not found", candidate.display()),
            }
        }
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// External process
// ═══════════════════════════════════════════════════════════════════════════

pub struct ExternalDelegate {
    program: PathBuf,
    timeout: Duration,
}

impl ExternalDelegate {
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Locate the executable per `settings`; `None` when disabled or absent
    pub async fn from_settings(settings: &DelegateSettings) -> Option<Self> {
        if !settings.enabled {
            info!("Delegate disabled by configuration");
            return None;
        }
        let program = DelegateLocator::new(settings.candidates.clone()).locate().await?;
        info!("Located delegate executable {}", program.display());
        Some(Self::new(program, settings.timeout()))
    }

    pub fn program(&self) -> &Path {
        &self.program
    }
}

#[async_trait]
impl Delegate for ExternalDelegate {
    fn name(&self) -> String {
        self.program
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.display().to_string())
    }

    async fn run(
        &self,
        request: &DelegateRequest,
        log: &dyn LogSink,
    ) -> std::result::Result<DelegateOutcome, DelegateError> {
        let started = tokio::time::Instant::now();

        let mut child = Command::new(&self.program)
            .args(request.args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| DelegateError::Spawn {
                program: self.program.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take().ok_or_else(|| {
            DelegateError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stdout not captured",
            ))
        })?;
        let stderr = child.stderr.take().ok_or_else(|| {
            DelegateError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "stderr not captured",
            ))
        })?;

        let streamed = async {
            let mut out = BufReader::new(stdout).lines();
            let mut err = BufReader::new(stderr).lines();
            let (mut out_done, mut err_done) = (false, false);

            loop {
                tokio::select! {
                    line = out.next_line(), if !out_done => match line {
                        Ok(Some(line)) => log.info(&line),
                        _ => out_done = true,
                    },
                    line = err.next_line(), if !err_done => match line {
                        Ok(Some(line)) => log.warning(&line),
                        _ => err_done = true,
                    },
                    else => break,
                }
            }
            child.wait().await
        };

        let waited = tokio::time::timeout(self.timeout, streamed).await;
        let status = match waited {
            Ok(status) => status?,
            Err(_) => {
                warn!("Delegate {} timed out, killing", self.name());
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill delegate: {}", e);
                }
                return Err(DelegateError::Timeout(self.timeout));
            }
        };

        if !status.success() {
            return Err(DelegateError::ExitStatus {
                code: status.code(),
            });
        }

        Ok(DelegateOutcome {
            output_dir: request.output_dir.clone(),
            duration: started.elapsed(),
        })
    }
}
