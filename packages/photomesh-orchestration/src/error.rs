use photomesh_artifacts::ArtifactError;
use photomesh_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Storage unreachable: {0}")]
    StorageUnreachable(String),

    #[error("No photos found in {0}")]
    NoPhotosFound(String),

    #[error("Session directory already exists: {0}")]
    SessionCollision(String),

    #[error("Delegate failure: {0}")]
    DelegateFailure(String),

    #[error("Failed to write artifact {path}: {reason}")]
    ArtifactWrite { path: String, reason: String },

    #[error("Invalid state transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Storage error: {0}")]
    Storage(#[source] StorageError),

    #[error("Artifact synthesis error: {0}")]
    Artifact(#[from] ArtifactError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Timeout: {0}")]
    Timeout(String),
}

impl OrchestratorError {
    pub fn serialization<E: std::fmt::Display>(e: E) -> Self {
        Self::Serialization(e.to_string())
    }

    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Config(e.to_string())
    }

    pub fn artifact_write<E: std::fmt::Display>(path: &std::path::Path, e: E) -> Self {
        Self::ArtifactWrite {
            path: path.display().to_string(),
            reason: e.to_string(),
        }
    }

    /// Only delegate failures are recovered (by falling back to synthesis)
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DelegateFailure(_))
    }
}

impl From<StorageError> for OrchestratorError {
    fn from(e: StorageError) -> Self {
        if e.is_unreachable() {
            Self::StorageUnreachable(e.message)
        } else {
            Self::Storage(e)
        }
    }
}

impl From<ConfigError> for OrchestratorError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e)
    }
}
