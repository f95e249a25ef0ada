use crate::terraform::state::StateError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single stage of the backend workflow.
#[derive(Error, Debug)]
pub enum MigrationError {
    #[error("Backend configuration is missing required fields: {}", missing.join(", "))]
    Config { missing: Vec<String> },

    #[error("Cannot use backend configuration {}: {reason}", path.display())]
    ConfigFile { path: PathBuf, reason: String },

    #[error("{resource} is unreachable: {reason}")]
    Connectivity { resource: String, reason: String },

    #[error("State is locked by another operation (lock ID: {lock_id}, held by: {holder}). Wait for it to finish or run force-unlock")]
    LockConflict { lock_id: String, holder: String },

    #[error("Post-migration verification failed: {0}")]
    Verification(String),

    #[error("Failed to read state: {0}")]
    Io(String),

    #[error("Failed to write state: {0}")]
    Write(String),

    #[error("Backup file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("{0}")]
    Usage(String),

    #[error("Terraform command failed: {0}")]
    Engine(String),

    #[error(transparent)]
    State(#[from] StateError),
}

impl MigrationError {
    /// Name of the stage this error belongs to, used in operator-facing messages.
    pub fn stage(&self) -> &'static str {
        match self {
            MigrationError::Config { .. } | MigrationError::ConfigFile { .. } => "validation",
            MigrationError::Connectivity { .. } => "connectivity",
            MigrationError::LockConflict { .. } => "locking",
            MigrationError::Verification(_) => "verification",
            MigrationError::Io(_) | MigrationError::Write(_) | MigrationError::NotFound(_) => {
                "backup/restore"
            }
            MigrationError::Usage(_) => "arguments",
            MigrationError::Engine(_) => "terraform",
            MigrationError::State(_) => "state parsing",
        }
    }

    /// Whether the operator can simply retry after fixing input or infrastructure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MigrationError::Connectivity { .. } | MigrationError::LockConflict { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, MigrationError>;
