//! Migration orchestrator.
//!
//! `Idle -> BackedUp -> Validated -> Migrating -> Verified | Failed`
//!
//! Every stage must succeed before the next one starts. The only mutation of
//! remote state happens in the `Migrating` transition, and only after a backup
//! has been written. A failed verification is surfaced, never rolled back
//! automatically: the operator decides whether to restore.

use crate::aws::cli::{LockTable, ObjectStore};
use crate::config::PlanExitContract;
use crate::core::backup::{BackupArtifact, BackupStore};
use crate::core::connectivity::check_connectivity;
use crate::core::error::{MigrationError, Result};
use crate::core::verify::{verify, VerificationResult};
use crate::terraform::backend::{BackendConfig, BackendDescriptor};
use crate::terraform::engine::{is_valid_workspace_name, InitOptions, StateEngine};
use crate::terraform::state::StateSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum MigrationState {
    Idle,
    BackedUp,
    Validated,
    Migrating,
    Verified,
    Failed,
}

impl fmt::Display for MigrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MigrationState::Idle => "idle",
            MigrationState::BackedUp => "backed-up",
            MigrationState::Validated => "validated",
            MigrationState::Migrating => "migrating",
            MigrationState::Verified => "verified",
            MigrationState::Failed => "failed",
        };
        write!(f, "{}", name)
    }
}

impl MigrationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MigrationState::Verified | MigrationState::Failed)
    }
}

/// Outcome of a completed migration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationReport {
    pub state: MigrationState,
    pub backup: BackupArtifact,
    pub target: Option<BackendDescriptor>,
    pub verification: VerificationResult,
}

pub struct Migrator<'a> {
    engine: &'a dyn StateEngine,
    backups: &'a BackupStore,
    remote: Option<(&'a dyn ObjectStore, &'a dyn LockTable)>,
    contract: PlanExitContract,
    state: MigrationState,
    backup: Option<BackupArtifact>,
    verification: Option<VerificationResult>,
}

impl<'a> Migrator<'a> {
    pub fn new(
        engine: &'a dyn StateEngine,
        backups: &'a BackupStore,
        contract: PlanExitContract,
    ) -> Self {
        Self {
            engine,
            backups,
            remote: None,
            contract,
            state: MigrationState::Idle,
            backup: None,
            verification: None,
        }
    }

    /// Check that the target bucket and lock table are reachable before migrating.
    pub fn with_connectivity_check(
        mut self,
        store: &'a dyn ObjectStore,
        locks: &'a dyn LockTable,
    ) -> Self {
        self.remote = Some((store, locks));
        self
    }

    pub fn state(&self) -> MigrationState {
        self.state
    }

    /// The safety copy taken in the first stage, if it got that far.
    pub fn backup(&self) -> Option<&BackupArtifact> {
        self.backup.as_ref()
    }

    pub fn verification(&self) -> Option<&VerificationResult> {
        self.verification.as_ref()
    }

    fn transition(&mut self, next: MigrationState) {
        info!("Migration state: {} -> {}", self.state, next);
        self.state = next;
    }

    fn ensure_idle(&self) -> Result<()> {
        if self.state != MigrationState::Idle {
            return Err(MigrationError::Usage(format!(
                "migration already ran (state: {})",
                self.state
            )));
        }
        Ok(())
    }

    /// Idle -> BackedUp. Returns the source snapshot for later verification.
    async fn take_backup(&mut self, label: &str) -> Result<Option<StateSnapshot>> {
        let artifact = self.backups.backup(self.engine, Some(label)).await?;
        let source = match std::fs::read(&artifact.path)
            .map_err(|e| e.to_string())
            .and_then(|bytes| StateSnapshot::from_bytes(&bytes).map_err(|e| e.to_string()))
        {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                warn!("Source state could not be parsed, lineage checks are skipped: {}", e);
                None
            }
        };
        self.backup = Some(artifact);
        self.transition(MigrationState::BackedUp);
        Ok(source)
    }

    /// Migrating -> Verified | Failed.
    async fn finish(&mut self, source: Option<&StateSnapshot>) -> Result<VerificationResult> {
        let result = verify(self.engine, &self.contract, source).await;
        self.verification = Some(result.clone());
        if result.consistent {
            self.transition(MigrationState::Verified);
            Ok(result)
        } else {
            self.transition(MigrationState::Failed);
            if let Some(backup) = &self.backup {
                error!(
                    "Migration left the new backend in an unverified state. Restore with: tfbackend restore --backup-file {}",
                    backup.path.display()
                );
            }
            result.into_result()
        }
    }

    /// Move state from the currently configured backend to the backend described
    /// by `backend_config`.
    pub async fn migrate(&mut self, backend_config: &Path) -> Result<MigrationReport> {
        self.ensure_idle()?;

        let source = self.take_backup("pre-migration").await?;

        // The file that is validated must be the file terraform is pointed at.
        let backend_config = &absolute_config_path(backend_config)?;
        let config = BackendConfig::load(backend_config)?;
        let descriptor = config.to_descriptor()?;
        if let Some((store, locks)) = self.remote {
            let report = check_connectivity(store, locks, &descriptor).await;
            if let Some(err) = report.to_error() {
                return Err(err);
            }
        }
        self.transition(MigrationState::Validated);

        self.transition(MigrationState::Migrating);
        if let Err(e) = self
            .engine
            .init(&InitOptions::migrate_to(backend_config))
            .await
        {
            self.transition(MigrationState::Failed);
            return Err(e);
        }

        let verification = self.finish(source.as_ref()).await?;
        Ok(MigrationReport {
            state: self.state,
            backup: self.backup.clone().ok_or_else(|| {
                MigrationError::Io("backup artifact missing after migration".to_string())
            })?,
            target: Some(descriptor),
            verification,
        })
    }

    /// Copy the state of one workspace into another within the same backend.
    pub async fn migrate_workspace(&mut self, source_ws: &str, target_ws: &str) -> Result<MigrationReport> {
        self.ensure_idle()?;
        if source_ws == target_ws {
            return Err(MigrationError::Usage(
                "source and target workspaces must differ".to_string(),
            ));
        }
        for name in [source_ws, target_ws] {
            if !is_valid_workspace_name(name) {
                return Err(MigrationError::Usage(format!(
                    "Invalid workspace name: '{}'",
                    name
                )));
            }
        }

        self.engine.workspace_select(source_ws).await?;
        let source = self
            .take_backup(&format!("workspace-{}", source_ws))
            .await?;
        let source_bytes = match &self.backup {
            Some(artifact) => std::fs::read(&artifact.path).map_err(|e| {
                MigrationError::Io(format!("cannot re-read backup: {}", e))
            })?,
            None => return Err(MigrationError::Io("no backup was taken".to_string())),
        };
        let source = source.ok_or_else(|| {
            MigrationError::Verification(format!(
                "state of workspace '{}' is not a valid state document",
                source_ws
            ))
        })?;

        match self.engine.workspace_select(target_ws).await {
            Ok(()) => {}
            Err(MigrationError::Usage(_)) => {
                info!("Creating workspace '{}'", target_ws);
                self.engine.workspace_new(target_ws).await?;
            }
            Err(e) => return Err(e),
        }

        let existing = self.engine.pull().await?;
        if !existing.iter().all(|b| b.is_ascii_whitespace()) {
            let target = StateSnapshot::from_bytes(&existing)?;
            if !target.resources.is_empty() && !target.shares_lineage_with(&source) {
                return Err(MigrationError::Verification(format!(
                    "workspace '{}' already holds state with lineage {} (source lineage {})",
                    target_ws, target.lineage, source.lineage
                )));
            }
        }
        self.transition(MigrationState::Validated);

        self.transition(MigrationState::Migrating);
        if let Err(e) = self.engine.push(&source_bytes, false).await {
            self.transition(MigrationState::Failed);
            return Err(e);
        }

        let verification = self.finish(Some(&source)).await?;
        Ok(MigrationReport {
            state: self.state,
            backup: self.backup.clone().ok_or_else(|| {
                MigrationError::Io("backup artifact missing after migration".to_string())
            })?,
            target: None,
            verification,
        })
    }
}

fn absolute_config_path(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|e| MigrationError::ConfigFile {
            path: path.to_path_buf(),
            reason: format!("cannot resolve relative path: {}", e),
        })
}
