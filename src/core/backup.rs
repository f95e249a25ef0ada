//! Local, timestamp-named copies of remote state taken before any destructive
//! operation, and the explicit restore path that pushes one back.

use crate::core::error::{MigrationError, Result};
use crate::terraform::engine::StateEngine;
use crate::terraform::state::StateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const BACKUP_PREFIX: &str = "terraform-state-backup";

/// An immutable copy of a state snapshot on local disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub size: u64,
    pub serial: Option<u64>,
    pub lineage: Option<String>,
}

/// Directory holding backup artifacts for one invocation of the tool.
pub struct BackupStore {
    directory: PathBuf,
}

impl BackupStore {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Pull the current state from the active backend and write it verbatim to disk.
    pub async fn backup(
        &self,
        engine: &dyn StateEngine,
        label: Option<&str>,
    ) -> Result<BackupArtifact> {
        let state = engine.pull().await?;
        if state.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(MigrationError::Io(
                "the active backend returned no state to back up".to_string(),
            ));
        }

        let (serial, lineage) = match StateSnapshot::from_bytes(&state) {
            Ok(snapshot) => (Some(snapshot.serial), Some(snapshot.lineage)),
            Err(e) => {
                warn!("Backing up state that does not parse as a state document: {}", e);
                (None, None)
            }
        };

        fs::create_dir_all(&self.directory).map_err(|e| {
            MigrationError::Write(format!(
                "cannot create backup directory {}: {}",
                self.directory.display(),
                e
            ))
        })?;

        let created_at = Utc::now();
        let path = self.write_new(&state, &created_at, label)?;
        info!(
            "State backed up to {} ({} bytes, serial {:?})",
            path.display(),
            state.len(),
            serial
        );

        Ok(BackupArtifact {
            path,
            created_at,
            size: state.len() as u64,
            serial,
            lineage,
        })
    }

    /// Overwrite the active backend's state with a previously taken backup.
    pub async fn restore(&self, engine: &dyn StateEngine, artifact: &Path) -> Result<()> {
        if !artifact.exists() {
            return Err(MigrationError::NotFound(artifact.to_path_buf()));
        }
        let state = fs::read(artifact).map_err(|e| {
            MigrationError::Io(format!("cannot read backup {}: {}", artifact.display(), e))
        })?;
        let snapshot = StateSnapshot::from_bytes(&state)?;
        info!(
            "Restoring {} (serial {}, lineage {})",
            artifact.display(),
            snapshot.serial,
            snapshot.lineage
        );

        // A backup is usually older than the remote state, so the serial check must be bypassed.
        match engine.push(&state, true).await {
            Ok(()) => Ok(()),
            Err(MigrationError::LockConflict { lock_id, holder }) => Err(MigrationError::Write(
                format!(
                    "push rejected: state is locked by {} (lock ID: {})",
                    holder, lock_id
                ),
            )),
            Err(e) => Err(e),
        }
    }

    /// Backups in this directory, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        if !self.directory.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.directory).map_err(|e| {
            MigrationError::Io(format!(
                "cannot list {}: {}",
                self.directory.display(),
                e
            ))
        })?;
        let mut backups: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with(BACKUP_PREFIX) && n.ends_with(".tfstate"))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    fn write_new(
        &self,
        state: &[u8],
        created_at: &DateTime<Utc>,
        label: Option<&str>,
    ) -> Result<PathBuf> {
        let stem = backup_file_stem(created_at, label);
        for attempt in 0..100 {
            let name = if attempt == 0 {
                format!("{}.tfstate", stem)
            } else {
                format!("{}-{}.tfstate", stem, attempt)
            };
            let path = self.directory.join(name);
            let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => file,
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(MigrationError::Write(format!(
                        "cannot create {}: {}",
                        path.display(),
                        e
                    )))
                }
            };
            file.write_all(state)
                .and_then(|_| file.sync_all())
                .map_err(|e| {
                    MigrationError::Write(format!("cannot write {}: {}", path.display(), e))
                })?;

            let mut permissions = file
                .metadata()
                .map_err(|e| MigrationError::Write(e.to_string()))?
                .permissions();
            permissions.set_readonly(true);
            if let Err(e) = fs::set_permissions(&path, permissions) {
                warn!("Could not mark {} read-only: {}", path.display(), e);
            }
            return Ok(path);
        }
        Err(MigrationError::Write(format!(
            "could not allocate a unique backup name in {}",
            self.directory.display()
        )))
    }
}

fn backup_file_stem(created_at: &DateTime<Utc>, label: Option<&str>) -> String {
    let timestamp = created_at.format("%Y%m%d-%H%M%S%.3f").to_string().replace('.', "");
    match label.map(sanitize_label).filter(|l| !l.is_empty()) {
        Some(label) => format!("{}-{}-{}", BACKUP_PREFIX, timestamp, label),
        None => format!("{}-{}", BACKUP_PREFIX, timestamp),
    }
}

fn sanitize_label(label: &str) -> String {
    label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '-'
            }
        })
        .collect()
}
