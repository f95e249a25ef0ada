use crate::config::AuditConfig;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;

/// Audit log entry for a state-mutating operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub user: String,
    pub operation: String,
    pub directory: String,
    pub target: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

/// Append-only JSON-lines trail of migrate, restore and force-unlock runs
pub struct AuditLog {
    path: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(config: &AuditConfig) -> Self {
        let path = if config.enabled {
            config
                .log_file
                .clone()
                .or_else(|| dirs::home_dir().map(|d| d.join(".tfbackend").join("audit.log")))
        } else {
            None
        };
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }

    pub fn entry(
        operation: &str,
        directory: &str,
        target: Option<String>,
        success: bool,
        error: Option<String>,
    ) -> AuditLogEntry {
        AuditLogEntry {
            timestamp: Utc::now(),
            user: env::var("USER")
                .or_else(|_| env::var("USERNAME"))
                .unwrap_or_else(|_| "unknown".to_string()),
            operation: operation.to_string(),
            directory: directory.to_string(),
            target,
            success,
            error,
        }
    }

    pub fn record(&self, entry: &AuditLogEntry) -> Result<()> {
        let Some(log_file) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = log_file.parent() {
            fs::create_dir_all(parent)?;
        }
        let line = serde_json::to_string(entry)?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_file)?;
        file.write_all(format!("{}\n", line).as_bytes())?;
        Ok(())
    }
}
