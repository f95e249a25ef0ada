//! S3 backend descriptor and the partial backend configuration file
//! (`backend.hcl`) passed to `terraform init -backend-config=...`.

use crate::core::error::{MigrationError, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fields that must be present and non-empty in a backend configuration.
pub const REQUIRED_FIELDS: [&str; 4] = ["bucket", "key", "region", "dynamodb_table"];

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_STATE_KEY: &str = "terraform.tfstate";

static ENTRY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(?:"((?:[^"\\]|\\.)*)"|([^\s#]+))"#)
        .expect("backend entry regex is valid")
});

/// Where state lives: object storage location, lock table and encryption settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendDescriptor {
    pub bucket: String,
    pub key: String,
    pub region: String,
    pub dynamodb_table: String,
    #[serde(default)]
    pub encrypt: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,
}

impl BackendDescriptor {
    pub fn new(bucket: &str, key: &str, region: &str, dynamodb_table: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            region: region.to_string(),
            dynamodb_table: dynamodb_table.to_string(),
            encrypt: true,
            kms_key_id: None,
        }
    }

    pub fn to_config(&self) -> BackendConfig {
        let mut entries = BTreeMap::new();
        entries.insert("bucket".to_string(), self.bucket.clone());
        entries.insert("key".to_string(), self.key.clone());
        entries.insert("region".to_string(), self.region.clone());
        entries.insert("dynamodb_table".to_string(), self.dynamodb_table.clone());
        entries.insert("encrypt".to_string(), self.encrypt.to_string());
        if let Some(kms) = &self.kms_key_id {
            entries.insert("kms_key_id".to_string(), kms.clone());
        }
        BackendConfig {
            entries,
            path: None,
        }
    }
}

/// Parsed key/value backend configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackendConfig {
    pub entries: BTreeMap<String, String>,
    pub path: Option<PathBuf>,
}

impl BackendConfig {
    pub fn parse(content: &str) -> Self {
        let mut entries = BTreeMap::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with("//") {
                continue;
            }
            match ENTRY_RE.captures(trimmed) {
                Some(caps) => {
                    let value = caps
                        .get(2)
                        .or_else(|| caps.get(3))
                        .map(|m| m.as_str().replace("\\\"", "\""))
                        .unwrap_or_default();
                    entries.insert(caps[1].to_string(), value);
                }
                None => debug!("Ignoring unrecognised backend config line: {}", trimmed),
            }
        }
        Self {
            entries,
            path: None,
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(MigrationError::ConfigFile {
                path: path.to_path_buf(),
                reason: "file does not exist".to_string(),
            });
        }
        let content = std::fs::read_to_string(path).map_err(|e| MigrationError::ConfigFile {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut config = Self::parse(&content);
        config.path = Some(path.to_path_buf());
        Ok(config)
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.entries.get(field).map(|s| s.as_str())
    }

    /// Every required field that is absent or blank, in declaration order.
    pub fn missing_fields(&self) -> Vec<String> {
        REQUIRED_FIELDS
            .iter()
            .filter(|field| self.get(field).map_or(true, |v| v.trim().is_empty()))
            .map(|field| field.to_string())
            .collect()
    }

    pub fn to_descriptor(&self) -> Result<BackendDescriptor> {
        validate_backend_config(self)?;
        let field = |name: &str| self.get(name).unwrap_or_default().to_string();
        Ok(BackendDescriptor {
            bucket: field("bucket"),
            key: field("key"),
            region: field("region"),
            dynamodb_table: field("dynamodb_table"),
            encrypt: self.get("encrypt").is_some_and(|v| v == "true"),
            kms_key_id: self.get("kms_key_id").map(|s| s.to_string()),
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (name, value) in &self.entries {
            if value == "true" || value == "false" {
                out.push_str(&format!("{} = {}\n", name, value));
            } else {
                out.push_str(&format!("{} = \"{}\"\n", name, value.replace('"', "\\\"")));
            }
        }
        out
    }
}

/// Structural check of a backend configuration. Reports every missing field at once.
pub fn validate_backend_config(config: &BackendConfig) -> Result<()> {
    let missing = config.missing_fields();
    if !missing.is_empty() {
        return Err(MigrationError::Config { missing });
    }
    if config.get("encrypt") != Some("true") {
        warn!("Backend configuration does not set encrypt = true; state will not be encrypted at rest");
    }
    Ok(())
}

/// Write a backend configuration file for the given descriptor.
pub fn create_config(
    descriptor: &BackendDescriptor,
    path: &Path,
    overwrite: bool,
) -> Result<PathBuf> {
    if path.exists() && !overwrite {
        return Err(MigrationError::Usage(format!(
            "{} already exists. Pass --overwrite to replace it",
            path.display()
        )));
    }
    let config = descriptor.to_config();
    validate_backend_config(&config)?;
    let content = format!(
        "# Generated by tfbackend on {}\n{}",
        chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        config.render()
    );
    std::fs::write(path, content).map_err(|e| {
        MigrationError::Write(format!("cannot write {}: {}", path.display(), e))
    })?;
    info!("Backend configuration written to {}", path.display());
    Ok(path.to_path_buf())
}
