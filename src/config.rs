//! Tool configuration: an optional JSON file plus environment overrides.

use crate::terraform::backend::DEFAULT_REGION;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub terraform: TerraformConfig,
    pub aws: AwsConfig,
    pub backup: BackupConfig,
    pub verification: PlanExitContract,
    pub audit: AuditConfig,
    pub hcp: HcpConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TerraformConfig {
    pub executable_path: Option<String>,
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub executable_path: Option<String>,
    pub region: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            executable_path: None,
            region: DEFAULT_REGION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    pub directory: PathBuf,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("backups"),
        }
    }
}

/// How the planning step's exit code is read during verification.
///
/// With `-detailed-exitcode`, terraform exits 0 for an empty diff, 2 for a
/// non-empty diff and 1 for errors. Without the flag, 0 covers both of the
/// first two cases, so the flag is part of the contract.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PlanExitContract {
    pub detailed_exitcode_flag: Option<String>,
    pub no_changes: i32,
    pub changes_present: Option<i32>,
    /// Whether a non-empty diff after migration still counts as a consistent state.
    pub changes_are_consistent: bool,
}

impl Default for PlanExitContract {
    fn default() -> Self {
        Self {
            detailed_exitcode_flag: Some("-detailed-exitcode".to_string()),
            no_changes: 0,
            changes_present: Some(2),
            changes_are_consistent: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HcpConfig {
    pub base_url: String,
    pub organization: Option<String>,
    /// Never read from or written to the config file; populated from `TFE_TOKEN`.
    #[serde(skip)]
    pub token: Option<String>,
}

impl Default for HcpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://app.terraform.io/api/v2".to_string(),
            organization: None,
            token: None,
        }
    }
}

/// Default config file location, `~/.tfbackend/config.json`.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tfbackend").join("config.json"))
}

pub fn init_from_path(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: Config = serde_json::from_str(&content)
        .with_context(|| format!("Invalid config file {}", path.display()))?;
    info!("Loaded configuration from {}", path.display());
    Ok(apply_env_overrides(config))
}

pub fn init_default() -> anyhow::Result<Config> {
    match default_config_path() {
        Some(path) if path.exists() => init_from_path(&path),
        _ => Ok(apply_env_overrides(Config::default())),
    }
}

/// Load the explicit config file when given, otherwise the default location.
pub fn load(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => init_from_path(path),
        None => init_default(),
    }
}

fn apply_env_overrides(mut config: Config) -> Config {
    if let Ok(name) = env::var("TERRAFORM_BINARY_NAME") {
        config.terraform.executable_path.get_or_insert(name);
    }
    if let Ok(dir) = env::var("TERRAFORM_DIR") {
        config.terraform.working_directory = Some(dir);
    }
    if let Ok(dir) = env::var("TFBACKEND_BACKUP_DIR") {
        config.backup.directory = PathBuf::from(dir);
    }
    if let Ok(val) = env::var("TFBACKEND_AUDIT_ENABLED") {
        config.audit.enabled = val.to_lowercase() == "true";
    }
    if let Ok(token) = env::var("TFE_TOKEN") {
        config.hcp.token = Some(token);
    }
    config
}

/// Resolve an executable given either as a path or as a bare name looked up on PATH.
pub fn resolve_executable(configured: Option<&str>, default_name: &str) -> anyhow::Result<PathBuf> {
    let name = configured.unwrap_or(default_name);
    let candidate = PathBuf::from(name);
    if candidate.components().count() > 1 {
        let absolute = if candidate.is_absolute() {
            candidate
        } else {
            env::current_dir()?.join(candidate)
        };
        if !absolute.exists() {
            anyhow::bail!("Executable not found at: {}", absolute.display());
        }
        return Ok(absolute);
    }
    which::which(name).with_context(|| format!("'{}' not found in PATH", name))
}
