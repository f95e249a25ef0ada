use crate::aws::cli::AwsCli;
use crate::config::{self, Config};
use crate::core::backup::BackupStore;
use crate::shared::audit::{AuditLog, AuditLogEntry};
use crate::shared::logging;
use crate::terraform::engine::TerraformCli;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum TfBackendError {
    #[error("Terraform binary not found: {0}")]
    TerraformNotFound(String),

    #[error("AWS CLI not found: {0}")]
    AwsCliNotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Clients for one invocation of the tool, built once and handed to each stage.
pub struct TfBackend {
    pub config: Config,
    working_dir: PathBuf,
    engine: TerraformCli,
    backups: BackupStore,
    audit: AuditLog,
}

impl TfBackend {
    pub fn new(config_path: Option<&Path>, working_dir: Option<&Path>) -> anyhow::Result<Self> {
        let config = config::load(config_path)?;

        // Priority for the working directory:
        // 1. Command line argument
        // 2. TERRAFORM_DIR / config file
        // 3. Current directory
        let current_dir = std::env::current_dir()?;
        let working_dir = match working_dir {
            Some(dir) => resolve_path(&current_dir, dir),
            None => match &config.terraform.working_directory {
                Some(dir) => resolve_path(&current_dir, Path::new(dir)),
                None => current_dir.clone(),
            },
        };
        logging::info(&format!(
            "Using Terraform working directory: {}",
            working_dir.display()
        ));
        if !working_dir.is_dir() {
            anyhow::bail!(
                "Working directory does not exist: {}",
                working_dir.display()
            );
        }

        let terraform_path = config::resolve_executable(
            config.terraform.executable_path.as_deref(),
            "terraform",
        )
        .map_err(|e| TfBackendError::TerraformNotFound(e.to_string()))?;
        logging::info(&format!(
            "Using Terraform binary: {}",
            terraform_path.display()
        ));

        let backups = BackupStore::new(resolve_path(&working_dir, &config.backup.directory));
        let audit = AuditLog::new(&config.audit);
        let engine = TerraformCli::new(terraform_path, working_dir.clone());

        Ok(Self {
            config,
            working_dir,
            engine,
            backups,
            audit,
        })
    }

    pub fn engine(&self) -> &TerraformCli {
        &self.engine
    }

    pub fn backups(&self) -> &BackupStore {
        &self.backups
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// A user-supplied path as terraform will see it: relative paths are taken
    /// from the working directory.
    pub fn resolve(&self, path: &Path) -> PathBuf {
        resolve_path(&self.working_dir, path)
    }

    /// AWS collaborators for the given region, or the configured default.
    pub fn aws(&self, region: Option<&str>) -> anyhow::Result<AwsCli> {
        let aws_path = config::resolve_executable(self.config.aws.executable_path.as_deref(), "aws")
            .map_err(|e| TfBackendError::AwsCliNotFound(e.to_string()))?;
        Ok(AwsCli::new(
            aws_path,
            region.unwrap_or(&self.config.aws.region),
        ))
    }

    /// Record a mutating operation. Audit failures are logged, never fatal.
    pub fn audit(&self, operation: &str, target: Option<String>, error: Option<String>) {
        let entry: AuditLogEntry = AuditLog::entry(
            operation,
            &self.working_dir.to_string_lossy(),
            target,
            error.is_none(),
            error,
        );
        if let Err(e) = self.audit.record(&entry) {
            logging::warn(&format!("Failed to write audit log: {}", e));
        }
    }
}

pub fn resolve_path(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}
