//! The state engine seam: every interaction with the `terraform` binary goes
//! through [`StateEngine`] so that the workflow can be driven by a fake in tests.

use crate::core::error::{MigrationError, Result};
use crate::terraform::lock::LockRecord;
use async_trait::async_trait;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, info};

/// Options for `terraform init`.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub backend_config: Option<PathBuf>,
    /// Copy existing state into the newly configured backend.
    pub migrate_state: bool,
    /// Answer "yes" to the copy prompt.
    pub force_copy: bool,
    pub reconfigure: bool,
}

impl InitOptions {
    pub fn migrate_to(backend_config: &Path) -> Self {
        Self {
            backend_config: Some(backend_config.to_path_buf()),
            migrate_state: true,
            force_copy: true,
            reconfigure: false,
        }
    }

    fn args(&self) -> Vec<String> {
        let mut args = vec!["init".to_string(), "-input=false".to_string()];
        if let Some(path) = &self.backend_config {
            args.push(format!("-backend-config={}", path.display()));
        }
        if self.migrate_state {
            args.push("-migrate-state".to_string());
        }
        if self.force_copy {
            args.push("-force-copy".to_string());
        }
        if self.reconfigure {
            args.push("-reconfigure".to_string());
        }
        args
    }
}

/// Raw result of a speculative plan. A non-zero exit code is not an error here;
/// interpreting it is the verifier's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

#[async_trait]
pub trait StateEngine: Send + Sync {
    async fn init(&self, options: &InitOptions) -> Result<String>;
    async fn plan(&self, extra_flag: Option<&str>) -> Result<PlanOutput>;
    async fn pull(&self) -> Result<Vec<u8>>;
    async fn push(&self, state: &[u8], force: bool) -> Result<()>;
    async fn force_unlock(&self, lock_id: &str) -> Result<()>;
    async fn state_list(&self) -> Result<Vec<String>>;
    async fn workspace_select(&self, name: &str) -> Result<()>;
    async fn workspace_new(&self, name: &str) -> Result<()>;
}

/// [`StateEngine`] backed by the `terraform` binary.
pub struct TerraformCli {
    terraform_path: PathBuf,
    working_dir: PathBuf,
}

impl TerraformCli {
    pub fn new(terraform_path: PathBuf, working_dir: PathBuf) -> Self {
        debug!(
            "TerraformCli initialized with terraform path: {} and working directory: {}",
            terraform_path.display(),
            working_dir.display()
        );
        Self {
            terraform_path,
            working_dir,
        }
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    fn run(&self, args: &[String]) -> Result<Output> {
        debug!("Running terraform {}", args.join(" "));
        Command::new(&self.terraform_path)
            .args(args)
            .env("TF_IN_AUTOMATION", "1")
            .current_dir(&self.working_dir)
            .output()
            .map_err(|e| {
                MigrationError::Engine(format!(
                    "failed to run {}: {}",
                    self.terraform_path.display(),
                    e
                ))
            })
    }

    fn run_checked(&self, args: &[&str], context: &str) -> Result<Output> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = self.run(&args)?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(command_failure(context, &output))
        }
    }
}

/// Map a failed terraform invocation to the error taxonomy. Lock contention is
/// recognised from the engine's own message.
pub fn command_failure(context: &str, output: &Output) -> MigrationError {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    let combined = format!("{}\n{}", stderr, stdout);
    if let Some(lock) = LockRecord::from_engine_output(&combined) {
        return MigrationError::LockConflict {
            lock_id: lock.id,
            holder: lock.who,
        };
    }
    MigrationError::Engine(format!("{}: {}", context, stderr.trim()))
}

#[async_trait]
impl StateEngine for TerraformCli {
    async fn init(&self, options: &InitOptions) -> Result<String> {
        let output = self.run(&options.args())?;
        if !output.status.success() {
            return Err(command_failure("terraform init failed", &output));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn plan(&self, extra_flag: Option<&str>) -> Result<PlanOutput> {
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-lock=false".to_string(),
            "-no-color".to_string(),
        ];
        if let Some(flag) = extra_flag {
            args.push(flag.to_string());
        }
        let output = self.run(&args)?;
        Ok(PlanOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    async fn pull(&self) -> Result<Vec<u8>> {
        let args = vec!["state".to_string(), "pull".to_string()];
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(MigrationError::Io(format!(
                "terraform state pull failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }

    async fn push(&self, state: &[u8], force: bool) -> Result<()> {
        let mut file = tempfile::Builder::new()
            .prefix("tfbackend-push-")
            .suffix(".tfstate")
            .tempfile()
            .map_err(|e| MigrationError::Write(format!("cannot stage state for push: {}", e)))?;
        file.write_all(state)
            .and_then(|_| file.flush())
            .map_err(|e| MigrationError::Write(format!("cannot stage state for push: {}", e)))?;

        let path = file.path().display().to_string();
        let mut args = vec!["state", "push"];
        if force {
            args.push("-force");
        }
        args.push(&path);

        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        let output = self.run(&args)?;
        if !output.status.success() {
            return Err(match command_failure("terraform state push rejected", &output) {
                MigrationError::Engine(msg) => MigrationError::Write(msg),
                other => other,
            });
        }
        info!("Pushed {} bytes of state", state.len());
        Ok(())
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<()> {
        self.run_checked(
            &["force-unlock", "-force", lock_id],
            "terraform force-unlock failed",
        )?;
        Ok(())
    }

    async fn state_list(&self) -> Result<Vec<String>> {
        let output = self.run_checked(&["state", "list"], "terraform state list failed")?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(|line| line.trim())
            .filter(|line| !line.is_empty())
            .map(|line| line.to_string())
            .collect())
    }

    async fn workspace_select(&self, name: &str) -> Result<()> {
        let args: Vec<String> = ["workspace", "select", name]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let output = self.run(&args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("doesn't exist") || stderr.contains("does not exist") {
                return Err(MigrationError::Usage(format!(
                    "Workspace '{}' does not exist",
                    name
                )));
            }
            return Err(command_failure("terraform workspace select failed", &output));
        }
        Ok(())
    }

    async fn workspace_new(&self, name: &str) -> Result<()> {
        if !is_valid_workspace_name(name) {
            return Err(MigrationError::Usage(format!(
                "Invalid workspace name: '{}'. Names must be alphanumeric with hyphens or underscores",
                name
            )));
        }
        self.run_checked(
            &["workspace", "new", name],
            "terraform workspace new failed",
        )?;
        Ok(())
    }
}

pub fn is_valid_workspace_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 100 {
        return false;
    }
    name.chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
}
