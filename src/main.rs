use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tfbackend::core::backup::BackupStore;
use tfbackend::core::connectivity::check_connectivity;
use tfbackend::core::error::MigrationError;
use tfbackend::core::migrator::Migrator;
use tfbackend::core::tfbackend::{resolve_path, TfBackend};
use tfbackend::core::unlock::{find_lock, force_unlock, Confirmation};
use tfbackend::formatters::output;
use tfbackend::hcp::client::HcpClient;
use tfbackend::shared::logging;
use tfbackend::terraform::backend::{
    create_config, validate_backend_config, BackendConfig, BackendDescriptor, DEFAULT_STATE_KEY,
};

const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(
    name = "tfbackend",
    about = "✨ Back up, validate, migrate and verify Terraform remote state backends.",
    version = APP_VERSION
)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, short = 'c', global = true, value_name = "PATH", help = "Path to the configuration file")]
    pub config: Option<PathBuf>,

    #[arg(long, short = 'd', global = true, value_name = "PATH", help = "Terraform working directory")]
    pub dir: Option<PathBuf>,

    #[arg(long, global = true, help = "AWS region (defaults to the configured region, us-east-1)")]
    pub region: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Back up the current state to the local backup directory")]
    Backup {
        #[arg(long, help = "Label appended to the backup file name")]
        label: Option<String>,
    },

    #[command(about = "Check a backend config file for required fields")]
    Validate {
        #[arg(long, value_name = "PATH")]
        backend_config: Option<PathBuf>,
    },

    #[command(name = "test-connectivity", about = "Check that the state bucket and lock table are reachable")]
    TestConnectivity {
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        dynamodb_table: Option<String>,
        #[arg(long, value_name = "PATH")]
        backend_config: Option<PathBuf>,
    },

    #[command(name = "create-config", about = "Write an S3 backend config file")]
    CreateConfig {
        #[arg(long)]
        bucket: Option<String>,
        #[arg(long)]
        dynamodb_table: Option<String>,
        #[arg(long, default_value = DEFAULT_STATE_KEY)]
        key: String,
        #[arg(long, value_name = "PATH", default_value = "backend.hcl")]
        backend_config: PathBuf,
        #[arg(long)]
        kms_key_id: Option<String>,
        #[arg(long)]
        overwrite: bool,
    },

    #[command(about = "Migrate state to the backend described by a config file")]
    Migrate {
        #[arg(long, value_name = "PATH")]
        backend_config: Option<PathBuf>,
        #[arg(long, help = "Skip the bucket/lock table reachability check")]
        skip_connectivity: bool,
    },

    #[command(name = "workspace-migrate", about = "Copy state from one workspace to another")]
    WorkspaceMigrate {
        #[arg(long)]
        source_workspace: Option<String>,
        #[arg(long)]
        target_workspace: Option<String>,
    },

    #[command(name = "force-unlock", about = "Remove a state lock without its holder (dangerous)")]
    ForceUnlock {
        #[arg(long)]
        lock_id: Option<String>,
        #[arg(long, help = "Lock table to show the lock holder from before removing")]
        dynamodb_table: Option<String>,
        #[arg(long, help = "Confirm that no other run holds this lock")]
        force: bool,
    },

    #[command(about = "Push a backup file back to the active backend")]
    Restore {
        #[arg(long, value_name = "PATH")]
        backup_file: Option<PathBuf>,
    },

    #[command(about = "HCP Terraform workspaces and runs")]
    Hcp {
        #[command(subcommand)]
        command: HcpCommands,
    },
}

#[derive(Subcommand)]
enum HcpCommands {
    #[command(about = "List workspaces in an organization")]
    Workspaces {
        #[arg(long)]
        organization: Option<String>,
    },
    #[command(name = "create-workspace", about = "Create a workspace")]
    CreateWorkspace {
        #[arg(long)]
        organization: Option<String>,
        #[arg(long)]
        name: String,
        #[arg(long)]
        terraform_version: Option<String>,
        #[arg(long)]
        working_directory: Option<String>,
    },
    #[command(about = "List runs of a workspace")]
    Runs {
        #[arg(long)]
        workspace_id: String,
    },
    #[command(name = "create-run", about = "Queue a run on a workspace")]
    CreateRun {
        #[arg(long)]
        workspace_id: String,
        #[arg(long, default_value = "Queued by tfbackend")]
        message: String,
    },
}

#[tokio::main]
async fn main() {
    logging::init_logging();
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if !e.use_stderr() => {
            // --help and --version
            let _ = e.print();
            return;
        }
        Err(e) => {
            output::print_error(&format!("arguments failed: {}", e.to_string().trim_end()));
            std::process::exit(1);
        }
    };

    if let Err(err) = run(cli).await {
        output::print_anyhow_failure(&err);
        std::process::exit(1);
    }
}

fn require<T>(value: Option<T>, flag: &str) -> Result<T, MigrationError> {
    value.ok_or_else(|| MigrationError::Usage(format!("{} is required for this command", flag)))
}

fn descriptor_from(
    app: &TfBackend,
    region: Option<&str>,
    bucket: Option<String>,
    table: Option<String>,
    backend_config: Option<&Path>,
) -> Result<BackendDescriptor, MigrationError> {
    if let Some(path) = backend_config {
        return BackendConfig::load(&app.resolve(path))?.to_descriptor();
    }
    Ok(BackendDescriptor::new(
        &require(bucket, "--bucket")?,
        DEFAULT_STATE_KEY,
        region.unwrap_or(&app.config.aws.region),
        &require(table, "--dynamodb-table")?,
    ))
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Commands that never touch terraform.
    match &cli.command {
        Commands::Validate { backend_config } => {
            let path = require(backend_config.as_deref(), "--backend-config")?;
            let path = match &cli.dir {
                Some(dir) => resolve_path(dir, path),
                None => path.to_path_buf(),
            };
            let config = BackendConfig::load(&path)?;
            validate_backend_config(&config)?;
            output::print_success(&format!("{} is a valid backend configuration", path.display()));
            return Ok(());
        }
        Commands::Hcp { command } => return run_hcp(&cli, command).await,
        _ => {}
    }

    let app = TfBackend::new(cli.config.as_deref(), cli.dir.as_deref())?;
    let region = cli.region.as_deref();

    match cli.command {
        Commands::Backup { label } => {
            let artifact = app.backups().backup(app.engine(), label.as_deref()).await?;
            output::print_success(&format!(
                "State backed up to {} ({} bytes)",
                artifact.path.display(),
                artifact.size
            ));
        }
        Commands::TestConnectivity {
            bucket,
            dynamodb_table,
            backend_config,
        } => {
            let descriptor =
                descriptor_from(&app, region, bucket, dynamodb_table, backend_config.as_deref())?;
            let aws = app.aws(Some(&descriptor.region))?;
            let report = check_connectivity(&aws, &aws, &descriptor).await;
            output::print_connectivity(&report);
            if report.backup_only() {
                output::print_warning("Storage is reachable but locking is not; only backups are safe");
            }
            if let Some(err) = report.to_error() {
                return Err(err.into());
            }
        }
        Commands::CreateConfig {
            bucket,
            dynamodb_table,
            key,
            backend_config,
            kms_key_id,
            overwrite,
        } => {
            let mut descriptor = BackendDescriptor::new(
                &require(bucket, "--bucket")?,
                &key,
                region.unwrap_or(&app.config.aws.region),
                &require(dynamodb_table, "--dynamodb-table")?,
            );
            descriptor.kms_key_id = kms_key_id;
            let path = app.resolve(&backend_config);
            create_config(&descriptor, &path, overwrite)?;
            output::print_success(&format!("Backend configuration written to {}", path.display()));
        }
        Commands::Migrate {
            backend_config,
            skip_connectivity,
        } => {
            let path = app.resolve(&require(backend_config, "--backend-config")?);
            let aws;
            let mut migrator = Migrator::new(
                app.engine(),
                app.backups(),
                app.config.verification.clone(),
            );
            if !skip_connectivity {
                let target_region = BackendConfig::load(&path)?
                    .get("region")
                    .map(|r| r.to_string());
                aws = app.aws(target_region.as_deref().or(region))?;
                migrator = migrator.with_connectivity_check(&aws, &aws);
            }
            let result = migrator.migrate(&path).await;
            app.audit(
                "migrate",
                Some(path.display().to_string()),
                result.as_ref().err().map(|e| e.to_string()),
            );
            if let Some(verification) = migrator.verification() {
                output::print_verification(verification);
            }
            let report = result?;
            output::print_success(&format!(
                "Migration verified: {} resources in the new backend (backup: {})",
                report.verification.resource_count,
                report.backup.path.display()
            ));
        }
        Commands::WorkspaceMigrate {
            source_workspace,
            target_workspace,
        } => {
            let source = require(source_workspace, "--source-workspace")?;
            let target = require(target_workspace, "--target-workspace")?;
            let mut migrator = Migrator::new(
                app.engine(),
                app.backups(),
                app.config.verification.clone(),
            );
            let result = migrator.migrate_workspace(&source, &target).await;
            app.audit(
                "workspace-migrate",
                Some(format!("{} -> {}", source, target)),
                result.as_ref().err().map(|e| e.to_string()),
            );
            if let Some(verification) = migrator.verification() {
                output::print_verification(verification);
            }
            let report = result?;
            output::print_success(&format!(
                "Workspace '{}' copied to '{}' ({} resources, backup: {})",
                source,
                target,
                report.verification.resource_count,
                report.backup.path.display()
            ));
        }
        Commands::ForceUnlock {
            lock_id,
            dynamodb_table,
            force,
        } => {
            let lock_id = require(lock_id, "--lock-id")?;
            if let (Some(table), true) = (dynamodb_table, force) {
                let aws = app.aws(region)?;
                if let Some(lock) = find_lock(&aws, &table, &lock_id).await {
                    output::print_warning(&format!(
                        "Removing lock held by {} for {} since {}",
                        lock.who, lock.operation, lock.created
                    ));
                }
            }
            let result = force_unlock(app.engine(), &lock_id, Confirmation::from(force)).await;
            if force {
                app.audit(
                    "force-unlock",
                    Some(lock_id.clone()),
                    result.as_ref().err().map(|e| e.to_string()),
                );
            }
            result?;
            output::print_success(&format!("Lock {} removed", lock_id));
        }
        Commands::Restore { backup_file } => {
            let path = match backup_file {
                Some(path) => path,
                None => {
                    let available = list_backups(app.backups());
                    return Err(MigrationError::Usage(format!(
                        "--backup-file is required. Available backups: {}",
                        available
                    ))
                    .into());
                }
            };
            let result = app.backups().restore(app.engine(), &path).await;
            app.audit(
                "restore",
                Some(path.display().to_string()),
                result.as_ref().err().map(|e| e.to_string()),
            );
            result?;
            output::print_success(&format!("State restored from {}", path.display()));
        }
        Commands::Validate { .. } | Commands::Hcp { .. } => {}
    }
    Ok(())
}

fn list_backups(store: &BackupStore) -> String {
    match store.list() {
        Ok(paths) if !paths.is_empty() => paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", "),
        _ => format!("none in {}", store.directory().display()),
    }
}

async fn run_hcp(cli: &Cli, command: &HcpCommands) -> anyhow::Result<()> {
    let config = tfbackend::config::load(cli.config.as_deref())?;
    let client = HcpClient::new(&config.hcp.base_url, config.hcp.token.clone())?;
    let organization = |given: &Option<String>| -> Result<String, MigrationError> {
        require(
            given.clone().or_else(|| config.hcp.organization.clone()),
            "--organization",
        )
    };

    match command {
        HcpCommands::Workspaces { organization: org } => {
            let org = organization(org)?;
            for ws in client.list_workspaces(&org).await? {
                println!(
                    "{:<24} {:<32} {:<10} resources={} locked={}",
                    ws.id,
                    ws.name,
                    ws.terraform_version.as_deref().unwrap_or("-"),
                    ws.resource_count.map_or("-".to_string(), |c| c.to_string()),
                    ws.locked
                );
            }
        }
        HcpCommands::CreateWorkspace {
            organization: org,
            name,
            terraform_version,
            working_directory,
        } => {
            let org = organization(org)?;
            let ws = client
                .create_workspace(
                    &org,
                    name,
                    terraform_version.as_deref(),
                    working_directory.as_deref(),
                )
                .await?;
            output::print_success(&format!("Created workspace {} ({})", ws.name, ws.id));
        }
        HcpCommands::Runs { workspace_id } => {
            for run in client.list_runs(workspace_id).await? {
                println!(
                    "{:<24} {:<20} {}",
                    run.id,
                    run.status,
                    run.message.as_deref().unwrap_or("")
                );
            }
        }
        HcpCommands::CreateRun {
            workspace_id,
            message,
        } => {
            let run = client.create_run(workspace_id, message).await?;
            output::print_success(&format!("Queued run {} ({})", run.id, run.status));
        }
    }
    Ok(())
}
