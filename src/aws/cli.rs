//! Object storage and lock table collaborators, implemented on top of the `aws` CLI.

use crate::terraform::lock::LockRecord;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("{0} does not exist")]
    NotFound(String),

    #[error("Access denied to {0}")]
    AccessDenied(String),

    #[error("AWS CLI call failed: {0}")]
    Command(String),

    #[error("Unexpected AWS CLI output: {0}")]
    Parse(String),
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Durable object storage holding the state file (S3).
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn bucket_exists(&self, bucket: &str) -> RemoteResult<()>;
    async fn get_object(&self, bucket: &str, key: &str) -> RemoteResult<Vec<u8>>;
    async fn versioning_enabled(&self, bucket: &str) -> RemoteResult<bool>;
    async fn encryption_enabled(&self, bucket: &str) -> RemoteResult<bool>;
    async fn public_access_blocked(&self, bucket: &str) -> RemoteResult<bool>;
}

/// Distributed lock table guarding the state file (DynamoDB).
#[async_trait]
pub trait LockTable: Send + Sync {
    async fn table_exists(&self, table: &str) -> RemoteResult<()>;
    async fn point_in_time_recovery_enabled(&self, table: &str) -> RemoteResult<bool>;
    async fn list_locks(&self, table: &str) -> RemoteResult<Vec<LockRecord>>;
}

/// Both collaborators, backed by one `aws` binary and region.
pub struct AwsCli {
    aws_path: PathBuf,
    region: String,
}

impl AwsCli {
    pub fn new(aws_path: PathBuf, region: &str) -> Self {
        Self {
            aws_path,
            region: region.to_string(),
        }
    }

    fn run(&self, args: &[&str], subject: &str) -> RemoteResult<Vec<u8>> {
        debug!("Running aws {} (region {})", args.join(" "), self.region);
        let output = Command::new(&self.aws_path)
            .args(args)
            .arg("--region")
            .arg(&self.region)
            .arg("--output")
            .arg("json")
            .output()
            .map_err(|e| {
                RemoteError::Command(format!("failed to run {}: {}", self.aws_path.display(), e))
            })?;

        if output.status.success() {
            return Ok(output.stdout);
        }
        Err(classify_failure(
            subject,
            &String::from_utf8_lossy(&output.stderr),
        ))
    }

    fn run_json(&self, args: &[&str], subject: &str) -> RemoteResult<Value> {
        let stdout = self.run(args, subject)?;
        if stdout.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(&stdout).map_err(|e| RemoteError::Parse(e.to_string()))
    }
}

/// Map AWS CLI stderr to a remote error kind.
pub fn classify_failure(subject: &str, stderr: &str) -> RemoteError {
    if stderr.contains("Not Found")
        || stderr.contains("(404)")
        || stderr.contains("NoSuchBucket")
        || stderr.contains("NoSuchKey")
        || stderr.contains("ResourceNotFoundException")
    {
        RemoteError::NotFound(subject.to_string())
    } else if stderr.contains("Forbidden")
        || stderr.contains("(403)")
        || stderr.contains("AccessDenied")
    {
        RemoteError::AccessDenied(subject.to_string())
    } else {
        RemoteError::Command(stderr.trim().to_string())
    }
}

/// A missing configuration document means the feature is off, not that the query failed.
fn absent_means_disabled(result: RemoteResult<Value>, marker_errors: &[&str]) -> RemoteResult<Value> {
    match result {
        Err(RemoteError::Command(msg)) if marker_errors.iter().any(|m| msg.contains(m)) => {
            Ok(Value::Null)
        }
        other => other,
    }
}

#[async_trait]
impl ObjectStore for AwsCli {
    async fn bucket_exists(&self, bucket: &str) -> RemoteResult<()> {
        self.run(
            &["s3api", "head-bucket", "--bucket", bucket],
            &format!("S3 bucket '{}'", bucket),
        )?;
        Ok(())
    }

    async fn get_object(&self, bucket: &str, key: &str) -> RemoteResult<Vec<u8>> {
        let url = format!("s3://{}/{}", bucket, key);
        self.run(&["s3", "cp", &url, "-"], &url)
    }

    async fn versioning_enabled(&self, bucket: &str) -> RemoteResult<bool> {
        let json = self.run_json(
            &["s3api", "get-bucket-versioning", "--bucket", bucket],
            &format!("S3 bucket '{}'", bucket),
        )?;
        Ok(parse_versioning(&json))
    }

    async fn encryption_enabled(&self, bucket: &str) -> RemoteResult<bool> {
        let json = absent_means_disabled(
            self.run_json(
                &["s3api", "get-bucket-encryption", "--bucket", bucket],
                &format!("S3 bucket '{}'", bucket),
            ),
            &["ServerSideEncryptionConfigurationNotFoundError"],
        )?;
        Ok(parse_encryption(&json))
    }

    async fn public_access_blocked(&self, bucket: &str) -> RemoteResult<bool> {
        let json = absent_means_disabled(
            self.run_json(
                &["s3api", "get-public-access-block", "--bucket", bucket],
                &format!("S3 bucket '{}'", bucket),
            ),
            &["NoSuchPublicAccessBlockConfiguration"],
        )?;
        Ok(parse_public_access_block(&json))
    }
}

#[async_trait]
impl LockTable for AwsCli {
    async fn table_exists(&self, table: &str) -> RemoteResult<()> {
        self.run(
            &["dynamodb", "describe-table", "--table-name", table],
            &format!("DynamoDB table '{}'", table),
        )?;
        Ok(())
    }

    async fn point_in_time_recovery_enabled(&self, table: &str) -> RemoteResult<bool> {
        let json = self.run_json(
            &["dynamodb", "describe-continuous-backups", "--table-name", table],
            &format!("DynamoDB table '{}'", table),
        )?;
        Ok(parse_point_in_time_recovery(&json))
    }

    async fn list_locks(&self, table: &str) -> RemoteResult<Vec<LockRecord>> {
        let json = self.run_json(
            &["dynamodb", "scan", "--table-name", table],
            &format!("DynamoDB table '{}'", table),
        )?;
        Ok(parse_lock_items(&json))
    }
}

pub fn parse_versioning(json: &Value) -> bool {
    json.get("Status").and_then(Value::as_str) == Some("Enabled")
}

pub fn parse_encryption(json: &Value) -> bool {
    json.pointer("/ServerSideEncryptionConfiguration/Rules")
        .and_then(Value::as_array)
        .is_some_and(|rules| !rules.is_empty())
}

pub fn parse_public_access_block(json: &Value) -> bool {
    let Some(config) = json.get("PublicAccessBlockConfiguration") else {
        return false;
    };
    [
        "BlockPublicAcls",
        "IgnorePublicAcls",
        "BlockPublicPolicy",
        "RestrictPublicBuckets",
    ]
    .iter()
    .all(|flag| config.get(flag).and_then(Value::as_bool) == Some(true))
}

pub fn parse_point_in_time_recovery(json: &Value) -> bool {
    json.pointer(
        "/ContinuousBackupsDescription/PointInTimeRecoveryDescription/PointInTimeRecoveryStatus",
    )
    .and_then(Value::as_str)
        == Some("ENABLED")
}

/// Lock items carry an `Info` string attribute; digest items (`<path>-md5`) do not.
pub fn parse_lock_items(json: &Value) -> Vec<LockRecord> {
    json.get("Items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.pointer("/Info/S").and_then(Value::as_str))
                .filter_map(LockRecord::from_info_json)
                .collect()
        })
        .unwrap_or_default()
}
