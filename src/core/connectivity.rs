//! Reachability checks for the storage location and lock table, kept separate
//! from structural validation of the backend configuration.

use crate::aws::cli::{LockTable, ObjectStore, RemoteError};
use crate::core::error::MigrationError;
use crate::terraform::backend::BackendDescriptor;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceCheck {
    pub resource: String,
    pub reachable: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConnectivityReport {
    pub storage: ResourceCheck,
    pub lock_table: ResourceCheck,
}

impl ConnectivityReport {
    pub fn is_reachable(&self) -> bool {
        self.storage.reachable && self.lock_table.reachable
    }

    /// Storage is there but locking is not: a backup is still possible, migration is not.
    pub fn backup_only(&self) -> bool {
        self.storage.reachable && !self.lock_table.reachable
    }

    /// The first unreachable resource as an error, for callers that must abort.
    pub fn to_error(&self) -> Option<MigrationError> {
        [&self.storage, &self.lock_table]
            .into_iter()
            .find(|check| !check.reachable)
            .map(|check| MigrationError::Connectivity {
                resource: check.resource.clone(),
                reason: check.error.clone().unwrap_or_default(),
            })
    }
}

fn describe(result: Result<(), RemoteError>, resource: String) -> ResourceCheck {
    match result {
        Ok(()) => {
            info!("{} is reachable", resource);
            ResourceCheck {
                resource,
                reachable: true,
                error: None,
            }
        }
        Err(e) => {
            error!("{} is unreachable: {}", resource, e);
            ResourceCheck {
                resource,
                reachable: false,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Check the storage location and the lock table independently. Never fails;
/// unreachable resources are reported in the result and logged by name.
pub async fn check_connectivity(
    store: &dyn ObjectStore,
    locks: &dyn LockTable,
    descriptor: &BackendDescriptor,
) -> ConnectivityReport {
    let storage = describe(
        store.bucket_exists(&descriptor.bucket).await,
        format!("S3 bucket '{}'", descriptor.bucket),
    );
    let lock_table = describe(
        locks.table_exists(&descriptor.dynamodb_table).await,
        format!("DynamoDB table '{}'", descriptor.dynamodb_table),
    );
    ConnectivityReport {
        storage,
        lock_table,
    }
}

/// `true` when both the storage location and the lock table answered.
pub async fn test_connectivity(
    store: &dyn ObjectStore,
    locks: &dyn LockTable,
    descriptor: &BackendDescriptor,
) -> bool {
    check_connectivity(store, locks, descriptor)
        .await
        .is_reachable()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(resource: &str, reachable: bool) -> ResourceCheck {
        ResourceCheck {
            resource: resource.to_string(),
            reachable,
            error: (!reachable).then(|| "S3 bucket does not exist".to_string()),
        }
    }

    #[test]
    fn test_report_names_unreachable_resource() {
        let report = ConnectivityReport {
            storage: check("S3 bucket 'state'", true),
            lock_table: check("DynamoDB table 'locks'", false),
        };
        assert!(!report.is_reachable());
        assert!(report.backup_only());
        match report.to_error() {
            Some(MigrationError::Connectivity { resource, .. }) => {
                assert_eq!(resource, "DynamoDB table 'locks'")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_reachable_report_has_no_error() {
        let report = ConnectivityReport {
            storage: check("a", true),
            lock_table: check("b", true),
        };
        assert!(report.is_reachable());
        assert!(report.to_error().is_none());
    }
}
