//! Advisory health and compliance report over a state snapshot and its backend.
//!
//! Nothing in here mutates anything. Failures while gathering data end up in
//! the report's `errors` list instead of aborting the run.

use crate::aws::cli::{LockTable, ObjectStore, RemoteResult};
use crate::terraform::backend::BackendDescriptor;
use crate::terraform::lock::LockRecord;
use crate::terraform::state::StateSnapshot;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

/// Security-relevant backend settings. `None` means the setting could not be read.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackendPosture {
    pub encryption: Option<bool>,
    pub versioning: Option<bool>,
    pub public_access_blocked: Option<bool>,
    pub point_in_time_recovery: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PostureFlag {
    Versioning,
    Encryption,
    PublicAccessBlocked,
    PointInTimeRecovery,
}

/// A disabled flag yields its recommendation. Unknown flags yield nothing.
const RULES: &[(PostureFlag, &str)] = &[
    (
        PostureFlag::Versioning,
        "Enable versioning on the state bucket to allow recovery of previous state revisions",
    ),
    (
        PostureFlag::Encryption,
        "Enable default encryption on the state bucket",
    ),
    (
        PostureFlag::PublicAccessBlocked,
        "Block all public access to the state bucket",
    ),
    (
        PostureFlag::PointInTimeRecovery,
        "Enable point-in-time recovery on the lock table",
    ),
];

impl BackendPosture {
    pub fn flag(&self, flag: PostureFlag) -> Option<bool> {
        match flag {
            PostureFlag::Versioning => self.versioning,
            PostureFlag::Encryption => self.encryption,
            PostureFlag::PublicAccessBlocked => self.public_access_blocked,
            PostureFlag::PointInTimeRecovery => self.point_in_time_recovery,
        }
    }
}

pub fn recommendations(posture: &BackendPosture) -> Vec<String> {
    RULES
        .iter()
        .filter(|(flag, _)| posture.flag(*flag) == Some(false))
        .map(|(_, text)| text.to_string())
        .collect()
}

/// Health check result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateSummary {
    pub version: u64,
    pub terraform_version: Option<String>,
    pub serial: u64,
    pub lineage: String,
    pub total_resources: usize,
    pub total_instances: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub generated_at: DateTime<Utc>,
    pub backend: Option<BackendDescriptor>,
    pub state: Option<StateSummary>,
    pub resources_by_type: BTreeMap<String, usize>,
    pub resources_by_provider: BTreeMap<String, usize>,
    pub resources_by_module: BTreeMap<String, usize>,
    pub providers: Vec<String>,
    pub modules: Vec<String>,
    pub posture: BackendPosture,
    pub active_locks: Vec<LockRecord>,
    pub health_checks: Vec<HealthCheck>,
    pub recommendations: Vec<String>,
    pub errors: Vec<String>,
}

/// Derive a report from already-fetched data.
pub fn analyze(
    snapshot: Option<&StateSnapshot>,
    backend: Option<&BackendDescriptor>,
    posture: BackendPosture,
) -> AnalysisReport {
    let mut by_type = BTreeMap::new();
    let mut by_provider = BTreeMap::new();
    let mut by_module = BTreeMap::new();
    let mut providers = BTreeSet::new();
    let mut modules = BTreeSet::new();

    if let Some(state) = snapshot {
        for resource in &state.resources {
            let provider = resource.provider_name();
            let module = resource.module_path().to_string();
            *by_type.entry(resource.resource_type.clone()).or_insert(0) += 1;
            *by_provider.entry(provider.clone()).or_insert(0) += 1;
            *by_module.entry(module.clone()).or_insert(0) += 1;
            providers.insert(provider);
            modules.insert(module);
        }
    }

    let summary = snapshot.map(|state| StateSummary {
        version: state.version,
        terraform_version: state.terraform_version.clone(),
        serial: state.serial,
        lineage: state.lineage.clone(),
        total_resources: state.resources.len(),
        total_instances: state.instance_count(),
    });

    AnalysisReport {
        generated_at: Utc::now(),
        backend: backend.cloned(),
        health_checks: run_health_checks(snapshot),
        state: summary,
        resources_by_type: by_type,
        resources_by_provider: by_provider,
        resources_by_module: by_module,
        providers: providers.into_iter().collect(),
        modules: modules.into_iter().collect(),
        recommendations: recommendations(&posture),
        posture,
        active_locks: Vec::new(),
        errors: Vec::new(),
    }
}

fn run_health_checks(snapshot: Option<&StateSnapshot>) -> Vec<HealthCheck> {
    let mut checks = Vec::new();
    let Some(state) = snapshot else {
        checks.push(HealthCheck {
            name: "state_readable".to_string(),
            status: HealthStatus::Critical,
            message: "State could not be read".to_string(),
        });
        return checks;
    };

    if state.resources.is_empty() {
        checks.push(HealthCheck {
            name: "state_not_empty".to_string(),
            status: HealthStatus::Warning,
            message: "State is empty - no resources are being managed".to_string(),
        });
    } else {
        checks.push(HealthCheck {
            name: "state_not_empty".to_string(),
            status: HealthStatus::Healthy,
            message: format!("State contains {} resources", state.resources.len()),
        });
    }

    let tainted = state
        .resources
        .iter()
        .flat_map(|r| r.instances.iter())
        .filter(|i| i.status.as_deref() == Some("tainted"))
        .count();
    if tainted > 0 {
        checks.push(HealthCheck {
            name: "no_tainted_resources".to_string(),
            status: HealthStatus::Warning,
            message: format!(
                "{} tainted instances found - they will be recreated on next apply",
                tainted
            ),
        });
    } else {
        checks.push(HealthCheck {
            name: "no_tainted_resources".to_string(),
            status: HealthStatus::Healthy,
            message: "No tainted instances found".to_string(),
        });
    }

    checks
}

fn query<T>(label: &str, errors: &mut Vec<String>, result: RemoteResult<T>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Could not determine {}: {}", label, e);
            errors.push(format!("{}: {}", label, e));
            None
        }
    }
}

/// Read the backend's security settings. Each unreadable setting becomes an error entry.
pub async fn gather_posture(
    store: &dyn ObjectStore,
    locks: &dyn LockTable,
    descriptor: &BackendDescriptor,
    errors: &mut Vec<String>,
) -> BackendPosture {
    let bucket = &descriptor.bucket;
    let encryption = store.encryption_enabled(bucket).await;
    let versioning = store.versioning_enabled(bucket).await;
    let public_access = store.public_access_blocked(bucket).await;
    let pitr = locks
        .point_in_time_recovery_enabled(&descriptor.dynamodb_table)
        .await;
    BackendPosture {
        encryption: query("bucket encryption", errors, encryption),
        versioning: query("bucket versioning", errors, versioning),
        public_access_blocked: query("public access block", errors, public_access),
        point_in_time_recovery: query("point-in-time recovery", errors, pitr),
    }
}

/// Fetch everything and build the report. Never fails.
pub async fn run_analysis(
    store: &dyn ObjectStore,
    locks: &dyn LockTable,
    descriptor: &BackendDescriptor,
    local_state: Option<&Path>,
) -> AnalysisReport {
    let mut errors = Vec::new();

    let raw = match local_state {
        Some(path) => std::fs::read(path)
            .map_err(|e| format!("state file {}: {}", path.display(), e)),
        None => store
            .get_object(&descriptor.bucket, &descriptor.key)
            .await
            .map_err(|e| format!("state s3://{}/{}: {}", descriptor.bucket, descriptor.key, e)),
    };
    let snapshot = match raw {
        Ok(bytes) => match StateSnapshot::from_bytes(&bytes) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                errors.push(format!("state: {}", e));
                None
            }
        },
        Err(e) => {
            errors.push(e);
            None
        }
    };

    let posture = gather_posture(store, locks, descriptor, &mut errors).await;
    let listed = locks.list_locks(&descriptor.dynamodb_table).await;
    let active_locks = query("active locks", &mut errors, listed).unwrap_or_default();

    let mut report = analyze(snapshot.as_ref(), Some(descriptor), posture);
    if !active_locks.is_empty() {
        report.health_checks.push(HealthCheck {
            name: "no_active_locks".to_string(),
            status: HealthStatus::Warning,
            message: format!(
                "{} active lock(s); a run may be in progress or a lock was left behind",
                active_locks.len()
            ),
        });
    }
    report.active_locks = active_locks;
    report.errors = errors;
    info!(
        "Analysis complete: {} recommendations, {} errors",
        report.recommendations.len(),
        report.errors.len()
    );
    report
}

/// Report over a local state file only, for when no backend is given.
pub fn analyze_state_file(path: &Path) -> AnalysisReport {
    let parsed = std::fs::read(path)
        .map_err(|e| format!("state file {}: {}", path.display(), e))
        .and_then(|bytes| StateSnapshot::from_bytes(&bytes).map_err(|e| format!("state: {}", e)));
    match parsed {
        Ok(snapshot) => analyze(Some(&snapshot), None, BackendPosture::default()),
        Err(e) => {
            let mut report = analyze(None, None, BackendPosture::default());
            report.errors.push(e);
            report
        }
    }
}
