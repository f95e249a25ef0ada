//! Post-migration verification: resource count, lineage/serial continuity and
//! a speculative plan read through an explicit exit-code contract.

use crate::config::PlanExitContract;
use crate::core::error::{MigrationError, Result};
use crate::terraform::engine::{PlanOutput, StateEngine};
use crate::terraform::state::StateSnapshot;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// How the planning step's outcome was read.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum PlanVerdict {
    NoChanges,
    ChangesPresent,
    Failed {
        exit_code: Option<i32>,
        detail: String,
    },
}

pub fn classify_plan(output: &PlanOutput, contract: &PlanExitContract) -> PlanVerdict {
    match output.exit_code {
        Some(code) if code == contract.no_changes => PlanVerdict::NoChanges,
        Some(code) if Some(code) == contract.changes_present => PlanVerdict::ChangesPresent,
        code => PlanVerdict::Failed {
            exit_code: code,
            detail: output.stderr.trim().to_string(),
        },
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VerificationResult {
    pub consistent: bool,
    pub resource_count: usize,
    pub expected_resource_count: Option<usize>,
    pub plan: Option<PlanVerdict>,
    pub lineage_preserved: Option<bool>,
    pub serial_monotonic: Option<bool>,
    pub notices: Vec<String>,
    pub problems: Vec<String>,
}

impl VerificationResult {
    pub fn into_result(self) -> Result<Self> {
        if self.consistent {
            Ok(self)
        } else {
            Err(MigrationError::Verification(self.problems.join("; ")))
        }
    }
}

/// Verify the state now held by the engine's configured backend.
///
/// `source` is the snapshot taken before migration, when available. Failures
/// of the underlying commands are reported as inconsistencies rather than errors.
pub async fn verify(
    engine: &dyn StateEngine,
    contract: &PlanExitContract,
    source: Option<&StateSnapshot>,
) -> VerificationResult {
    let mut notices = Vec::new();
    let mut problems = Vec::new();

    let resource_count = match engine.state_list().await {
        Ok(addresses) => addresses.len(),
        Err(e) => {
            problems.push(format!("could not list resources: {}", e));
            0
        }
    };
    let expected_resource_count = source.map(StateSnapshot::instance_count);
    if let Some(expected) = expected_resource_count {
        if problems.is_empty() && expected != resource_count {
            problems.push(format!(
                "expected {} resources, found {}",
                expected, resource_count
            ));
        }
    }

    let (mut lineage_preserved, mut serial_monotonic) = (None, None);
    if let Some(source) = source {
        match engine.pull().await.map(|bytes| StateSnapshot::from_bytes(&bytes)) {
            Ok(Ok(target)) => {
                let same_lineage = target.shares_lineage_with(source);
                let monotonic = target.serial >= source.serial;
                if !same_lineage {
                    problems.push(format!(
                        "lineage changed from {} to {}",
                        source.lineage, target.lineage
                    ));
                }
                if !monotonic {
                    problems.push(format!(
                        "serial went backwards from {} to {}",
                        source.serial, target.serial
                    ));
                }
                lineage_preserved = Some(same_lineage);
                serial_monotonic = Some(monotonic);
            }
            Ok(Err(e)) => problems.push(format!("migrated state is unreadable: {}", e)),
            Err(e) => problems.push(format!("could not pull migrated state: {}", e)),
        }
    }

    let plan = match engine
        .plan(contract.detailed_exitcode_flag.as_deref())
        .await
    {
        Ok(output) => {
            let verdict = classify_plan(&output, contract);
            match &verdict {
                PlanVerdict::NoChanges => info!("Plan reports no changes"),
                PlanVerdict::ChangesPresent if contract.changes_are_consistent => {
                    warn!("Plan reports pending changes against the migrated state");
                    notices.push(
                        "plan shows pending changes (may be expected); review before the next apply"
                            .to_string(),
                    );
                }
                PlanVerdict::ChangesPresent => {
                    problems.push("plan shows changes after migration".to_string())
                }
                PlanVerdict::Failed { exit_code, detail } => problems.push(format!(
                    "plan failed with exit code {}: {}",
                    exit_code.map_or_else(|| "none".to_string(), |c| c.to_string()),
                    detail
                )),
            }
            Some(verdict)
        }
        Err(e) => {
            problems.push(format!("plan could not run: {}", e));
            None
        }
    };

    let consistent = problems.is_empty();
    if consistent {
        info!("Verification passed: {} resources present", resource_count);
    } else {
        error!("Verification failed: {}", problems.join("; "));
    }

    VerificationResult {
        consistent,
        resource_count,
        expected_resource_count,
        plan,
        lineage_preserved,
        serial_monotonic,
        notices,
        problems,
    }
}
