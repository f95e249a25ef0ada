use crate::core::analyzer::{AnalysisReport, HealthStatus};
use crate::core::connectivity::ConnectivityReport;
use crate::core::error::MigrationError;
use crate::hcp::client::HcpError;
use crate::core::verify::{PlanVerdict, VerificationResult};
use colored::Colorize;
use serde_json::{json, Value};
use std::fmt::Write;

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "!".yellow().bold(), msg.yellow());
}

/// Print a stage failure with the stage name.
pub fn print_failure(err: &MigrationError) {
    print_error(&format!("{} failed: {}", err.stage(), err));
}

/// Stage name for any error reaching the top of a binary. Errors raised before
/// a stage runs (config file, binary lookup, working directory) are "setup".
pub fn failure_stage(err: &anyhow::Error) -> &'static str {
    if let Some(stage_err) = err.downcast_ref::<MigrationError>() {
        stage_err.stage()
    } else if err.downcast_ref::<HcpError>().is_some() {
        "hcp"
    } else {
        "setup"
    }
}

pub fn print_anyhow_failure(err: &anyhow::Error) {
    match err.downcast_ref::<MigrationError>() {
        Some(stage_err) => print_failure(stage_err),
        None => print_error(&format!("{} failed: {:#}", failure_stage(err), err)),
    }
}

pub fn print_connectivity(report: &ConnectivityReport) {
    for check in [&report.storage, &report.lock_table] {
        if check.reachable {
            print_success(&format!("{} is reachable", check.resource));
        } else {
            print_error(&format!(
                "{} is unreachable: {}",
                check.resource,
                check.error.as_deref().unwrap_or("unknown error")
            ));
        }
    }
}

pub fn print_verification(result: &VerificationResult) {
    match result.expected_resource_count {
        Some(expected) => println!(
            "  Resources: {} (expected {})",
            result.resource_count, expected
        ),
        None => println!("  Resources: {}", result.resource_count),
    }
    if let Some(plan) = &result.plan {
        let plan_text = match plan {
            PlanVerdict::NoChanges => "no changes".to_string(),
            PlanVerdict::ChangesPresent => "changes present".to_string(),
            PlanVerdict::Failed { exit_code, .. } => format!("failed (exit code {:?})", exit_code),
        };
        println!("  Plan: {}", plan_text);
    }
    if let Some(lineage) = result.lineage_preserved {
        println!("  Lineage preserved: {}", lineage);
    }
    for notice in &result.notices {
        print_warning(notice);
    }
    for problem in &result.problems {
        print_error(problem);
    }
}

/// Analysis report as a JSON document.
pub fn report_json(report: &AnalysisReport) -> Value {
    serde_json::to_value(report).unwrap_or_else(|e| {
        json!({
            "error": format!("failed to serialize report: {}", e)
        })
    })
}

/// A one-field JSON document for when the report itself cannot be rendered.
pub fn json_error(message: &str) -> String {
    json!({ "error": message }).to_string()
}

fn flag_text(flag: Option<bool>) -> &'static str {
    match flag {
        Some(true) => "enabled",
        Some(false) => "disabled",
        None => "unknown",
    }
}

/// Analysis report as human-readable text.
pub fn report_text(report: &AnalysisReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Terraform State Analysis");
    let _ = writeln!(out, "========================");
    let _ = writeln!(out, "Generated: {}", report.generated_at.to_rfc3339());
    if let Some(backend) = &report.backend {
        let _ = writeln!(
            out,
            "Backend: s3://{}/{} ({}, lock table {})",
            backend.bucket, backend.key, backend.region, backend.dynamodb_table
        );
    }

    let _ = writeln!(out);
    match &report.state {
        Some(state) => {
            let _ = writeln!(out, "State");
            let _ = writeln!(
                out,
                "  Version: {}  Terraform: {}",
                state.version,
                state.terraform_version.as_deref().unwrap_or("unknown")
            );
            let _ = writeln!(out, "  Serial: {}  Lineage: {}", state.serial, state.lineage);
            let _ = writeln!(
                out,
                "  Resources: {}  Instances: {}",
                state.total_resources, state.total_instances
            );
        }
        None => {
            let _ = writeln!(out, "State: unavailable");
        }
    }

    if !report.resources_by_type.is_empty() {
        let _ = writeln!(out, "\nResources by type");
        let mut types: Vec<_> = report.resources_by_type.iter().collect();
        types.sort_by(|a, b| b.1.cmp(a.1).then(a.0.cmp(b.0)));
        for (name, count) in types {
            let _ = writeln!(out, "  {:<40} {}", name, count);
        }
        let _ = writeln!(out, "\nProviders: {}", report.providers.join(", "));
        let _ = writeln!(out, "Modules: {}", report.modules.join(", "));
    }

    let _ = writeln!(out, "\nBackend security");
    let _ = writeln!(out, "  Encryption:             {}", flag_text(report.posture.encryption));
    let _ = writeln!(out, "  Versioning:             {}", flag_text(report.posture.versioning));
    let _ = writeln!(
        out,
        "  Public access blocked:  {}",
        flag_text(report.posture.public_access_blocked)
    );
    let _ = writeln!(
        out,
        "  Point-in-time recovery: {}",
        flag_text(report.posture.point_in_time_recovery)
    );

    if !report.active_locks.is_empty() {
        let _ = writeln!(out, "\nActive locks");
        for lock in &report.active_locks {
            let _ = writeln!(
                out,
                "  {} {} by {} since {}",
                lock.id, lock.operation, lock.who, lock.created
            );
        }
    }

    let _ = writeln!(out, "\nHealth checks");
    for check in &report.health_checks {
        let marker = match check.status {
            HealthStatus::Healthy => "✓",
            HealthStatus::Warning => "!",
            HealthStatus::Critical => "✗",
        };
        let _ = writeln!(out, "  {} {}", marker, check.message);
    }

    let _ = writeln!(out, "\nRecommendations");
    if report.recommendations.is_empty() {
        let _ = writeln!(out, "  None");
    }
    for rec in &report.recommendations {
        let _ = writeln!(out, "  - {}", rec);
    }

    if !report.errors.is_empty() {
        let _ = writeln!(out, "\nErrors");
        for err in &report.errors {
            let _ = writeln!(out, "  - {}", err);
        }
    }
    out
}
