mod common;

use common::{state_json, write_backend_config, FakeAws, FakeEngine};
use tfbackend::config::PlanExitContract;
use tfbackend::core::analyzer::run_analysis;
use tfbackend::core::verify::PlanVerdict;
use tfbackend::terraform::backend::BackendDescriptor;
use tfbackend::{BackupStore, MigrationError, MigrationState, Migrator, StateSnapshot};

#[tokio::test]
async fn test_migration_end_to_end() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(5, "abc", 12));
    engine.watch_backups(backups.directory().to_path_buf());
    let aws = FakeAws::default();

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default())
        .with_connectivity_check(&aws, &aws);
    let report = migrator.migrate(&backend_config).await.unwrap();

    assert_eq!(report.state, MigrationState::Verified);
    assert_eq!(migrator.state(), MigrationState::Verified);
    assert_eq!(report.backup.serial, Some(5));
    assert_eq!(report.backup.lineage.as_deref(), Some("abc"));
    assert_eq!(report.verification.resource_count, 12);
    assert_eq!(report.verification.expected_resource_count, Some(12));
    assert_eq!(report.verification.lineage_preserved, Some(true));
    assert_eq!(report.verification.serial_monotonic, Some(true));
    assert!(report.verification.problems.is_empty());
    assert_eq!(report.verification.plan, Some(PlanVerdict::NoChanges));
    assert_eq!(report.target.unwrap().bucket, "new-state");
    assert_eq!(engine.backend_config(), Some(backend_config));

    // The analyzer reads the same state back out of the new bucket.
    let mut aws = FakeAws {
        versioning: Ok(false),
        ..FakeAws::default()
    };
    let descriptor = BackendDescriptor::new("new-state", "app/terraform.tfstate", "us-east-1", "new-locks");
    aws.objects.insert(
        ("new-state".to_string(), "app/terraform.tfstate".to_string()),
        engine.current_state(),
    );
    let analysis = run_analysis(&aws, &aws, &descriptor, None).await;
    assert!(analysis.errors.is_empty(), "{:?}", analysis.errors);
    assert_eq!(analysis.state.unwrap().total_resources, 12);
    assert!(analysis
        .recommendations
        .iter()
        .any(|r| r.to_lowercase().contains("versioning")));
}

#[tokio::test]
async fn test_backup_exists_before_init() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 2));
    engine.watch_backups(backups.directory().to_path_buf());

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    migrator.migrate(&backend_config).await.unwrap();

    assert_eq!(engine.backup_present_at_init(), Some(true));
    let calls = engine.calls();
    let pull = calls.iter().position(|c| c == "pull").unwrap();
    let init = calls.iter().position(|c| c.starts_with("init")).unwrap();
    assert!(pull < init);
}

#[tokio::test]
async fn test_failed_backup_blocks_migration() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let mut engine = FakeEngine::with_state(&state_json(3, "lin", 2));
    engine.fail_pull = true;

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    assert!(matches!(err, MigrationError::Io(_)));
    assert_eq!(migrator.state(), MigrationState::Idle);
    assert!(!engine.called("init"));
    assert!(backups.list().unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_state_is_not_backed_up() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state("");

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    assert!(matches!(err, MigrationError::Io(_)));
    assert!(!engine.called("init"));
}

#[tokio::test]
async fn test_incomplete_config_stays_backed_up() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = workdir.path().join("backend.hcl");
    std::fs::write(&backend_config, "bucket = \"b\"\nregion = \"us-east-1\"\n").unwrap();
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 2));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    match err {
        MigrationError::Config { missing } => {
            assert_eq!(missing, vec!["key".to_string(), "dynamodb_table".to_string()]);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(migrator.state(), MigrationState::BackedUp);
    assert!(migrator.backup().is_some());
    assert!(!engine.called("init"));
}

#[tokio::test]
async fn test_missing_config_file() {
    let workdir = tempfile::tempdir().unwrap();
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 2));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator
        .migrate(&workdir.path().join("absent.hcl"))
        .await
        .unwrap_err();

    assert!(matches!(err, MigrationError::ConfigFile { .. }));
    assert_eq!(err.stage(), "validation");
    assert_eq!(migrator.state(), MigrationState::BackedUp);
}

#[tokio::test]
async fn test_unreachable_lock_table_blocks_migration() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 2));
    let aws = FakeAws {
        table_exists: false,
        ..FakeAws::default()
    };

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default())
        .with_connectivity_check(&aws, &aws);
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    match err {
        MigrationError::Connectivity { resource, .. } => assert!(resource.contains("new-locks")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(migrator.state(), MigrationState::BackedUp);
    assert!(!engine.called("init"));
}

#[tokio::test]
async fn test_init_failure_is_failed_without_restore() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let mut engine = FakeEngine::with_state(&state_json(3, "lin", 2));
    engine.fail_init = true;

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    assert!(matches!(err, MigrationError::Engine(_)));
    assert_eq!(migrator.state(), MigrationState::Failed);
    assert!(!engine.called("push"));
    assert_eq!(backups.list().unwrap().len(), 1);
}

#[tokio::test]
async fn test_plan_with_changes_is_consistent_with_notice() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 4));
    engine.set_plan_exit_code(Some(2));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let report = migrator.migrate(&backend_config).await.unwrap();

    assert_eq!(report.state, MigrationState::Verified);
    assert_eq!(report.verification.plan, Some(PlanVerdict::ChangesPresent));
    assert_eq!(report.verification.notices.len(), 1);
    assert!(engine.calls().contains(&"plan -detailed-exitcode".to_string()));
}

#[tokio::test]
async fn test_plan_with_changes_can_be_strict() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 4));
    engine.set_plan_exit_code(Some(2));
    let contract = PlanExitContract {
        changes_are_consistent: false,
        ..PlanExitContract::default()
    };

    let mut migrator = Migrator::new(&engine, &backups, contract);
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    assert!(matches!(err, MigrationError::Verification(_)));
    assert_eq!(migrator.state(), MigrationState::Failed);
}

#[tokio::test]
async fn test_plan_error_is_inconsistent() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 4));
    engine.set_plan_exit_code(Some(1));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    match err {
        MigrationError::Verification(detail) => assert!(detail.contains("exit code 1")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(migrator.state(), MigrationState::Failed);
    let verification = migrator.verification().unwrap();
    assert!(!verification.consistent);
    assert!(matches!(
        verification.plan,
        Some(PlanVerdict::Failed {
            exit_code: Some(1),
            ..
        })
    ));
}

#[tokio::test]
async fn test_killed_plan_is_inconsistent() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(3, "lin", 4));
    engine.set_plan_exit_code(None);

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    assert!(migrator.migrate(&backend_config).await.is_err());
    assert_eq!(migrator.state(), MigrationState::Failed);
}

#[tokio::test]
async fn test_lineage_change_fails_verification() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let mut engine = FakeEngine::with_state(&state_json(5, "abc", 3));
    engine.state_after_init = Some(state_json(6, "other", 3).into_bytes());

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    match err {
        MigrationError::Verification(detail) => assert!(detail.contains("lineage")),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(migrator.state(), MigrationState::Failed);
    assert_eq!(migrator.verification().unwrap().lineage_preserved, Some(false));
    // No automatic rollback.
    assert!(!engine.called("push"));
}

#[tokio::test]
async fn test_serial_regression_fails_verification() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let mut engine = FakeEngine::with_state(&state_json(5, "abc", 3));
    engine.state_after_init = Some(state_json(4, "abc", 3).into_bytes());

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    assert!(migrator.migrate(&backend_config).await.is_err());
    assert_eq!(migrator.verification().unwrap().serial_monotonic, Some(false));
}

#[tokio::test]
async fn test_lost_resources_fail_verification() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let mut engine = FakeEngine::with_state(&state_json(5, "abc", 12));
    engine.state_after_init = Some(state_json(5, "abc", 11).into_bytes());

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate(&backend_config).await.unwrap_err();

    match err {
        MigrationError::Verification(detail) => {
            assert!(detail.contains("expected 12 resources, found 11"))
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_migrator_runs_once() {
    let workdir = tempfile::tempdir().unwrap();
    let backend_config = write_backend_config(workdir.path());
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(1, "lin", 1));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    migrator.migrate(&backend_config).await.unwrap();
    let err = migrator.migrate(&backend_config).await.unwrap_err();
    assert!(matches!(err, MigrationError::Usage(_)));
}

#[tokio::test]
async fn test_migrate_workspace_into_new_workspace() {
    let workdir = tempfile::tempdir().unwrap();
    let backups = BackupStore::new(workdir.path().join("backups"));
    let source = state_json(9, "ws-lineage", 3);
    let engine = FakeEngine::with_state(&source);

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let report = migrator.migrate_workspace("default", "staging").await.unwrap();

    assert_eq!(report.state, MigrationState::Verified);
    assert!(report.target.is_none());
    assert_eq!(engine.current_workspace(), "staging");
    assert_eq!(engine.workspace_state("staging").unwrap(), source.as_bytes());
    assert!(engine.calls().contains(&"workspace new staging".to_string()));
    assert!(engine.calls().contains(&"push force=false".to_string()));
    let copied = StateSnapshot::from_bytes(&engine.current_state()).unwrap();
    assert_eq!(copied.lineage, "ws-lineage");
}

#[tokio::test]
async fn test_migrate_workspace_refuses_foreign_lineage() {
    let workdir = tempfile::tempdir().unwrap();
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(9, "ws-lineage", 3));
    let foreign = state_json(2, "someone-else", 1);
    engine.add_workspace("prod", foreign.as_bytes());

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator.migrate_workspace("default", "prod").await.unwrap_err();

    assert!(matches!(err, MigrationError::Verification(_)));
    assert!(!engine.called("push"));
    assert_eq!(engine.workspace_state("prod").unwrap(), foreign.as_bytes());
}

#[tokio::test]
async fn test_migrate_workspace_rejects_bad_names() {
    let workdir = tempfile::tempdir().unwrap();
    let backups = BackupStore::new(workdir.path().join("backups"));
    let engine = FakeEngine::with_state(&state_json(1, "lin", 1));

    let mut migrator = Migrator::new(&engine, &backups, PlanExitContract::default());
    let err = migrator
        .migrate_workspace("default", "bad name;rm")
        .await
        .unwrap_err();
    assert!(matches!(err, MigrationError::Usage(_)));
    assert!(engine.calls().is_empty());
}
