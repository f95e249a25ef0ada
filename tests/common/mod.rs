// In-memory collaborators shared by the integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tfbackend::aws::cli::{LockTable, ObjectStore, RemoteError, RemoteResult};
use tfbackend::core::error::{MigrationError, Result};
use tfbackend::terraform::engine::{InitOptions, PlanOutput, StateEngine};
use tfbackend::terraform::lock::LockRecord;
use tfbackend::StateSnapshot;

/// A state document with `count` single-instance resources.
pub fn state_json(serial: u64, lineage: &str, count: usize) -> String {
    let resources: Vec<_> = (0..count)
        .map(|i| {
            json!({
                "mode": "managed",
                "type": if i % 2 == 0 { "aws_instance" } else { "aws_s3_bucket" },
                "name": format!("r{}", i),
                "provider": "provider[\"registry.terraform.io/hashicorp/aws\"]",
                "instances": [{"schema_version": 0, "attributes": {"id": format!("id-{}", i)}}]
            })
        })
        .collect();
    serde_json::to_string_pretty(&json!({
        "version": 4,
        "terraform_version": "1.6.2",
        "serial": serial,
        "lineage": lineage,
        "outputs": {},
        "resources": resources,
        "check_results": null
    }))
    .unwrap()
}

#[derive(Default)]
struct EngineState {
    calls: Vec<String>,
    workspaces: BTreeMap<String, Vec<u8>>,
    current: String,
    backend_config: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    backup_present_at_init: Option<bool>,
}

/// Fake terraform: one state document per workspace, call log, scripted failures.
pub struct FakeEngine {
    state: Mutex<EngineState>,
    pub plan_exit_code: Mutex<Option<i32>>,
    pub fail_pull: bool,
    pub fail_init: bool,
    pub push_locked_by: Option<String>,
    /// Replaces the state during `init -migrate-state`, to simulate a bad copy.
    pub state_after_init: Option<Vec<u8>>,
}

impl FakeEngine {
    pub fn with_state(state: &str) -> Self {
        let mut workspaces = BTreeMap::new();
        workspaces.insert("default".to_string(), state.as_bytes().to_vec());
        Self {
            state: Mutex::new(EngineState {
                workspaces,
                current: "default".to_string(),
                ..EngineState::default()
            }),
            plan_exit_code: Mutex::new(Some(0)),
            fail_pull: false,
            fail_init: false,
            push_locked_by: None,
            state_after_init: None,
        }
    }

    /// Record whether the backup directory holds a non-empty file when init runs.
    pub fn watch_backups(&self, dir: PathBuf) {
        self.state.lock().unwrap().backup_dir = Some(dir);
    }

    pub fn set_plan_exit_code(&self, code: Option<i32>) {
        *self.plan_exit_code.lock().unwrap() = code;
    }

    pub fn add_workspace(&self, name: &str, state: &[u8]) {
        self.state
            .lock()
            .unwrap()
            .workspaces
            .insert(name.to_string(), state.to_vec());
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn called(&self, name: &str) -> bool {
        self.calls().iter().any(|c| c.starts_with(name))
    }

    pub fn current_state(&self) -> Vec<u8> {
        let state = self.state.lock().unwrap();
        state
            .workspaces
            .get(&state.current)
            .cloned()
            .unwrap_or_default()
    }

    pub fn workspace_state(&self, name: &str) -> Option<Vec<u8>> {
        self.state.lock().unwrap().workspaces.get(name).cloned()
    }

    pub fn current_workspace(&self) -> String {
        self.state.lock().unwrap().current.clone()
    }

    pub fn backup_present_at_init(&self) -> Option<bool> {
        self.state.lock().unwrap().backup_present_at_init
    }

    pub fn backend_config(&self) -> Option<PathBuf> {
        self.state.lock().unwrap().backend_config.clone()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl StateEngine for FakeEngine {
    async fn init(&self, options: &InitOptions) -> Result<String> {
        self.record(format!("init migrate_state={}", options.migrate_state));
        let mut state = self.state.lock().unwrap();
        let present = state.backup_dir.as_ref().map(|dir| {
            std::fs::read_dir(dir)
                .map(|entries| {
                    entries
                        .flatten()
                        .any(|e| e.metadata().map(|m| m.len() > 0).unwrap_or(false))
                })
                .unwrap_or(false)
        });
        state.backup_present_at_init = present;
        if self.fail_init {
            return Err(MigrationError::Engine("init failed half-way".to_string()));
        }
        state.backend_config = options.backend_config.clone();
        if let Some(replacement) = &self.state_after_init {
            let current = state.current.clone();
            state.workspaces.insert(current, replacement.clone());
        }
        Ok("Successfully configured the backend \"s3\"!".to_string())
    }

    async fn plan(&self, extra_flag: Option<&str>) -> Result<PlanOutput> {
        self.record(format!("plan {}", extra_flag.unwrap_or("")));
        let code = *self.plan_exit_code.lock().unwrap();
        Ok(PlanOutput {
            exit_code: code,
            stdout: String::new(),
            stderr: if code == Some(0) || code == Some(2) {
                String::new()
            } else {
                "Error: provider crashed".to_string()
            },
        })
    }

    async fn pull(&self) -> Result<Vec<u8>> {
        self.record("pull".to_string());
        if self.fail_pull {
            return Err(MigrationError::Io("backend unreachable".to_string()));
        }
        Ok(self.current_state())
    }

    async fn push(&self, bytes: &[u8], force: bool) -> Result<()> {
        self.record(format!("push force={}", force));
        if let Some(holder) = &self.push_locked_by {
            return Err(MigrationError::LockConflict {
                lock_id: "lock-1".to_string(),
                holder: holder.clone(),
            });
        }
        let mut state = self.state.lock().unwrap();
        let current = state.current.clone();
        state.workspaces.insert(current, bytes.to_vec());
        Ok(())
    }

    async fn force_unlock(&self, lock_id: &str) -> Result<()> {
        self.record(format!("force-unlock {}", lock_id));
        Ok(())
    }

    async fn state_list(&self) -> Result<Vec<String>> {
        self.record("state list".to_string());
        let bytes = self.current_state();
        if bytes.is_empty() {
            return Ok(Vec::new());
        }
        Ok(StateSnapshot::from_bytes(&bytes)?.instance_addresses())
    }

    async fn workspace_select(&self, name: &str) -> Result<()> {
        self.record(format!("workspace select {}", name));
        let mut state = self.state.lock().unwrap();
        if !state.workspaces.contains_key(name) {
            return Err(MigrationError::Usage(format!(
                "Workspace '{}' does not exist",
                name
            )));
        }
        state.current = name.to_string();
        Ok(())
    }

    async fn workspace_new(&self, name: &str) -> Result<()> {
        self.record(format!("workspace new {}", name));
        let mut state = self.state.lock().unwrap();
        state.workspaces.insert(name.to_string(), Vec::new());
        state.current = name.to_string();
        Ok(())
    }
}

/// Fake S3 + DynamoDB.
pub struct FakeAws {
    pub bucket_exists: bool,
    pub table_exists: bool,
    pub objects: BTreeMap<(String, String), Vec<u8>>,
    pub versioning: RemoteResult<bool>,
    pub encryption: RemoteResult<bool>,
    pub public_access_blocked: RemoteResult<bool>,
    pub point_in_time_recovery: RemoteResult<bool>,
    pub locks: Vec<LockRecord>,
}

impl Default for FakeAws {
    fn default() -> Self {
        Self {
            bucket_exists: true,
            table_exists: true,
            objects: BTreeMap::new(),
            versioning: Ok(true),
            encryption: Ok(true),
            public_access_blocked: Ok(true),
            point_in_time_recovery: Ok(true),
            locks: Vec::new(),
        }
    }
}

#[async_trait]
impl ObjectStore for FakeAws {
    async fn bucket_exists(&self, bucket: &str) -> RemoteResult<()> {
        if self.bucket_exists {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("S3 bucket '{}'", bucket)))
        }
    }

    async fn get_object(&self, bucket: &str, key: &str) -> RemoteResult<Vec<u8>> {
        self.objects
            .get(&(bucket.to_string(), key.to_string()))
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(format!("s3://{}/{}", bucket, key)))
    }

    async fn versioning_enabled(&self, _bucket: &str) -> RemoteResult<bool> {
        self.versioning.clone()
    }

    async fn encryption_enabled(&self, _bucket: &str) -> RemoteResult<bool> {
        self.encryption.clone()
    }

    async fn public_access_blocked(&self, _bucket: &str) -> RemoteResult<bool> {
        self.public_access_blocked.clone()
    }
}

#[async_trait]
impl LockTable for FakeAws {
    async fn table_exists(&self, table: &str) -> RemoteResult<()> {
        if self.table_exists {
            Ok(())
        } else {
            Err(RemoteError::NotFound(format!("DynamoDB table '{}'", table)))
        }
    }

    async fn point_in_time_recovery_enabled(&self, _table: &str) -> RemoteResult<bool> {
        self.point_in_time_recovery.clone()
    }

    async fn list_locks(&self, _table: &str) -> RemoteResult<Vec<LockRecord>> {
        Ok(self.locks.clone())
    }
}

/// Write a complete backend config file into `dir`.
pub fn write_backend_config(dir: &std::path::Path) -> PathBuf {
    let path = dir.join("backend.hcl");
    std::fs::write(
        &path,
        "bucket = \"new-state\"\nkey = \"app/terraform.tfstate\"\nregion = \"us-east-1\"\ndynamodb_table = \"new-locks\"\nencrypt = true\n",
    )
    .unwrap();
    path
}
