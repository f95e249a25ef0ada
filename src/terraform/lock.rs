//! State lock records, as reported by Terraform lock errors and stored in the lock table.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const LOCK_ERROR_MARKER: &str = "Error acquiring the state lock";

static LOCK_FIELD_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^\s*(ID|Path|Operation|Who|Version|Created|Info):[ \t]*(.*?)\s*$")
        .expect("lock field regex is valid")
});

/// A lock held on a state path. Field names follow Terraform's `LockInfo` JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct LockRecord {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Operation", default)]
    pub operation: String,
    #[serde(rename = "Who", default)]
    pub who: String,
    #[serde(rename = "Created", default)]
    pub created: String,
    #[serde(rename = "Path", default)]
    pub path: String,
    #[serde(rename = "Version", default)]
    pub version: String,
    #[serde(rename = "Info", default)]
    pub info: String,
}

impl LockRecord {
    /// Parse the `Info` attribute of a lock table item.
    pub fn from_info_json(json: &str) -> Option<Self> {
        serde_json::from_str(json).ok()
    }

    /// Extract the lock holder from Terraform's "Error acquiring the state lock" output.
    pub fn from_engine_output(output: &str) -> Option<Self> {
        if !is_lock_conflict(output) {
            return None;
        }
        let mut record = LockRecord::default();
        for caps in LOCK_FIELD_RE.captures_iter(output) {
            let value = caps[2].to_string();
            match &caps[1] {
                "ID" => record.id = value,
                "Path" => record.path = value,
                "Operation" => record.operation = value,
                "Who" => record.who = value,
                "Version" => record.version = value,
                "Created" => record.created = value,
                "Info" => record.info = value,
                _ => {}
            }
        }
        Some(record)
    }
}

pub fn is_lock_conflict(output: &str) -> bool {
    output.contains(LOCK_ERROR_MARKER)
}
