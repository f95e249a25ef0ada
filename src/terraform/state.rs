//! Schema for the persisted Terraform state document.
//!
//! Only the fields this tool reasons about are typed. Everything else is kept
//! in `extra` so a parsed snapshot never loses information, but the document
//! bytes are still what gets backed up and pushed.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StateError {
    #[error("State document is empty")]
    Empty,

    #[error("Invalid state document: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// A full state snapshot as produced by `terraform state pull`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    pub version: u64,
    #[serde(default)]
    pub terraform_version: Option<String>,
    pub serial: u64,
    pub lineage: String,
    #[serde(default)]
    pub resources: Vec<StateResource>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

/// One resource block in the state, possibly with several instances.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: String,
    pub name: String,
    pub provider: String,
    #[serde(default)]
    pub instances: Vec<StateInstance>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateInstance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index_key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attributes: Option<Value>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

impl StateSnapshot {
    pub fn parse(content: &str) -> Result<Self, StateError> {
        if content.trim().is_empty() {
            return Err(StateError::Empty);
        }
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_bytes(content: &[u8]) -> Result<Self, StateError> {
        if content.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(StateError::Empty);
        }
        Ok(serde_json::from_slice(content)?)
    }

    /// Addresses of every materialized instance, in the form `terraform state list` prints.
    pub fn instance_addresses(&self) -> Vec<String> {
        let mut addresses = Vec::new();
        for resource in &self.resources {
            let base = resource.address();
            match resource.instances.len() {
                0 => {}
                1 if resource.instances[0].index_key.is_none() => addresses.push(base),
                _ => {
                    for (idx, instance) in resource.instances.iter().enumerate() {
                        let key = match &instance.index_key {
                            Some(Value::String(s)) => format!("\"{}\"", s),
                            Some(other) => other.to_string(),
                            None => idx.to_string(),
                        };
                        addresses.push(format!("{}[{}]", base, key));
                    }
                }
            }
        }
        addresses
    }

    pub fn instance_count(&self) -> usize {
        self.instance_addresses().len()
    }

    pub fn shares_lineage_with(&self, other: &StateSnapshot) -> bool {
        self.lineage == other.lineage
    }
}

impl StateResource {
    pub fn is_data_source(&self) -> bool {
        self.mode.as_deref() == Some("data")
    }

    pub fn address(&self) -> String {
        let local = if self.is_data_source() {
            format!("data.{}.{}", self.resource_type, self.name)
        } else {
            format!("{}.{}", self.resource_type, self.name)
        };
        match &self.module {
            Some(m) if !m.is_empty() => format!("{}.{}", m, local),
            _ => local,
        }
    }

    /// Short provider name, e.g. `aws` for `provider["registry.terraform.io/hashicorp/aws"]`.
    pub fn provider_name(&self) -> String {
        short_provider_name(&self.provider)
    }

    /// Module path, or `root` for resources declared in the root module.
    pub fn module_path(&self) -> &str {
        match &self.module {
            Some(m) if !m.is_empty() => m,
            _ => "root",
        }
    }
}

pub fn short_provider_name(provider: &str) -> String {
    if provider.contains('/') {
        provider
            .rsplit('/')
            .next()
            .unwrap_or(provider)
            .trim_end_matches(']')
            .trim_end_matches('"')
            .to_string()
    } else {
        provider.to_string()
    }
}
