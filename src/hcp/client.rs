//! Minimal HCP Terraform (Terraform Cloud) API client for workspaces and runs.

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, error, info};

const JSON_API: &str = "application/vnd.api+json";

#[derive(Error, Debug, Clone)]
pub enum HcpError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("JSON parsing failed: {0}")]
    JsonError(String),

    #[error("No API token configured. Set TFE_TOKEN to an HCP Terraform user or team token.")]
    MissingToken,

    #[error("Unauthorized: the API token was rejected")]
    Unauthorized,

    #[error("{0} not found, or the token has no access to it")]
    NotFound(String),

    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },
}

impl From<reqwest::Error> for HcpError {
    fn from(error: reqwest::Error) -> Self {
        HcpError::HttpError(error.to_string())
    }
}

impl From<serde_json::Error> for HcpError {
    fn from(error: serde_json::Error) -> Self {
        HcpError::JsonError(error.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Workspace {
    pub id: String,
    pub name: String,
    pub terraform_version: Option<String>,
    pub working_directory: Option<String>,
    pub execution_mode: Option<String>,
    pub locked: bool,
    pub resource_count: Option<u64>,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Run {
    pub id: String,
    pub status: String,
    pub message: Option<String>,
    pub source: Option<String>,
    pub is_destroy: bool,
    pub created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Resource {
    id: String,
    #[serde(default)]
    attributes: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
struct Document<T> {
    data: T,
    #[serde(default)]
    meta: Option<Value>,
}

/// `meta.pagination.next-page` of a list response, if there is one.
fn next_page(meta: Option<&Value>) -> Option<u64> {
    meta?.pointer("/pagination/next-page")?.as_u64()
}

fn attr_str(attrs: &HashMap<String, Value>, name: &str) -> Option<String> {
    attrs.get(name).and_then(Value::as_str).map(|s| s.to_string())
}

impl From<Resource> for Workspace {
    fn from(r: Resource) -> Self {
        let a = &r.attributes;
        Workspace {
            name: attr_str(a, "name").unwrap_or_default(),
            terraform_version: attr_str(a, "terraform-version"),
            working_directory: attr_str(a, "working-directory").filter(|d| !d.is_empty()),
            execution_mode: attr_str(a, "execution-mode"),
            locked: a.get("locked").and_then(Value::as_bool).unwrap_or(false),
            resource_count: a.get("resource-count").and_then(Value::as_u64),
            created_at: attr_str(a, "created-at"),
            id: r.id,
        }
    }
}

impl From<Resource> for Run {
    fn from(r: Resource) -> Self {
        let a = &r.attributes;
        Run {
            status: attr_str(a, "status").unwrap_or_else(|| "unknown".to_string()),
            message: attr_str(a, "message"),
            source: attr_str(a, "source"),
            is_destroy: a.get("is-destroy").and_then(Value::as_bool).unwrap_or(false),
            created_at: attr_str(a, "created-at"),
            id: r.id,
        }
    }
}

pub fn workspace_payload(
    name: &str,
    terraform_version: Option<&str>,
    working_directory: Option<&str>,
) -> Value {
    let mut attributes = json!({ "name": name });
    if let Some(version) = terraform_version {
        attributes["terraform-version"] = json!(version);
    }
    if let Some(dir) = working_directory {
        attributes["working-directory"] = json!(dir);
    }
    json!({ "data": { "type": "workspaces", "attributes": attributes } })
}

pub fn run_payload(workspace_id: &str, message: &str) -> Value {
    json!({
        "data": {
            "type": "runs",
            "attributes": { "message": message },
            "relationships": {
                "workspace": { "data": { "type": "workspaces", "id": workspace_id } }
            }
        }
    })
}

pub struct HcpClient {
    client: Client,
    base_url: String,
    token: String,
}

impl HcpClient {
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, HcpError> {
        let token = token.filter(|t| !t.is_empty()).ok_or(HcpError::MissingToken)?;
        Ok(Self {
            client: Client::builder()
                .user_agent(concat!("tfbackend/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .bearer_auth(&self.token)
            .header(reqwest::header::CONTENT_TYPE, JSON_API)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        request: RequestBuilder,
        subject: &str,
    ) -> Result<T, HcpError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        debug!("{} response status: {}", subject, status);
        let body = response.text().await?;

        match status {
            s if s.is_success() => Ok(serde_json::from_str(&body)?),
            StatusCode::UNAUTHORIZED => Err(HcpError::Unauthorized),
            StatusCode::NOT_FOUND => Err(HcpError::NotFound(subject.to_string())),
            s => {
                error!("HTTP error {} for {}", s, subject);
                Err(HcpError::Rejected {
                    status: s.as_u16(),
                    detail: error_detail(&body),
                })
            }
        }
    }

    pub async fn list_workspaces(&self, organization: &str) -> Result<Vec<Workspace>, HcpError> {
        let url = format!("{}/organizations/{}/workspaces", self.base_url, organization);
        let mut workspaces = Vec::new();
        let mut page = 1u64;
        loop {
            let doc: Document<Vec<Resource>> = self
                .send(
                    self.client.get(&url).query(&[
                        ("page[size]", "100".to_string()),
                        ("page[number]", page.to_string()),
                    ]),
                    &format!("organization '{}'", organization),
                )
                .await?;
            workspaces.extend(doc.data.into_iter().map(Workspace::from));
            match next_page(doc.meta.as_ref()) {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }
        info!("Found {} workspaces in {}", workspaces.len(), organization);
        Ok(workspaces)
    }

    pub async fn create_workspace(
        &self,
        organization: &str,
        name: &str,
        terraform_version: Option<&str>,
        working_directory: Option<&str>,
    ) -> Result<Workspace, HcpError> {
        let url = format!("{}/organizations/{}/workspaces", self.base_url, organization);
        let body = workspace_payload(name, terraform_version, working_directory);
        let doc: Document<Resource> = self
            .send(
                self.client.post(&url).body(body.to_string()),
                &format!("organization '{}'", organization),
            )
            .await?;
        info!("Created workspace {} ({})", name, doc.data.id);
        Ok(doc.data.into())
    }

    pub async fn list_runs(&self, workspace_id: &str) -> Result<Vec<Run>, HcpError> {
        let url = format!("{}/workspaces/{}/runs", self.base_url, workspace_id);
        let doc: Document<Vec<Resource>> = self
            .send(
                self.client.get(&url),
                &format!("workspace '{}'", workspace_id),
            )
            .await?;
        Ok(doc.data.into_iter().map(Run::from).collect())
    }

    pub async fn create_run(&self, workspace_id: &str, message: &str) -> Result<Run, HcpError> {
        let url = format!("{}/runs", self.base_url);
        let doc: Document<Resource> = self
            .send(
                self.client
                    .post(&url)
                    .body(run_payload(workspace_id, message).to_string()),
                &format!("workspace '{}'", workspace_id),
            )
            .await?;
        info!("Queued run {} on {}", doc.data.id, workspace_id);
        Ok(doc.data.into())
    }
}

/// First JSON:API error detail, or the raw body.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            v.pointer("/errors/0/detail")
                .or_else(|| v.pointer("/errors/0/title"))
                .and_then(Value::as_str)
                .map(|s| s.to_string())
        })
        .unwrap_or_else(|| body.chars().take(200).collect())
}
