//! Serializable request and response types.
//!
//! Shared by the HTTP endpoints and the MCP tools. All types implement
//! `Serialize`, `Deserialize` and `JsonSchema`.

use std::fmt;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::audit::AuditEvent;
use super::auth::AuthMethod;
use super::coordinator::ResultBundle;
use super::error::PipelineError;
use super::policy::{PolicyRule, Verdict};

/// One named step of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Validating,
    Connecting,
    Executing,
    Persisting,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validating => "validating",
            Stage::Connecting => "connecting",
            Stage::Executing => "executing",
            Stage::Persisting => "persisting",
            Stage::Done => "done",
        }
    }

    /// The stage a successful transition leads to.
    pub fn next(&self) -> Stage {
        match self {
            Stage::Validating => Stage::Connecting,
            Stage::Connecting => Stage::Executing,
            Stage::Executing => Stage::Persisting,
            Stage::Persisting | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Body of `POST /execute` and arguments of the `fio_execute` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteRequest {
    /// Shell command to validate and run
    pub command: String,
    /// Natural-language request the command was generated from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteResponse {
    pub run_id: String,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    /// Remote directory holding input.json and output.txt
    pub saved_path: String,
    pub auth_method: AuthMethod,
    pub duration_ms: u64,
}

impl From<&ResultBundle> for ExecuteResponse {
    fn from(bundle: &ResultBundle) -> Self {
        Self {
            run_id: bundle.run_id.clone(),
            stdout: String::from_utf8_lossy(&bundle.result.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&bundle.result.stderr).into_owned(),
            exit_code: bundle.result.exit_code,
            saved_path: bundle.saved_path.clone(),
            auth_method: bundle.auth_method,
            duration_ms: bundle.result.duration.as_millis() as u64,
        }
    }
}

/// Error body for a failed run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ErrorResponse {
    pub stage: Stage,
    /// Machine-readable error kind (e.g. "policy_rejection")
    pub error: String,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_path: Option<String>,
    /// Artifacts written before a persist failure
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts_written: Vec<String>,
}

impl From<&PipelineError> for ErrorResponse {
    fn from(error: &PipelineError) -> Self {
        let (rule, detail) = match error {
            PipelineError::PolicyRejection { rule, reason } => (*rule, reason.clone()),
            other => (None, other.to_string()),
        };
        let artifacts_written = match error {
            PipelineError::Persist(e) => e.written().to_vec(),
            _ => Vec::new(),
        };
        Self {
            stage: error.stage(),
            error: error.kind().to_string(),
            detail,
            rule,
            saved_path: error.saved_path().map(str::to_string),
            artifacts_written,
        }
    }
}

/// Body of `POST /validate` and arguments of the `fio_validate` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ValidateRequest {
    pub command: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ValidateResponse {
    pub allowed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<PolicyRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl From<Verdict> for ValidateResponse {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allow => Self {
                allowed: true,
                rule: None,
                reason: None,
            },
            Verdict::Reject { rule, reason } => Self {
                allowed: false,
                rule: Some(rule),
                reason: Some(reason),
            },
        }
    }
}

/// Metadata for one in-flight run.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunInfo {
    pub run_id: String,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub stage: Stage,
    /// RFC3339
    pub started_at: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct RunListResponse {
    pub runs: Vec<RunInfo>,
    pub count: usize,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct CancelResponse {
    pub run_id: String,
    pub cancelled: bool,
    pub message: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct HealthResponse {
    pub status: String,
    pub active_runs: usize,
    /// Whether the shared-secret header is enforced
    pub auth_enabled: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct AuditResponse {
    pub events: Vec<AuditEvent>,
    pub count: usize,
}
