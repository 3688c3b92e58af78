//! Error taxonomy for the execution pipeline.
//!
//! Each pipeline stage has its own error type; [`PipelineError`] wraps them
//! and always knows which [`Stage`] failed. Two outcomes are deliberately NOT
//! errors at this level:
//!
//! - A command that ran and exited non-zero is a successful
//!   [`ExecutionResult`](crate::gate::session::ExecutionResult).
//! - A policy rejection is an ordinary
//!   [`Verdict`](crate::gate::policy::Verdict) from the validator; it only
//!   becomes [`PipelineError::PolicyRejection`] once the coordinator ends the
//!   run with it.

use std::time::Duration;

use thiserror::Error;

use super::auth::AuthMethod;
use super::policy::PolicyRule;
use super::types::Stage;

/// Missing or unusable configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
    #[error("no SSH credential configured: set SSH_PASSWORD or SSH_KEY_PATH")]
    NoCredentials,
}

/// Failure to obtain an authenticated session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("invalid address: {0}")]
    Address(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("failed to connect: {0}")]
    Transport(String),
    #[error("no authentication strategies configured")]
    NoCredentials,
    /// Every strategy failed; carries the last one's failure only.
    #[error("{method} authentication failed: {detail}")]
    Authentication { method: AuthMethod, detail: String },
}

/// Failure to run a command over an established session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecError {
    #[error("failed to open channel: {0}")]
    Channel(String),
    #[error("failed to start command: {0}")]
    Start(String),
    #[error("failed to send input: {0}")]
    Input(String),
    #[error("command timed out after {0:?}")]
    Timeout(Duration),
    #[error("command output exceeded {0} bytes")]
    OutputLimit(usize),
    #[error("session is no longer usable")]
    SessionUnusable,
}

impl ExecError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ExecError::Timeout(_))
    }
}

/// One artifact that could not be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFailure {
    pub artifact: String,
    pub detail: String,
}

/// Failure to store a result bundle remotely.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistError {
    /// Nothing was written.
    #[error("failed to create result directory under {base}: {detail}")]
    Directory { base: String, detail: String },
    /// The directory exists; `written` lists the artifacts that made it.
    #[error("failed to write {} in {dir}", describe_failures(.failed))]
    Artifacts {
        dir: String,
        written: Vec<String>,
        failed: Vec<ArtifactFailure>,
    },
}

impl PersistError {
    /// Directory created before the failure, if any.
    pub fn saved_dir(&self) -> Option<&str> {
        match self {
            PersistError::Directory { .. } => None,
            PersistError::Artifacts { dir, .. } => Some(dir),
        }
    }

    /// Artifacts that were written before the failure.
    pub fn written(&self) -> &[String] {
        match self {
            PersistError::Directory { .. } => &[],
            PersistError::Artifacts { written, .. } => written,
        }
    }
}

fn describe_failures(failed: &[ArtifactFailure]) -> String {
    failed
        .iter()
        .map(|f| format!("{} ({})", f.artifact, f.detail))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Terminal error of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    /// `rule` is `None` when the command could not even be tokenized.
    #[error("policy rejected command: {reason}")]
    PolicyRejection { rule: Option<PolicyRule>, reason: String },
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("connection failed: {0}")]
    Connection(#[from] ConnectError),
    /// `saved_path` points at the failure record, when one could be written.
    #[error("execution failed: {error}")]
    Execution {
        #[source]
        error: ExecError,
        saved_path: Option<String>,
    },
    #[error("persisting results failed: {0}")]
    Persist(#[from] PersistError),
    #[error("run cancelled while {0}")]
    Cancelled(Stage),
}

impl PipelineError {
    /// The stage the run failed in.
    pub fn stage(&self) -> Stage {
        match self {
            PipelineError::PolicyRejection { .. } => Stage::Validating,
            PipelineError::Configuration(_) | PipelineError::Connection(_) => Stage::Connecting,
            PipelineError::Execution { .. } => Stage::Executing,
            PipelineError::Persist(_) => Stage::Persisting,
            PipelineError::Cancelled(stage) => *stage,
        }
    }

    /// Short machine-readable kind.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::PolicyRejection { .. } => "policy_rejection",
            PipelineError::Configuration(_) => "configuration_error",
            PipelineError::Connection(_) => "connection_error",
            PipelineError::Execution { .. } => "execution_error",
            PipelineError::Persist(_) => "persist_error",
            PipelineError::Cancelled(_) => "cancelled",
        }
    }

    /// Remote directory that holds whatever was saved for this run.
    pub fn saved_path(&self) -> Option<&str> {
        match self {
            PipelineError::Execution { saved_path, .. } => saved_path.as_deref(),
            PipelineError::Persist(e) => e.saved_dir(),
            _ => None,
        }
    }
}
