//! The validate -> connect -> execute -> persist pipeline.
//!
//! [`ExecutionCoordinator::run`] drives one run through
//! `Validating -> Connecting -> Executing -> Persisting -> Done`. Every
//! transition out of a stage, successful or not, emits exactly one
//! [`AuditEvent`](super::audit::AuditEvent) naming the stage being left.
//!
//! Rules that hold for every run:
//!
//! - The command is validated on every run, before any network activity.
//! - No stage is retried.
//! - The run's session is closed on every path, and never shared.
//! - Cancellation is honoured while connecting and executing.
//! - If execution fails, the session is discarded and a fresh one is opened
//!   to store a failure record on a best-effort basis.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use super::audit::{AuditEvent, AuditSink, Outcome};
use super::auth::{AuthChain, AuthMethod};
use super::client::SshConnector;
use super::command::Command;
use super::config::{GateConfig, SshConfig};
use super::error::{ConfigError, ExecError, PipelineError};
use super::persist::ResultPersister;
use super::policy::{self, PolicyConfig, Verdict};
use super::session::{Connector, ExecutionResult};
use super::storage::{ActiveRun, DashMapRunStorage, RunGuard, RunStorage};
use super::types::{RunInfo, Stage, ValidateResponse};

/// Everything a successful run produced. Persisted once, never updated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultBundle {
    pub run_id: String,
    pub query: Option<String>,
    pub command: String,
    pub result: ExecutionResult,
    /// Remote absolute path of the bundle directory
    pub saved_path: String,
    pub auth_method: AuthMethod,
}

/// Runs commands through the full pipeline.
pub struct ExecutionCoordinator {
    ssh: SshConfig,
    policy: PolicyConfig,
    command_timeout: Duration,
    connector: Arc<dyn Connector>,
    persister: ResultPersister,
    audit: Arc<dyn AuditSink>,
    runs: Arc<dyn RunStorage>,
}

impl ExecutionCoordinator {
    pub fn new(
        config: &GateConfig,
        connector: Arc<dyn Connector>,
        audit: Arc<dyn AuditSink>,
        runs: Arc<dyn RunStorage>,
    ) -> Self {
        Self {
            ssh: config.ssh.clone(),
            policy: config.policy.clone(),
            command_timeout: config.ssh.command_timeout,
            connector,
            persister: ResultPersister::new(config.persist.clone()),
            audit,
            runs,
        }
    }

    /// Coordinator backed by russh and an in-memory run registry.
    pub fn from_config(config: &GateConfig, audit: Arc<dyn AuditSink>) -> Self {
        Self::new(
            config,
            Arc::new(SshConnector::new(config.ssh.clone())),
            audit,
            Arc::new(DashMapRunStorage::new()),
        )
    }

    pub fn policy(&self) -> &PolicyConfig {
        &self.policy
    }

    pub fn runs(&self) -> &Arc<dyn RunStorage> {
        &self.runs
    }

    /// Validate without running. Never touches the network.
    pub fn validate(&self, raw: &str) -> ValidateResponse {
        match self.check(raw) {
            Ok(_) => ValidateResponse::from(Verdict::Allow),
            Err(PipelineError::PolicyRejection { rule, reason }) => ValidateResponse {
                allowed: false,
                rule,
                reason: Some(reason),
            },
            Err(other) => ValidateResponse {
                allowed: false,
                rule: None,
                reason: Some(other.to_string()),
            },
        }
    }

    fn check(&self, raw: &str) -> Result<Command, PipelineError> {
        let command = Command::parse(raw).map_err(|e| PipelineError::PolicyRejection {
            rule: None,
            reason: format!("malformed command: {}", e),
        })?;
        match policy::validate(&command, &self.policy) {
            Verdict::Allow => Ok(command),
            Verdict::Reject { rule, reason } => Err(PipelineError::PolicyRejection {
                rule: Some(rule),
                reason,
            }),
        }
    }

    /// Run one command end to end.
    pub async fn run(
        &self,
        command: &str,
        query: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<ResultBundle, PipelineError> {
        let run_id = Uuid::new_v4().to_string();
        let mut guard = RunGuard::register(
            self.runs.clone(),
            ActiveRun {
                info: RunInfo {
                    run_id: run_id.clone(),
                    command: command.to_string(),
                    query: query.map(str::to_string),
                    stage: Stage::Validating,
                    started_at: Utc::now().to_rfc3339(),
                },
                cancel: cancel.clone(),
            },
        );
        info!(run_id = %run_id, "Run started: {}", command);

        // Validating
        let parsed = match self.check(command) {
            Ok(parsed) => parsed,
            Err(error) => {
                let detail = match &error {
                    PipelineError::PolicyRejection { reason, .. } => reason.clone(),
                    other => other.to_string(),
                };
                warn!(run_id = %run_id, "Command rejected: {}", detail);
                self.emit(&run_id, Stage::Validating, Outcome::Rejected, detail)
                    .await;
                return Err(error);
            }
        };
        self.emit(&run_id, Stage::Validating, Outcome::Passed, "command allowed")
            .await;

        // Connecting
        guard.advance();
        let chain = AuthChain::resolve(&self.ssh);
        if chain.is_empty() {
            return Err(self
                .fail(&run_id, ConfigError::NoCredentials.into())
                .await);
        }
        let connected = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            connected = self.connector.connect(&chain) => Some(connected),
        };
        let mut session = match connected {
            Some(Ok(session)) => session,
            Some(Err(error)) => return Err(self.fail(&run_id, error.into()).await),
            None => return Err(self.cancelled(&run_id, Stage::Connecting).await),
        };
        let auth_method = session.auth_method();
        self.emit(
            &run_id,
            Stage::Connecting,
            Outcome::Passed,
            format!("authenticated with {}", auth_method),
        )
        .await;

        // Executing
        guard.advance();
        let executed = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            executed = session.exec(parsed.as_str(), None, self.command_timeout) => Some(executed),
        };
        let result = match executed {
            Some(Ok(result)) => result,
            Some(Err(error)) => {
                // The session may be wedged; never reuse it.
                session.close().await;
                let saved_path = self.record_failure(&chain, query, command, &error).await;
                return Err(self
                    .fail(&run_id, PipelineError::Execution { error, saved_path })
                    .await);
            }
            None => {
                session.close().await;
                return Err(self.cancelled(&run_id, Stage::Executing).await);
            }
        };
        self.emit(
            &run_id,
            Stage::Executing,
            Outcome::Passed,
            format!(
                "exit code {} after {} ms",
                result.exit_code,
                result.duration.as_millis()
            ),
        )
        .await;

        // Persisting
        guard.advance();
        let saved = self
            .persister
            .save(session.as_mut(), query, command, &result)
            .await;
        session.close().await;
        let saved_path = match saved {
            Ok(path) => path,
            Err(error) => return Err(self.fail(&run_id, error.into()).await),
        };
        self.emit(&run_id, Stage::Persisting, Outcome::Passed, saved_path.clone())
            .await;

        guard.advance();
        info!(
            run_id = %run_id,
            "Run finished with exit code {}; results in {}",
            result.exit_code,
            saved_path
        );

        Ok(ResultBundle {
            run_id,
            query: query.map(str::to_string),
            command: command.to_string(),
            result,
            saved_path,
            auth_method,
        })
    }

    /// Store a failure record over a fresh session. Never fails the caller.
    async fn record_failure(
        &self,
        chain: &AuthChain,
        query: Option<&str>,
        command: &str,
        error: &ExecError,
    ) -> Option<String> {
        let mut session = match self.connector.connect(chain).await {
            Ok(session) => session,
            Err(e) => {
                warn!("Could not reconnect to store failure record: {}", e);
                return None;
            }
        };
        let saved = self
            .persister
            .save_failure(session.as_mut(), query, command, error)
            .await;
        session.close().await;
        match saved {
            Ok(path) => Some(path),
            Err(e) => {
                warn!("Could not store failure record: {}", e);
                e.saved_dir().map(str::to_string)
            }
        }
    }

    async fn fail(&self, run_id: &str, error: PipelineError) -> PipelineError {
        let stage = error.stage();
        warn!(run_id = %run_id, "Run failed while {}: {}", stage, error);
        self.emit(run_id, stage, Outcome::Failed, error.to_string())
            .await;
        error
    }

    async fn cancelled(&self, run_id: &str, stage: Stage) -> PipelineError {
        warn!(run_id = %run_id, "Run cancelled while {}", stage);
        self.emit(run_id, stage, Outcome::Cancelled, "cancelled by request")
            .await;
        PipelineError::Cancelled(stage)
    }

    async fn emit(&self, run_id: &str, stage: Stage, outcome: Outcome, detail: impl Into<String>) {
        self.audit
            .record(AuditEvent::new(run_id, stage, outcome, detail))
            .await;
    }
}
