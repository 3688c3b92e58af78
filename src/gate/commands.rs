//! MCP tools for the gate.
//!
//! - `fio_validate`: Check a command against the safety policy without running it
//! - `fio_execute`: Validate, run and persist one benchmark command
//! - `fio_recent_audit`: Most recent audit events
//! - `fio_list_runs`: Runs currently in flight

use std::sync::Arc;

use poem_mcpserver::{Tools, tool::StructuredContent};
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::audit::AuditLog;
use super::coordinator::ExecutionCoordinator;
use super::error::PipelineError;
use super::types::{
    AuditResponse, ErrorResponse, ExecuteResponse, RunListResponse, ValidateResponse,
};

const DEFAULT_AUDIT_LIMIT: usize = 20;

/// MCP tool implementation backed by one [`ExecutionCoordinator`].
pub struct FioGateCommands {
    coordinator: ExecutionCoordinator,
    audit: Arc<AuditLog>,
}

impl FioGateCommands {
    pub fn new(coordinator: ExecutionCoordinator, audit: Arc<AuditLog>) -> Self {
        Self { coordinator, audit }
    }
}

/// Tool error text: the JSON error body, so clients see stage and kind.
fn describe_failure(error: &PipelineError) -> String {
    let body = ErrorResponse::from(error);
    serde_json::to_string(&body).unwrap_or_else(|_| format!("{}: {}", body.stage, body.detail))
}

#[Tools]
impl FioGateCommands {
    /// Check a shell command against the benchmark safety policy.
    ///
    /// Never connects to the remote host. Returns whether the command would be
    /// allowed and, if not, which rule rejected it.
    async fn fio_validate(
        &self,
        /// Shell command to check (e.g. "fio --name=randread --rw=randread --runtime=30")
        command: String,
    ) -> StructuredContent<ValidateResponse> {
        StructuredContent(self.coordinator.validate(&command))
    }

    /// Run a benchmark command on the configured remote host.
    ///
    /// The command is validated first; rejected commands never reach the host.
    /// On success the command, the natural-language query and the full output
    /// are saved in a fresh directory on the remote host and its path is returned.
    async fn fio_execute(
        &self,
        /// Shell command to run (e.g. "fio --name=seqwrite --rw=write --size=1G --runtime=60")
        command: String,
        /// Natural-language request that produced the command, stored with the results
        query: Option<String>,
    ) -> Result<StructuredContent<ExecuteResponse>, String> {
        info!("fio_execute: {}", command);
        self.coordinator
            .run(&command, query.as_deref(), CancellationToken::new())
            .await
            .map(|bundle| StructuredContent(ExecuteResponse::from(&bundle)))
            .map_err(|error| describe_failure(&error))
    }

    /// List the most recent audit events, oldest first.
    async fn fio_recent_audit(
        &self,
        /// Maximum number of events to return (default: 20)
        limit: Option<usize>,
    ) -> StructuredContent<AuditResponse> {
        let events = self
            .audit
            .recent(limit.unwrap_or(DEFAULT_AUDIT_LIMIT))
            .await;
        StructuredContent(AuditResponse {
            count: events.len(),
            events,
        })
    }

    /// List runs that are currently in flight and the stage each one is in.
    async fn fio_list_runs(&self) -> StructuredContent<RunListResponse> {
        let runs = self.coordinator.runs().list();
        StructuredContent(RunListResponse {
            count: runs.len(),
            runs,
        })
    }
}
