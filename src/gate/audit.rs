//! Audit events and the audit log sink.
//!
//! The coordinator emits one [`AuditEvent`] per stage transition. The
//! [`AuditLog`] keeps a bounded ring of recent events in memory, mirrors each
//! one to `tracing` on the `audit` target, and optionally appends it as a JSON
//! line to a file. Events are never modified once recorded.

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::types::Stage;

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Rejected,
    Failed,
    Cancelled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Passed => "passed",
            Outcome::Rejected => "rejected",
            Outcome::Failed => "failed",
            Outcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One stage transition of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct AuditEvent {
    /// RFC3339, UTC
    #[schemars(with = "String")]
    pub timestamp: DateTime<Utc>,
    pub run_id: String,
    /// The stage being left
    pub stage: Stage,
    pub outcome: Outcome,
    pub detail: String,
}

impl AuditEvent {
    pub fn new(
        run_id: impl Into<String>,
        stage: Stage,
        outcome: Outcome,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            run_id: run_id.into(),
            stage,
            outcome,
            detail: detail.into(),
        }
    }
}

/// Destination for audit events.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event. Sinks must not fail the run; problems are logged.
    async fn record(&self, event: AuditEvent);
}

/// In-memory ring plus optional JSON-lines file.
#[derive(Debug)]
pub struct AuditLog {
    events: Mutex<VecDeque<AuditEvent>>,
    capacity: usize,
    file: Option<PathBuf>,
}

impl AuditLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
            file: None,
        }
    }

    /// Ring sized by `config`, mirrored to its audit file if one is set.
    pub fn from_config(config: &ServerConfig) -> Self {
        let log = Self::new(config.audit_capacity);
        match &config.audit_log_path {
            Some(path) => log.with_file(path),
            None => log,
        }
    }

    /// Also append every event to `path`, one JSON object per line.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    /// The newest `limit` events, oldest first.
    pub async fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.lock().await;
        let skip = events.len().saturating_sub(limit);
        events.iter().skip(skip).cloned().collect()
    }

    /// Every retained event of one run, oldest first.
    pub async fn for_run(&self, run_id: &str) -> Vec<AuditEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|event| event.run_id == run_id)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.events.lock().await.is_empty()
    }

    async fn append_to_file(&self, event: &AuditEvent) {
        let Some(path) = &self.file else {
            return;
        };

        let mut line = match serde_json::to_vec(event) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to encode audit event: {}", e);
                return;
            }
        };
        line.push(b'\n');

        let written = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .await?;
            file.write_all(&line).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            warn!("Failed to append audit event to {}: {}", path.display(), e);
        }
    }
}

#[async_trait]
impl AuditSink for AuditLog {
    async fn record(&self, event: AuditEvent) {
        info!(
            target: "audit",
            run_id = %event.run_id,
            stage = %event.stage,
            outcome = %event.outcome,
            "{}",
            event.detail
        );

        self.append_to_file(&event).await;

        let mut events = self.events.lock().await;
        if events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(run_id: &str, stage: Stage, outcome: Outcome) -> AuditEvent {
        AuditEvent::new(run_id, stage, outcome, format!("{} {}", stage, outcome))
    }

    mod ring {
        use super::*;

        #[tokio::test]
        async fn test_recent_returns_oldest_first() {
            let log = AuditLog::new(10);
            log.record(event("a", Stage::Validating, Outcome::Passed)).await;
            log.record(event("a", Stage::Connecting, Outcome::Passed)).await;
            log.record(event("a", Stage::Executing, Outcome::Failed)).await;

            let recent = log.recent(2).await;
            assert_eq!(recent.len(), 2);
            assert_eq!(recent[0].stage, Stage::Connecting);
            assert_eq!(recent[1].stage, Stage::Executing);
        }

        #[tokio::test]
        async fn test_capacity_drops_oldest() {
            let log = AuditLog::new(2);
            for run in ["a", "b", "c"] {
                log.record(event(run, Stage::Validating, Outcome::Passed)).await;
            }
            let runs: Vec<_> = log.recent(10).await.into_iter().map(|e| e.run_id).collect();
            assert_eq!(runs, vec!["b", "c"]);
            assert_eq!(log.len().await, 2);
        }

        #[tokio::test]
        async fn test_for_run_filters() {
            let log = AuditLog::new(10);
            log.record(event("a", Stage::Validating, Outcome::Passed)).await;
            log.record(event("b", Stage::Validating, Outcome::Rejected)).await;
            let events = log.for_run("b").await;
            assert_eq!(events.len(), 1);
            assert_eq!(events[0].outcome, Outcome::Rejected);
        }

        #[tokio::test]
        async fn test_starts_empty() {
            let log = AuditLog::new(5);
            assert!(log.is_empty().await);
            assert!(log.recent(5).await.is_empty());
        }
    }

    mod file {
        use super::*;

        #[tokio::test]
        async fn test_appends_json_lines() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("audit.jsonl");
            let log = AuditLog::new(10).with_file(&path);

            log.record(event("r1", Stage::Validating, Outcome::Passed)).await;
            log.record(event("r1", Stage::Connecting, Outcome::Failed)).await;

            let text = std::fs::read_to_string(&path).unwrap();
            let lines: Vec<AuditEvent> = text
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            assert_eq!(lines.len(), 2);
            assert_eq!(lines[1].stage, Stage::Connecting);
            assert_eq!(lines[1].outcome, Outcome::Failed);
        }

        #[tokio::test]
        async fn test_from_config() {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("audit.jsonl");
            let config = ServerConfig {
                audit_log_path: Some(path.clone()),
                audit_capacity: 1,
                ..ServerConfig::default()
            };
            let log = AuditLog::from_config(&config);

            log.record(event("r1", Stage::Validating, Outcome::Passed)).await;
            log.record(event("r2", Stage::Validating, Outcome::Passed)).await;

            assert_eq!(log.len().await, 1);
            assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
        }

        #[tokio::test]
        async fn test_unwritable_file_still_records_in_memory() {
            let dir = tempfile::tempdir().unwrap();
            let log = AuditLog::new(10).with_file(dir.path().join("missing/dir/audit.jsonl"));
            log.record(event("r1", Stage::Validating, Outcome::Passed)).await;
            assert_eq!(log.len().await, 1);
        }
    }

    mod serialization {
        use super::*;

        #[test]
        fn test_event_json_shape() {
            let json = serde_json::to_value(event("r", Stage::Persisting, Outcome::Failed)).unwrap();
            assert_eq!(json["stage"], "persisting");
            assert_eq!(json["outcome"], "failed");
            assert!(json["timestamp"].as_str().unwrap().contains('T'));
        }
    }
}
