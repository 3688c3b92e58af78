//! Writing result bundles to the remote filesystem.
//!
//! Each bundle gets its own directory under the configured base:
//!
//! ```text
//! <base>/<YYYY-MM-DD_HH-MM-SS.ffffff>_<8 hex>/input.json
//! <base>/<YYYY-MM-DD_HH-MM-SS.ffffff>_<8 hex>/output.txt
//! ```
//!
//! The leaf is created with a plain `mkdir`, so an existing directory is an
//! error rather than something to write into. The random suffix makes that
//! practically impossible even when two runs read the same clock.
//!
//! Everything goes over the run's own session: the directory is created by
//! one shell command and each artifact is streamed to `cat > path` on stdin,
//! so bytes are stored exactly as captured.

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::PersistConfig;
use super::error::{ArtifactFailure, ExecError, PersistError};
use super::session::{ExecutionResult, RemoteSession};

pub const INPUT_ARTIFACT: &str = "input.json";
pub const OUTPUT_ARTIFACT: &str = "output.txt";

/// Written in place of a missing query.
pub const NO_QUERY: &str = "N/A";

const DIR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S%.6f";

#[derive(Serialize)]
struct InputRecord<'a> {
    query: &'a str,
    command: &'a str,
}

/// Stores result bundles through a [`RemoteSession`].
#[derive(Debug, Clone)]
pub struct ResultPersister {
    config: PersistConfig,
    clock: fn() -> DateTime<Local>,
}

impl ResultPersister {
    pub fn new(config: PersistConfig) -> Self {
        Self {
            config,
            clock: Local::now,
        }
    }

    /// Use a fixed or scripted clock for directory names.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Local>) -> Self {
        self.clock = clock;
        self
    }

    pub fn base_dir(&self) -> &str {
        &self.config.base_dir
    }

    /// A fresh leaf directory name: local timestamp plus random suffix.
    pub fn directory_name(&self) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!(
            "{}_{}",
            (self.clock)().format(DIR_TIMESTAMP_FORMAT),
            &suffix[..8]
        )
    }

    /// Persist a completed execution. Returns the remote absolute path.
    pub async fn save(
        &self,
        session: &mut dyn RemoteSession,
        query: Option<&str>,
        command: &str,
        result: &ExecutionResult,
    ) -> Result<String, PersistError> {
        self.store(session, query, command, render_output(result))
            .await
    }

    /// Persist a record of an execution that never produced a result.
    pub async fn save_failure(
        &self,
        session: &mut dyn RemoteSession,
        query: Option<&str>,
        command: &str,
        error: &ExecError,
    ) -> Result<String, PersistError> {
        self.store(session, query, command, render_failure(error))
            .await
    }

    async fn store(
        &self,
        session: &mut dyn RemoteSession,
        query: Option<&str>,
        command: &str,
        output: Vec<u8>,
    ) -> Result<String, PersistError> {
        let dir = self.create_directory(session).await?;
        debug!("Created result directory {}", dir);

        let input = render_input(query, command);
        let artifacts = [(INPUT_ARTIFACT, input), (OUTPUT_ARTIFACT, Ok(output))];

        let mut written = Vec::new();
        let mut failed = Vec::new();
        for (artifact, contents) in artifacts {
            let outcome = match contents {
                Ok(bytes) => self.write_file(session, &dir, artifact, &bytes).await,
                Err(detail) => Err(detail),
            };
            match outcome {
                Ok(()) => written.push(artifact.to_string()),
                Err(detail) => {
                    warn!("Failed to write {} in {}: {}", artifact, dir, detail);
                    failed.push(ArtifactFailure {
                        artifact: artifact.to_string(),
                        detail,
                    });
                }
            }
        }

        if !failed.is_empty() {
            return Err(PersistError::Artifacts {
                dir,
                written,
                failed,
            });
        }

        info!("Saved result bundle to {}", dir);
        Ok(dir)
    }

    async fn create_directory(
        &self,
        session: &mut dyn RemoteSession,
    ) -> Result<String, PersistError> {
        let base = quote_base_dir(&self.config.base_dir);
        let name = shell_quote(&self.directory_name());
        let command = format!(
            "mkdir -p -- {base} && cd -- {base} && mkdir -- {name} && cd -- {name} && pwd",
            base = base,
            name = name
        );

        let directory_error = |detail: String| PersistError::Directory {
            base: self.config.base_dir.clone(),
            detail,
        };

        let result = session
            .exec(&command, None, self.config.timeout)
            .await
            .map_err(|e| directory_error(e.to_string()))?;
        if !result.success() {
            return Err(directory_error(describe_exit(&result)));
        }

        let dir = result.stdout_lossy().trim().to_string();
        if dir.is_empty() {
            return Err(directory_error("remote shell reported no path".into()));
        }
        Ok(dir)
    }

    async fn write_file(
        &self,
        session: &mut dyn RemoteSession,
        dir: &str,
        artifact: &str,
        contents: &[u8],
    ) -> Result<(), String> {
        let path = format!("{}/{}", dir, artifact);
        let command = format!("cat > {}", shell_quote(&path));
        let result = session
            .exec(&command, Some(contents), self.config.timeout)
            .await
            .map_err(|e| e.to_string())?;
        if result.success() {
            Ok(())
        } else {
            Err(describe_exit(&result))
        }
    }
}

fn render_input(query: Option<&str>, command: &str) -> Result<Vec<u8>, String> {
    let record = InputRecord {
        query: query.unwrap_or(NO_QUERY),
        command,
    };
    serde_json::to_vec_pretty(&record).map_err(|e| format!("failed to encode input: {}", e))
}

fn render_output(result: &ExecutionResult) -> Vec<u8> {
    let mut out = Vec::with_capacity(result.stdout.len() + result.stderr.len() + 64);
    out.extend_from_slice(b"--- STDOUT ---\n");
    out.extend_from_slice(&result.stdout);
    out.extend_from_slice(b"\n\n--- STDERR ---\n");
    out.extend_from_slice(&result.stderr);
    out.extend_from_slice(format!("\n\n--- EXIT CODE ---\n{}\n", result.exit_code).as_bytes());
    out
}

fn render_failure(error: &ExecError) -> Vec<u8> {
    format!("--- ERROR ---\n{}\n", error).into_bytes()
}

fn describe_exit(result: &ExecutionResult) -> String {
    let stderr = result.stderr_lossy();
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("exit code {}", result.exit_code)
    } else {
        format!("exit code {}: {}", result.exit_code, stderr)
    }
}

/// Single-quote a word for a POSIX shell.
pub(crate) fn shell_quote(word: &str) -> String {
    format!("'{}'", word.replace('\'', r"'\''"))
}

/// Quote the base directory, leaving a leading `~` for the remote `$HOME`.
pub(crate) fn quote_base_dir(base: &str) -> String {
    if base == "~" {
        "\"$HOME\"".to_string()
    } else if let Some(rest) = base.strip_prefix("~/") {
        format!("\"$HOME\"/{}", shell_quote(rest))
    } else {
        shell_quote(base)
    }
}
