//! Remote session abstraction.
//!
//! # Architecture
//!
//! - [`Connector`]: opens one authenticated session per call. Sessions are
//!   never pooled; each run owns its session from connect to close.
//! - [`RemoteSession`]: runs one command per call and returns an
//!   [`ExecutionResult`]. Nothing is retried at this level.
//! - [`SshClientHandler`]: the russh client handler. It checks the server
//!   key against an optional pinned SHA-256 fingerprint.
//!
//! The russh-backed implementations live in `client`; tests use a local
//! shell-backed implementation.

use std::time::Duration;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::{error, warn};

use super::auth::{AuthChain, AuthMethod};
use super::error::{ConnectError, ExecError};

/// Captured outcome of one remote command.
///
/// A non-zero `exit_code` is still a successful execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    /// `-1` when the remote side reported no exit status.
    pub exit_code: i32,
    pub duration: Duration,
}

impl ExecutionResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn stdout_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stdout).into_owned()
    }

    pub fn stderr_lossy(&self) -> String {
        String::from_utf8_lossy(&self.stderr).into_owned()
    }
}

/// One authenticated connection to the remote host.
#[async_trait]
pub trait RemoteSession: Send {
    /// Run `command`, optionally feeding `stdin`, bounded by `timeout`.
    ///
    /// On timeout no partial result is returned and the session must not be
    /// used again.
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError>;

    /// The credential kind that opened this session.
    fn auth_method(&self) -> AuthMethod;

    /// Close the connection. Errors are logged, never returned.
    async fn close(&mut self);
}

/// Opens sessions to the configured host.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect and authenticate with the first credential that works.
    async fn connect(&self, credentials: &AuthChain)
    -> Result<Box<dyn RemoteSession>, ConnectError>;
}

/// Client handler for russh with optional host key pinning.
///
/// With a pinned fingerprint any other server key is refused. Without one
/// every key is accepted (like `StrictHostKeyChecking=no`) and a warning is
/// logged with the fingerprint so it can be pinned.
#[derive(Debug, Clone, Default)]
pub struct SshClientHandler {
    expected_fingerprint: Option<String>,
}

impl SshClientHandler {
    pub fn new(expected_fingerprint: Option<String>) -> Self {
        Self {
            expected_fingerprint,
        }
    }

    /// Compare an offered `SHA256:...` fingerprint with the pinned one.
    pub(crate) fn accepts(&self, offered: &str) -> bool {
        match &self.expected_fingerprint {
            Some(expected) => {
                let expected = expected.trim();
                let expected = expected.strip_prefix("SHA256:").unwrap_or(expected);
                let offered = offered.strip_prefix("SHA256:").unwrap_or(offered);
                expected.trim_end_matches('=') == offered.trim_end_matches('=')
            }
            None => true,
        }
    }
}

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        let offered = server_public_key
            .fingerprint(keys::HashAlg::Sha256)
            .to_string();

        if self.expected_fingerprint.is_none() {
            warn!(
                "Host key {} accepted without verification; set SSH_HOST_KEY_FINGERPRINT to pin it",
                offered
            );
            return Ok(true);
        }

        let accepted = self.accepts(&offered);
        if !accepted {
            error!("Host key {} does not match the pinned fingerprint", offered);
        }
        Ok(accepted)
    }
}
