//! SSH connection and command execution over russh.
//!
//! ## Connection Lifecycle
//!
//! 1. **Address Parsing**: `host:port`, default port 22.
//! 2. **Client Configuration**: inactivity timeout, keepalive and
//!    compression preferences.
//! 3. **Connection and Authentication**: TCP connect, SSH handshake and the
//!    credential chain, all bounded by the connect timeout. The first
//!    credential the server accepts is used for the session lifetime.
//! 4. **Command Execution**: one channel per command; stdout and stderr are
//!    captured separately as bytes, up to [`MAX_CAPTURE_BYTES`] combined.
//!    Optional stdin is streamed and closed with EOF.
//!
//! Nothing here retries. A failed connect or a timed-out command is reported
//! to the coordinator, which decides what happens next.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client};
use tracing::{debug, info, warn};

use super::auth::{AuthChain, AuthMethod};
use super::config::SshConfig;
use super::error::{ConnectError, ExecError};
use super::session::{Connector, ExecutionResult, RemoteSession, SshClientHandler};

/// Combined stdout and stderr kept from one command.
pub const MAX_CAPTURE_BYTES: usize = 16 * 1024 * 1024;

/// Build russh client configuration.
///
/// Creates an `Arc<client::Config>` with:
/// - Inactivity timeout set to `timeout`
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` (ZLIB if enabled, NONE if disabled)
pub(crate) fn build_client_config(timeout: Duration, compress: bool) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout: Some(timeout),
        keepalive_interval: Some(Duration::from_secs(30)),
        keepalive_max: 3,
        preferred,
        ..Default::default()
    })
}

/// Parse address string into host and port components.
///
/// Uses `rsplit_once` so `[::1]:22` splits on the last colon; the brackets
/// are stripped from the host.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), String> {
    if let Some((host, port_str)) = address.rsplit_once(':') {
        let port = port_str
            .parse::<u16>()
            .map_err(|e| format!("Invalid port number: {}", e))?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        Ok((host.to_string(), port))
    } else {
        Ok((address.to_string(), 22))
    }
}

/// Opens russh sessions to the configured host.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    /// Connect and authenticate, bounded by the connect timeout.
    pub async fn open(&self, credentials: &AuthChain) -> Result<SshSession, ConnectError> {
        if credentials.is_empty() {
            return Err(ConnectError::NoCredentials);
        }

        let (host, port) = parse_address(&self.config.address).map_err(ConnectError::Address)?;
        let timeout = self.config.connect_timeout;
        let client_config = build_client_config(
            timeout.max(self.config.command_timeout),
            self.config.compress,
        );
        let handler = SshClientHandler::new(self.config.host_key_fingerprint.clone());
        let username = self.config.username.as_str();

        let attempt = async {
            let mut handle = client::connect(client_config, (host.as_str(), port), handler)
                .await
                .map_err(|e| ConnectError::Transport(e.to_string()))?;
            let method = credentials.authenticate(&mut handle, username).await?;
            Ok::<_, ConnectError>((handle, method))
        };

        let (handle, auth_method) = tokio::time::timeout(timeout, attempt)
            .await
            .map_err(|_| ConnectError::Timeout(timeout))??;

        info!(
            "Connected to {}@{}:{} using {} authentication",
            username, host, port, auth_method
        );

        Ok(SshSession {
            handle,
            auth_method,
            usable: true,
            capture_limit: MAX_CAPTURE_BYTES,
        })
    }
}

#[async_trait]
impl Connector for SshConnector {
    async fn connect(
        &self,
        credentials: &AuthChain,
    ) -> Result<Box<dyn RemoteSession>, ConnectError> {
        Ok(Box::new(self.open(credentials).await?))
    }
}

/// An authenticated russh connection.
pub struct SshSession {
    handle: client::Handle<SshClientHandler>,
    auth_method: AuthMethod,
    usable: bool,
    capture_limit: usize,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(
        &mut self,
        command: &str,
        stdin: Option<&[u8]>,
        timeout: Duration,
    ) -> Result<ExecutionResult, ExecError> {
        if !self.usable {
            return Err(ExecError::SessionUnusable);
        }

        let started = Instant::now();
        let running = run_command(&self.handle, command, stdin, self.capture_limit);
        match tokio::time::timeout(timeout, running).await {
            Ok(Ok(capture)) => Ok(ExecutionResult {
                exit_code: capture.exit_code.map(|c| c as i32).unwrap_or(-1),
                stdout: capture.stdout,
                stderr: capture.stderr,
                duration: started.elapsed(),
            }),
            Ok(Err(e)) => {
                if matches!(e, ExecError::OutputLimit(_)) {
                    // The remote command may still be running behind the closed channel.
                    warn!("{}; discarding session", e);
                    self.usable = false;
                }
                Err(e)
            }
            Err(_) => {
                warn!("Command timed out after {:?}; discarding session", timeout);
                self.usable = false;
                Err(ExecError::Timeout(timeout))
            }
        }
    }

    fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    async fn close(&mut self) {
        self.usable = false;
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("Error while disconnecting: {}", e);
        }
    }
}

/// Everything one channel produced, bounded by `limit` bytes.
#[derive(Debug)]
struct Capture {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: Option<u32>,
    limit: usize,
}

impl Capture {
    fn new(limit: usize) -> Self {
        Self {
            stdout: Vec::with_capacity(4096.min(limit)),
            stderr: Vec::with_capacity(1024.min(limit)),
            exit_code: None,
            limit,
        }
    }

    /// Fold in the next channel message. `Ok(true)` once the command is done.
    fn absorb(&mut self, msg: Option<ChannelMsg>) -> Result<bool, ExecError> {
        match msg {
            Some(ChannelMsg::Data { data }) => {
                self.reserve(data.len())?;
                self.stdout.extend_from_slice(&data);
            }
            Some(ChannelMsg::ExtendedData { data, ext }) => {
                // ext == 1 is stderr in SSH protocol
                if ext == 1 {
                    self.reserve(data.len())?;
                    self.stderr.extend_from_slice(&data);
                }
            }
            Some(ChannelMsg::ExitStatus { exit_status }) => {
                self.exit_code = Some(exit_status);
            }
            Some(ChannelMsg::Eof) => return Ok(self.exit_code.is_some()),
            Some(ChannelMsg::Close) | None => return Ok(true),
            Some(_) => {}
        }
        Ok(false)
    }

    fn reserve(&self, incoming: usize) -> Result<(), ExecError> {
        let total = self.stdout.len() + self.stderr.len();
        if total.saturating_add(incoming) > self.limit {
            return Err(ExecError::OutputLimit(self.limit));
        }
        Ok(())
    }
}

/// Open a channel, run one command and collect what it produces.
async fn run_command(
    handle: &client::Handle<SshClientHandler>,
    command: &str,
    stdin: Option<&[u8]>,
    limit: usize,
) -> Result<Capture, ExecError> {
    let mut channel = handle
        .channel_open_session()
        .await
        .map_err(|e| ExecError::Channel(e.to_string()))?;

    channel
        .exec(true, command)
        .await
        .map_err(|e| ExecError::Start(e.to_string()))?;

    if let Some(input) = stdin {
        channel
            .data(input)
            .await
            .map_err(|e| ExecError::Input(e.to_string()))?;
    }
    channel
        .eof()
        .await
        .map_err(|e| ExecError::Input(e.to_string()))?;

    let mut capture = Capture::new(limit);
    let finished = loop {
        match capture.absorb(channel.wait().await) {
            Ok(true) => break Ok(()),
            Ok(false) => {}
            Err(e) => break Err(e),
        }
    };

    let _ = channel.close().await;

    finished.map(|()| capture)
}
