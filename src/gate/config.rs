//! Configuration resolution for the gate.
//!
//! Every setting follows the same priority order:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from the environment (or `.env`)
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! The result is an immutable [`GateConfig`] built once at startup and shared
//! behind an `Arc`.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_HOST` | required | Remote `host[:port]` |
//! | `SSH_USER` | required | Login user |
//! | `SSH_PASSWORD` | - | Password credential |
//! | `SSH_KEY_PATH` | - | Private key path (`~` expanded) |
//! | `SSH_HOST_KEY_FINGERPRINT` | - | Pinned `SHA256:` host key fingerprint |
//! | `SSH_CONNECT_TIMEOUT` | 30s | Connection timeout in seconds |
//! | `SSH_COMMAND_TIMEOUT` | 60s | Command execution timeout in seconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `REMOTE_SAVE_DIR` | `~/fio_results` | Remote base directory for results |
//! | `FIO_TARGET_DEVICE` | `/dev/nvme0n1` | The only permitted benchmark target |
//! | `FIO_MAX_RUNTIME_SECS` | 10 | Cap on `--runtime` |
//! | `FIO_DENYLIST_EXTRA` | - | Comma-separated extra denied programs |
//! | `API_KEY` | - | Shared secret for the `X-API-Key` header |
//! | `GATE_PORT` | 8000 | HTTP port |
//! | `AUDIT_LOG_PATH` | - | Append-only JSON-lines audit file |
//! | `AUDIT_CAPACITY` | 1000 | Audit events kept in memory |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use super::error::ConfigError;
use super::policy::{DEFAULT_MAX_RUNTIME_SECS, DEFAULT_TARGET_DEVICE, PolicyConfig};

/// Default SSH connection timeout in seconds
pub(crate) const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default SSH command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 60;

/// Default remote base directory for result bundles
pub(crate) const DEFAULT_REMOTE_SAVE_DIR: &str = "~/fio_results";

/// Default HTTP port
pub(crate) const DEFAULT_PORT: u16 = 8000;

/// Default number of audit events kept in memory
pub(crate) const DEFAULT_AUDIT_CAPACITY: usize = 1000;

pub(crate) const HOST_ENV_VAR: &str = "SSH_HOST";
pub(crate) const USER_ENV_VAR: &str = "SSH_USER";
pub(crate) const PASSWORD_ENV_VAR: &str = "SSH_PASSWORD";
pub(crate) const KEY_PATH_ENV_VAR: &str = "SSH_KEY_PATH";
pub(crate) const HOST_KEY_FINGERPRINT_ENV_VAR: &str = "SSH_HOST_KEY_FINGERPRINT";
pub(crate) const CONNECT_TIMEOUT_ENV_VAR: &str = "SSH_CONNECT_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const REMOTE_SAVE_DIR_ENV_VAR: &str = "REMOTE_SAVE_DIR";
pub(crate) const TARGET_DEVICE_ENV_VAR: &str = "FIO_TARGET_DEVICE";
pub(crate) const MAX_RUNTIME_ENV_VAR: &str = "FIO_MAX_RUNTIME_SECS";
pub(crate) const DENYLIST_EXTRA_ENV_VAR: &str = "FIO_DENYLIST_EXTRA";
pub(crate) const API_KEY_ENV_VAR: &str = "API_KEY";
pub(crate) const PORT_ENV_VAR: &str = "GATE_PORT";
pub(crate) const AUDIT_LOG_PATH_ENV_VAR: &str = "AUDIT_LOG_PATH";
pub(crate) const AUDIT_CAPACITY_ENV_VAR: &str = "AUDIT_CAPACITY";

/// SSH connection settings.
#[derive(Clone, PartialEq, Eq)]
pub struct SshConfig {
    /// `host` or `host:port`
    pub address: String,
    pub username: String,
    pub password: Option<String>,
    pub key_path: Option<String>,
    pub host_key_fingerprint: Option<String>,
    pub connect_timeout: Duration,
    pub command_timeout: Duration,
    pub compress: bool,
}

impl SshConfig {
    /// Settings with no credentials, no pinned host key and compression on.
    pub fn new(
        address: impl Into<String>,
        username: impl Into<String>,
        connect_timeout: Duration,
        command_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            username: username.into(),
            password: None,
            key_path: None,
            host_key_fingerprint: None,
            connect_timeout,
            command_timeout,
            compress: true,
        }
    }
}

impl fmt::Debug for SshConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshConfig")
            .field("address", &self.address)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("key_path", &self.key_path)
            .field("host_key_fingerprint", &self.host_key_fingerprint)
            .field("connect_timeout", &self.connect_timeout)
            .field("command_timeout", &self.command_timeout)
            .field("compress", &self.compress)
            .finish()
    }
}

/// Where and how result bundles are stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistConfig {
    /// Remote base directory; a leading `~` is expanded by the remote shell.
    pub base_dir: String,
    /// Ceiling for each remote filesystem command.
    pub timeout: Duration,
}

/// HTTP server and audit settings.
#[derive(Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub port: u16,
    /// `None` disables the `X-API-Key` check.
    pub api_key: Option<String>,
    pub audit_log_path: Option<PathBuf>,
    pub audit_capacity: usize,
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("port", &self.port)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("audit_log_path", &self.audit_log_path)
            .field("audit_capacity", &self.audit_capacity)
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_key: None,
            audit_log_path: None,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
        }
    }
}

/// Complete, immutable gate configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub ssh: SshConfig,
    pub policy: PolicyConfig,
    pub persist: PersistConfig,
    pub server: ServerConfig,
}

impl GateConfig {
    /// Read the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration from any key lookup.
    ///
    /// Empty values count as unset. Unknown keys are never consulted.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let address = get(HOST_ENV_VAR).ok_or(ConfigError::Missing(HOST_ENV_VAR))?;
        let username = get(USER_ENV_VAR).ok_or(ConfigError::Missing(USER_ENV_VAR))?;

        let connect_timeout = Duration::from_secs(parse_or(
            get(CONNECT_TIMEOUT_ENV_VAR),
            CONNECT_TIMEOUT_ENV_VAR,
            DEFAULT_CONNECT_TIMEOUT_SECS,
        )?);
        let command_timeout = Duration::from_secs(parse_or(
            get(COMMAND_TIMEOUT_ENV_VAR),
            COMMAND_TIMEOUT_ENV_VAR,
            DEFAULT_COMMAND_TIMEOUT_SECS,
        )?);

        let ssh = SshConfig {
            password: get(PASSWORD_ENV_VAR),
            key_path: get(KEY_PATH_ENV_VAR),
            host_key_fingerprint: get(HOST_KEY_FINGERPRINT_ENV_VAR)
                .map(|fp| fp.trim().to_string()),
            compress: resolve_compression(None, get(COMPRESSION_ENV_VAR)),
            ..SshConfig::new(address, username, connect_timeout, command_timeout)
        };

        let max_runtime = parse_or(
            get(MAX_RUNTIME_ENV_VAR),
            MAX_RUNTIME_ENV_VAR,
            DEFAULT_MAX_RUNTIME_SECS,
        )?;
        let policy = PolicyConfig::new(
            get(TARGET_DEVICE_ENV_VAR).unwrap_or_else(|| DEFAULT_TARGET_DEVICE.to_string()),
            Duration::from_secs(max_runtime),
        )
        .with_denied_programs(split_list(get(DENYLIST_EXTRA_ENV_VAR).as_deref()));

        let persist = PersistConfig {
            base_dir: get(REMOTE_SAVE_DIR_ENV_VAR)
                .unwrap_or_else(|| DEFAULT_REMOTE_SAVE_DIR.to_string()),
            timeout: command_timeout,
        };

        let server = ServerConfig {
            port: parse_or(get(PORT_ENV_VAR), PORT_ENV_VAR, DEFAULT_PORT)?,
            api_key: get(API_KEY_ENV_VAR),
            audit_log_path: get(AUDIT_LOG_PATH_ENV_VAR).map(PathBuf::from),
            audit_capacity: parse_or(
                get(AUDIT_CAPACITY_ENV_VAR),
                AUDIT_CAPACITY_ENV_VAR,
                DEFAULT_AUDIT_CAPACITY,
            )?,
        };

        Ok(Self {
            ssh,
            policy,
            persist,
            server,
        })
    }
}

/// Resolve the compression setting with priority: parameter -> env var -> default (true)
pub(crate) fn resolve_compression(compress_param: Option<bool>, env_value: Option<String>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Some(env_compress) = env_value {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

fn parse_or<T: std::str::FromStr>(
    value: Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|list| {
            list.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
