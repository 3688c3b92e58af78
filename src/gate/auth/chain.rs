//! Ordered credential chain, first success wins.

use std::path::PathBuf;

use tracing::{debug, warn};

use crate::gate::config::SshConfig;
use crate::gate::error::ConnectError;

use super::{AuthMethod, Authenticator, Credential};

/// Credentials tried in the order they were added.
///
/// The first credential the server accepts stops the chain; the rest are
/// never presented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthChain {
    credentials: Vec<Credential>,
}

impl AuthChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the chain from configuration: password first, then key.
    ///
    /// An empty chain is a configuration problem the caller must report
    /// before opening any connection.
    pub fn resolve(config: &SshConfig) -> Self {
        let mut chain = Self::new();
        if let Some(password) = &config.password {
            chain = chain.with_password(password.clone());
        }
        if let Some(key_path) = &config.key_path {
            chain = chain.with_key(key_path);
        }
        chain
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials.push(Credential::Password(password.into()));
        self
    }

    /// Add a private key; `~` is expanded.
    pub fn with_key(mut self, key_path: &str) -> Self {
        self.credentials.push(Credential::private_key(key_path));
        self
    }

    pub fn with_key_path(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.credentials.push(Credential::PrivateKey(key_path.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn credentials(&self) -> &[Credential] {
        &self.credentials
    }

    pub fn methods(&self) -> Vec<AuthMethod> {
        self.credentials.iter().map(Credential::method).collect()
    }

    /// Present each credential until one is accepted.
    ///
    /// Failures before the winning credential are logged at `warn` and not
    /// reported. If every credential fails, the error carries only the last
    /// failure.
    pub async fn authenticate<A>(
        &self,
        auth: &mut A,
        username: &str,
    ) -> Result<AuthMethod, ConnectError>
    where
        A: Authenticator + ?Sized,
    {
        let mut last_error = None;

        for credential in &self.credentials {
            let method = credential.method();
            debug!("Trying {} authentication for {}", method, username);

            let detail = match auth.authenticate(username, credential).await {
                Ok(true) => {
                    debug!("Authenticated {} with {}", username, method);
                    return Ok(method);
                }
                Ok(false) => format!("{} authentication rejected", method),
                Err(e) => e,
            };
            warn!("{} authentication for {} failed: {}", method, username, detail);
            last_error = Some(ConnectError::Authentication { method, detail });
        }

        Err(last_error.unwrap_or(ConnectError::NoCredentials))
    }
}
