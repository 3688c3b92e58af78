//! Authentication seam between the credential chain and the transport.

use std::fmt;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::Credential;

/// Which kind of credential opened a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Password,
    PrivateKey,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Password => "password",
            AuthMethod::PrivateKey => "private_key",
        }
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Something that can present one credential on an open handshake.
///
/// Implemented for the russh client handle; tests script it directly.
#[async_trait]
pub trait Authenticator: Send {
    /// Attempt to authenticate with a single credential.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - The server accepted the credential
    /// * `Ok(false)` - The server rejected it
    /// * `Err(message)` - The attempt itself failed (unreadable key, transport error)
    async fn authenticate(
        &mut self,
        username: &str,
        credential: &Credential,
    ) -> Result<bool, String>;
}
