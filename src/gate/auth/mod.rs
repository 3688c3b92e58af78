//! Credential resolution and authentication.
//!
//! Credentials form an ordered [`AuthChain`]: password first, private key
//! second. The chain is tried left to right on a single handshake and the
//! first credential the server accepts is used for the whole session.
//!
//! # Example
//!
//! ```ignore
//! use fio_gate::gate::auth::AuthChain;
//!
//! let chain = AuthChain::new()
//!     .with_password("secret")
//!     .with_key("~/.ssh/id_ed25519");
//!
//! let method = chain.authenticate(&mut handle, "username").await?;
//! ```

mod chain;
mod key;
mod password;
mod traits;

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use russh::client;

use crate::gate::session::SshClientHandler;

pub use chain::AuthChain;
pub use traits::{AuthMethod, Authenticator};

/// One credential of the chain.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Password(String),
    PrivateKey(PathBuf),
}

impl Credential {
    /// A private key credential; a leading `~` is expanded locally.
    pub fn private_key(path: &str) -> Self {
        Credential::PrivateKey(PathBuf::from(shellexpand::tilde(path).into_owned()))
    }

    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password(_) => AuthMethod::Password,
            Credential::PrivateKey(_) => AuthMethod::PrivateKey,
        }
    }

    pub fn key_path(&self) -> Option<&Path> {
        match self {
            Credential::PrivateKey(path) => Some(path),
            Credential::Password(_) => None,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey(path) => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

#[async_trait]
impl Authenticator for client::Handle<SshClientHandler> {
    async fn authenticate(
        &mut self,
        username: &str,
        credential: &Credential,
    ) -> Result<bool, String> {
        match credential {
            Credential::Password(secret) => {
                password::authenticate_password(self, username, secret).await
            }
            Credential::PrivateKey(path) => key::authenticate_key(self, username, path).await,
        }
    }
}
