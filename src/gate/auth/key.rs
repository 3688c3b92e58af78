//! Private key file SSH authentication.

use std::path::Path;
use std::sync::Arc;

use russh::{client, keys};
use tracing::debug;

use crate::gate::session::SshClientHandler;

/// Load a passphrase-less private key and offer it to the server.
pub(super) async fn authenticate_key(
    handle: &mut client::Handle<SshClientHandler>,
    username: &str,
    key_path: &Path,
) -> Result<bool, String> {
    let key_pair = keys::load_secret_key(key_path, None)
        .map_err(|e| format!("failed to load private key from {}: {}", key_path.display(), e))?;

    // RSA keys need the strongest hash the server advertises
    let hash_alg = handle
        .best_supported_rsa_hash()
        .await
        .ok()
        .flatten()
        .flatten();
    debug!("Using RSA hash algorithm for key auth: {:?}", hash_alg);

    let key_with_hash = keys::PrivateKeyWithHashAlg::new(Arc::new(key_pair), hash_alg);

    let result = handle
        .authenticate_publickey(username, key_with_hash)
        .await
        .map_err(|e| format!("key authentication error: {}", e))?;

    Ok(result.success())
}
