//! Password-based SSH authentication.

use russh::client;

use crate::gate::session::SshClientHandler;

pub(super) async fn authenticate_password(
    handle: &mut client::Handle<SshClientHandler>,
    username: &str,
    password: &str,
) -> Result<bool, String> {
    let result = handle
        .authenticate_password(username, password)
        .await
        .map_err(|e| format!("password authentication error: {}", e))?;

    Ok(result.success())
}
