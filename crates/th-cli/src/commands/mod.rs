//! CLI command implementations

mod config;
mod connect;
mod password;
mod servers;

pub use config::{config_init, config_path, config_show};
pub use connect::connect_command;
pub use password::hash_password_command;
pub use servers::servers_command;

use anyhow::Result;

use crate::client::SessionClient;

/// How a command proves its identity to the daemon
#[derive(Debug, Clone)]
pub enum Credentials {
    /// A previously issued access token
    Token(String),
    /// Username and password; logging in rotates the identity's token
    Login { username: String, password: String },
}

impl Credentials {
    /// Prefer an explicit token, then a username with a password
    pub fn from_args(
        token: Option<String>,
        user: Option<String>,
        password: Option<String>,
    ) -> Result<Self> {
        match (token, user, password) {
            (Some(token), _, _) => Ok(Credentials::Token(token)),
            (None, Some(username), Some(password)) => Ok(Credentials::Login { username, password }),
            (None, Some(_), None) => {
                anyhow::bail!("--user needs a password (set TERMHOST_PASSWORD)")
            }
            (None, None, _) => {
                anyhow::bail!("No credentials given (use --token or --user)")
            }
        }
    }
}

/// Authenticate `client`, returning the new token if a login issued one
pub(crate) async fn sign_in(
    client: &mut SessionClient,
    credentials: &Credentials,
) -> Result<Option<String>> {
    match credentials {
        Credentials::Token(token) => {
            client.authenticate(token).await?;
            Ok(None)
        }
        Credentials::Login { username, password } => {
            let token = client.login(username, password).await?;
            Ok(Some(token))
        }
    }
}
