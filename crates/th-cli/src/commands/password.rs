//! Credential hashing for accounts files

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};

use th_core::credential::hash_credential;

/// Print a credential hash for an accounts file entry
///
/// Reads the password from the first line of stdin when none is given.
pub async fn hash_password_command(password: Option<String>) -> Result<()> {
    let password = match password {
        Some(password) => password,
        None => {
            let mut line = String::new();
            BufReader::new(tokio::io::stdin())
                .read_line(&mut line)
                .await
                .context("Failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    if password.is_empty() {
        anyhow::bail!("Password must not be empty");
    }

    println!("{}", hash_credential(&password));
    Ok(())
}
