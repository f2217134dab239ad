//! Servers command implementation

use anyhow::Result;

use super::{sign_in, Credentials};
use crate::client::SessionClient;
use crate::output::{format_servers, print_error, print_info};

/// List the servers the identity may open sessions on
pub async fn servers_command(address: &str, credentials: &Credentials) -> Result<()> {
    let mut client = SessionClient::new(address);

    if let Some(token) = sign_in(&mut client, credentials).await? {
        print_info(&format!("Logged in, new token: {}", token));
    }

    let servers = match client.list_servers().await {
        Ok(servers) => servers,
        Err(e) => {
            print_error(&format!("Failed to list servers: {}", e));
            return Err(e);
        }
    };

    println!("Servers:");
    println!("{}", format_servers(&servers));
    Ok(())
}
