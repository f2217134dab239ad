//! Connect command implementation

use anyhow::Result;
use tokio::io::BufReader;

use super::{sign_in, Credentials};
use crate::client::{SessionClient, SessionEnd};
use crate::output::{format_session, print_error, print_info, print_progress};

/// Open a session and relay stdin lines to it until either side stops
pub async fn connect_command(
    address: &str,
    credentials: &Credentials,
    server: Option<&str>,
) -> Result<()> {
    let mut client = SessionClient::new(address);

    if let Some(token) = sign_in(&mut client, credentials).await? {
        print_info(&format!("Logged in, new token: {}", token));
    }

    print_info(&format!(
        "Opening session on {}...",
        server.unwrap_or("your shell workspace")
    ));
    let (info, session) = match client.open_session(server, print_progress).await {
        Ok(opened) => opened,
        Err(e) => {
            print_error(&format!("{}", e));
            return Err(e);
        }
    };
    print_info(&format_session(&info));
    print_info("End input (Ctrl+D) to disconnect");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    match session.run(stdin, stdout, print_progress).await? {
        SessionEnd::Disconnected => print_info("Disconnected"),
        SessionEnd::ShellExited(message) => anyhow::bail!("Session ended: {}", message),
        SessionEnd::Closed => print_info("Connection closed by daemon"),
    }
    Ok(())
}
