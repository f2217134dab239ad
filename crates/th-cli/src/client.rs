//! Client for the termhost daemon
//!
//! [`SessionClient`] walks a connection through authentication and server
//! selection. Once a session is running it turns into a [`LineSession`],
//! which forwards input lines as commands and writes shell output verbatim.

use anyhow::{Context, Result};
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use th_protocol::{
    ClientCodec, ClientEvent, ErrorKind, Frame, ServerEvent, ServerSummary, SessionInfo,
    CLIENT_MAX_FRAME_LENGTH,
};

use crate::output::{print_error, print_warning};

/// Default daemon address for clients
pub const DEFAULT_ADDRESS: &str = "127.0.0.1:3000";

type Connection = Framed<TcpStream, ClientCodec>;

/// Client for one daemon connection
pub struct SessionClient {
    address: String,
    framed: Option<Connection>,
    authenticated: bool,
}

impl SessionClient {
    /// Create a client for `address` without connecting yet
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            framed: None,
            authenticated: false,
        }
    }

    /// Get the address
    pub fn address(&self) -> &str {
        &self.address
    }

    async fn connection(&mut self) -> Result<&mut Connection> {
        if self.framed.is_none() {
            tracing::debug!("Connecting to termhost at {}", self.address);
            let stream = TcpStream::connect(&self.address).await.with_context(|| {
                format!(
                    "Failed to connect to termhost at {}. Is it running?",
                    self.address
                )
            })?;
            self.framed = Some(Framed::new(
                stream,
                ClientCodec::with_max_length(CLIENT_MAX_FRAME_LENGTH),
            ));
        }
        self.framed
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))
    }

    async fn send(&mut self, event: ClientEvent) -> Result<()> {
        self.connection()
            .await?
            .send(event)
            .await
            .context("Failed to send event")
    }

    async fn recv(&mut self) -> Result<ServerEvent> {
        let framed = self.connection().await?;
        loop {
            match framed.next().await {
                Some(Ok(Frame::Event(event))) => return Ok(event),
                Some(Ok(Frame::Invalid { reason })) => {
                    tracing::warn!("Ignoring invalid event from daemon: {}", reason)
                }
                Some(Err(e)) => return Err(e).context("Failed to read from daemon"),
                None => anyhow::bail!("Connection closed by daemon"),
            }
        }
    }

    /// Check that the daemon answers (no authentication required)
    pub async fn ping(&mut self) -> Result<bool> {
        self.send(ClientEvent::Ping).await?;
        Ok(matches!(self.recv().await?, ServerEvent::Pong))
    }

    /// Authenticate with an access token
    pub async fn authenticate(&mut self, token: &str) -> Result<()> {
        self.send(ClientEvent::authenticate(token)).await?;
        match self.recv().await? {
            ServerEvent::AuthResult { ok: true, .. } => {
                self.authenticated = true;
                Ok(())
            }
            ServerEvent::AuthResult { error, .. } => anyhow::bail!(
                "Authentication failed: {}",
                error.unwrap_or_else(|| "rejected".to_string())
            ),
            other => anyhow::bail!("Unexpected authentication response: {:?}", other),
        }
    }

    /// Log in with a username and password, returning the fresh token
    ///
    /// The identity's previous token stops working.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<String> {
        self.send(ClientEvent::Login {
            username: username.to_string(),
            password: password.to_string(),
        })
        .await?;
        match self.recv().await? {
            ServerEvent::AuthResult {
                ok: true,
                token: Some(token),
                ..
            } => {
                self.authenticated = true;
                Ok(token)
            }
            ServerEvent::AuthResult { error, .. } => anyhow::bail!(
                "Login failed: {}",
                error.unwrap_or_else(|| "rejected".to_string())
            ),
            other => anyhow::bail!("Unexpected login response: {:?}", other),
        }
    }

    /// List the servers the identity may select
    pub async fn list_servers(&mut self) -> Result<Vec<ServerSummary>> {
        self.require_auth()?;
        self.send(ClientEvent::ListServers).await?;
        match self.recv().await? {
            ServerEvent::Servers { servers } => Ok(servers),
            ServerEvent::Error { message, .. } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Select a server and wait until its shell is running
    ///
    /// `on_progress` receives each provisioning line. Provisioning errors
    /// are reported but do not stop the session from opening.
    pub async fn open_session(
        mut self,
        server_id: Option<&str>,
        mut on_progress: impl FnMut(&str),
    ) -> Result<(SessionInfo, LineSession)> {
        self.require_auth()?;
        self.send(ClientEvent::SelectServer {
            server_id: server_id.map(str::to_string),
        })
        .await?;

        let info = loop {
            match self.recv().await? {
                ServerEvent::SessionInfo(info) => break info,
                ServerEvent::Progress { text } => on_progress(&text),
                ServerEvent::Error {
                    kind: ErrorKind::Provisioning,
                    message,
                } => print_warning(&message),
                ServerEvent::Error { kind, message } => {
                    anyhow::bail!("Failed to open session ({}): {}", kind, message)
                }
                other => tracing::debug!("Ignoring {:?} while opening session", other),
            }
        };

        let framed = self
            .framed
            .take()
            .ok_or_else(|| anyhow::anyhow!("Not connected"))?;
        Ok((info, LineSession { framed }))
    }

    fn require_auth(&self) -> Result<()> {
        if !self.authenticated {
            anyhow::bail!("Not authenticated");
        }
        Ok(())
    }
}

/// How a line session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEnd {
    /// The input ended and the daemon closed the connection
    Disconnected,
    /// The shell exited; carries the daemon's explanation
    ShellExited(String),
    /// The daemon closed the connection on its own
    Closed,
}

/// A running session driven line by line
pub struct LineSession {
    framed: Connection,
}

impl LineSession {
    /// Relay until the daemon closes the connection
    ///
    /// Each input line becomes a command. End of input sends `disconnect`
    /// and keeps writing output until the daemon hangs up. Progress lines
    /// go to `on_progress`; shell output is written to `output` unchanged.
    pub async fn run<R, W>(
        mut self,
        input: R,
        mut output: W,
        mut on_progress: impl FnMut(&str),
    ) -> Result<SessionEnd>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        let mut input_open = true;
        let mut shell_exit = None;

        loop {
            tokio::select! {
                line = lines.next_line(), if input_open => match line.context("Failed to read input")? {
                    Some(line) => self.framed.send(ClientEvent::command(line)).await?,
                    None => {
                        input_open = false;
                        self.framed.send(ClientEvent::Disconnect).await?;
                    }
                },
                frame = self.framed.next() => match frame {
                    Some(Ok(Frame::Event(event))) => match event {
                        ServerEvent::Output { data } => {
                            output.write_all(&data).await?;
                            output.flush().await?;
                        }
                        ServerEvent::Progress { text } => on_progress(&text),
                        ServerEvent::Error { kind: ErrorKind::Process, message } => {
                            print_error(&message);
                            shell_exit = Some(message);
                        }
                        ServerEvent::Error { message, .. } => print_error(&message),
                        other => tracing::debug!("Ignoring {:?}", other),
                    },
                    Some(Ok(Frame::Invalid { reason })) => {
                        tracing::warn!("Ignoring invalid event from daemon: {}", reason)
                    }
                    Some(Err(e)) => return Err(e).context("Failed to read from daemon"),
                    None => break,
                },
            }
        }

        output.flush().await?;
        Ok(match shell_exit {
            Some(message) => SessionEnd::ShellExited(message),
            None if !input_open => SessionEnd::Disconnected,
            None => SessionEnd::Closed,
        })
    }
}
