//! Per-connection lifecycle
//!
//! A connection moves through four phases:
//!
//! 1. **Authenticate**: `authenticate` or `login`; nothing else is accepted
//!    and a failed attempt closes the connection.
//! 2. **Select**: `select_server` (or `list_servers`) until a descriptor the
//!    identity owns is resolved.
//! 3. **Provision**: ensure the working root and, for repository servers,
//!    run the pipeline while relaying its progress. Commands are refused
//!    until it finishes; a disconnect cancels it.
//! 4. **Relay**: commands go through the sandbox guard into the shell and
//!    shell output comes back verbatim until either side goes away.
//!
//! Once a shell has been spawned, every way out of the relay leads to a
//! single `terminate()` call before the connection returns.

use std::convert::Infallible;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Sleep;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use th_core::{Identity, IdentityId, ServerDescriptor, ServerId, ServerKind, SessionError};
use th_protocol::{ClientEvent, ErrorKind, Frame, ServerCodec, ServerEvent};

use crate::orchestrator::{ensure_working_root, SessionOrchestrator};
use crate::pipeline::{PipelineEvent, StageOutcome};
use crate::process::{OutputStream, ProcessSession};
use crate::sandbox::{CommandVerdict, SandboxGuard};

/// How long to wait for trailing output after the shell exits
const OUTPUT_DRAIN: Duration = Duration::from_millis(100);

/// Why a connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEnd {
    /// The peer closed the stream
    PeerClosed,
    /// The peer sent `disconnect`
    Disconnected,
    /// Authentication was attempted and failed
    AuthFailed,
    /// The working root or shell could not be set up
    SpawnFailed,
    /// The shell exited on its own with this code
    ProcessExited(Option<i32>),
    /// The server is shutting down
    Shutdown,
    /// Reading or writing the stream failed
    Transport(String),
}

/// What happened on a finished connection
#[derive(Debug, Clone)]
pub struct ConnectionSummary {
    pub identity: Option<IdentityId>,
    pub server_id: Option<ServerId>,
    /// Shell process ID, if one was spawned
    pub pid: Option<u32>,
    pub end: ConnectionEnd,
    /// Times the shell was asked to terminate (1 whenever a shell was spawned)
    pub termination_requests: u32,
}

impl ConnectionSummary {
    fn new() -> Self {
        Self {
            identity: None,
            server_id: None,
            pid: None,
            end: ConnectionEnd::PeerClosed,
            termination_requests: 0,
        }
    }

    fn ended(mut self, end: ConnectionEnd) -> Self {
        self.end = end;
        self
    }
}

pub(crate) struct Connection<'a, S> {
    orchestrator: &'a SessionOrchestrator,
    framed: Framed<S, ServerCodec>,
    cancel: CancellationToken,
}

impl<'a, S> Connection<'a, S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub(crate) fn new(orchestrator: &'a SessionOrchestrator, stream: S, cancel: CancellationToken) -> Self {
        let codec = ServerCodec::with_max_length(orchestrator.config().max_frame_length);
        Self {
            orchestrator,
            framed: Framed::new(stream, codec),
            cancel,
        }
    }

    pub(crate) async fn run(mut self) -> ConnectionSummary {
        let summary = self.establish().await;
        if let Err(e) = SinkExt::<ServerEvent>::close(&mut self.framed).await {
            tracing::debug!("Error closing connection: {}", e);
        }
        summary
    }

    async fn establish(&mut self) -> ConnectionSummary {
        let mut summary = ConnectionSummary::new();

        let identity = match self.authenticate().await {
            Ok(identity) => identity,
            Err(end) => return summary.ended(end),
        };
        summary.identity = Some(identity.id.clone());

        let descriptor = match self.select_server(&identity).await {
            Ok(descriptor) => descriptor,
            Err(end) => return summary.ended(end),
        };
        summary.server_id = Some(descriptor.id.clone());

        let start_command = match self.provision(&descriptor).await {
            Ok(start_command) => start_command,
            Err(end) => return summary.ended(end),
        };

        let mut session = match self.orchestrator.start_process(&descriptor) {
            Ok(session) => session,
            Err(e) => {
                tracing::error!("Failed to start shell for {}: {}", identity.id, e);
                // The connection is closing either way
                let _ = self.send_error(&e).await;
                return summary.ended(ConnectionEnd::SpawnFailed);
            }
        };
        summary.pid = session.pid();

        let end = match self.greet(&descriptor, &session).await {
            Ok(()) => self.relay(&descriptor, &mut session, start_command).await,
            Err(end) => end,
        };

        session.terminate().await;
        summary.termination_requests = session.termination_requests();

        tracing::info!(
            "Session for {} on {} ended: {:?}",
            identity.id,
            descriptor.id,
            end
        );
        summary.ended(end)
    }

    async fn authenticate(&mut self) -> Result<Identity, ConnectionEnd> {
        loop {
            match self.next_event().await? {
                ClientEvent::Authenticate { token } => {
                    return match self.orchestrator.authenticate(&token).await {
                        Ok(identity) => {
                            self.send(ServerEvent::auth_ok(None)).await?;
                            Ok(identity)
                        }
                        Err(e) => {
                            self.send(ServerEvent::auth_failed(e.to_string())).await?;
                            Err(ConnectionEnd::AuthFailed)
                        }
                    };
                }
                ClientEvent::Login { username, password } => {
                    return match self.orchestrator.login(&username, &password).await {
                        Ok((identity, token)) => {
                            self.send(ServerEvent::auth_ok(Some(token))).await?;
                            Ok(identity)
                        }
                        Err(e) => {
                            self.send(ServerEvent::auth_failed(e.to_string())).await?;
                            Err(ConnectionEnd::AuthFailed)
                        }
                    };
                }
                ClientEvent::Ping => self.send(ServerEvent::Pong).await?,
                ClientEvent::Disconnect => return Err(ConnectionEnd::Disconnected),
                _ => self.reject(ErrorKind::Auth, "authenticate first").await?,
            }
        }
    }

    async fn select_server(&mut self, identity: &Identity) -> Result<ServerDescriptor, ConnectionEnd> {
        loop {
            match self.next_event().await? {
                ClientEvent::SelectServer { server_id } => {
                    match self
                        .orchestrator
                        .resolve_target(identity, server_id.as_deref())
                        .await
                    {
                        Ok(descriptor) => {
                            tracing::info!("{} selected {}", identity.id, descriptor.id);
                            return Ok(descriptor);
                        }
                        Err(e) => self.send_error(&e).await?,
                    }
                }
                ClientEvent::ListServers => match self.orchestrator.list_servers(identity).await {
                    Ok(servers) => self.send(ServerEvent::Servers { servers }).await?,
                    Err(e) => self.send_error(&e).await?,
                },
                ClientEvent::Ping => self.send(ServerEvent::Pong).await?,
                ClientEvent::Disconnect => return Err(ConnectionEnd::Disconnected),
                ClientEvent::Command { .. } => {
                    self.reject(ErrorKind::Protocol, "select a server first").await?
                }
                ClientEvent::Authenticate { .. } | ClientEvent::Login { .. } => {
                    self.reject(ErrorKind::Protocol, "already authenticated").await?
                }
            }
        }
    }

    /// Prepare the working root and run the pipeline; yields the start command
    async fn provision(&mut self, descriptor: &ServerDescriptor) -> Result<Option<String>, ConnectionEnd> {
        if let Err(e) = ensure_working_root(&descriptor.working_root).await {
            tracing::error!("{}", e);
            let _ = self.send_error(&e).await;
            return Err(ConnectionEnd::SpawnFailed);
        }

        if descriptor.kind != ServerKind::Repository {
            return Ok(None);
        }

        let cancel = self.cancel.child_token();
        // Leaving this function for any reason stops the pipeline
        let _stop_pipeline = cancel.clone().drop_guard();
        let mut run = self.orchestrator.pipeline().provision(descriptor, cancel);

        loop {
            tokio::select! {
                event = run.next() => match event {
                    Some(PipelineEvent::Ready { start_command }) => {
                        let ready = PipelineEvent::Ready { start_command: start_command.clone() };
                        self.send(ServerEvent::progress(ready.progress_line())).await?;
                        return Ok(start_command);
                    }
                    Some(event) => self.report(&event).await?,
                    None => {
                        tracing::warn!("Pipeline for {} stopped before ready", descriptor.id);
                        return Ok(None);
                    }
                },
                event = self.next_event() => match event? {
                    ClientEvent::Disconnect => return Err(ConnectionEnd::Disconnected),
                    ClientEvent::Ping => self.send(ServerEvent::Pong).await?,
                    _ => self.reject(ErrorKind::Protocol, "server is still provisioning").await?,
                },
            }
        }
    }

    async fn report(&mut self, event: &PipelineEvent) -> Result<(), ConnectionEnd> {
        self.send(ServerEvent::progress(event.progress_line())).await?;

        if let PipelineEvent::Finished {
            stage,
            outcome: StageOutcome::Failure,
            detail,
        } = event
        {
            let err = SessionError::Provisioning {
                stage: stage.to_string(),
                detail: detail.lines().next().unwrap_or_default().to_string(),
            };
            tracing::warn!("{}", err);
            self.send_error(&err).await?;
        }
        Ok(())
    }

    async fn greet(&mut self, descriptor: &ServerDescriptor, session: &ProcessSession) -> Result<(), ConnectionEnd> {
        self.send(ServerEvent::SessionInfo(descriptor.session_info(session.pid())))
            .await?;
        self.send(ServerEvent::progress(format!(
            "Connected to termhost\nSession assigned: {}\nWorking directory: {}",
            descriptor.display_name,
            descriptor.working_root.display()
        )))
        .await
    }

    async fn relay(
        &mut self,
        descriptor: &ServerDescriptor,
        session: &mut ProcessSession,
        start_command: Option<String>,
    ) -> ConnectionEnd {
        match self.relay_loop(descriptor, session, start_command).await {
            Ok(never) => match never {},
            Err(end) => end,
        }
    }

    async fn relay_loop(
        &mut self,
        descriptor: &ServerDescriptor,
        session: &mut ProcessSession,
        start_command: Option<String>,
    ) -> Result<Infallible, ConnectionEnd> {
        let Some(mut output) = session.take_output() else {
            return Err(ConnectionEnd::Transport("shell output unavailable".to_string()));
        };
        let mut guard = SandboxGuard::new(session.working_root());
        let orchestrator = self.orchestrator;
        let pipeline = orchestrator.pipeline().config();
        let start_token = pipeline.start_token.clone();

        let mut start_timer: Option<Pin<Box<Sleep>>> = start_command
            .as_ref()
            .map(|_| Box::pin(tokio::time::sleep(pipeline.start_delay)));
        let mut output_open = true;

        loop {
            tokio::select! {
                chunk = output.recv(), if output_open => match chunk {
                    Some(chunk) => {
                        tracing::trace!("Relaying {} bytes to {}", chunk.len(), descriptor.owner_id);
                        self.send(ServerEvent::output(chunk.to_vec())).await?;
                    }
                    None => output_open = false,
                },
                code = session.wait(), if session.is_running() => {
                    self.drain(&mut output).await?;
                    let message = match code {
                        Some(code) => format!("shell exited with status {}", code),
                        None => "shell was terminated by a signal".to_string(),
                    };
                    self.reject(ErrorKind::Process, &message).await?;
                    return Err(ConnectionEnd::ProcessExited(code));
                },
                () = fire(&mut start_timer) => {
                    start_timer = None;
                    if let Some(command) = &start_command {
                        self.send(ServerEvent::progress(format!("[start] {}", command))).await?;
                        self.dispatch(command, &mut guard, session).await?;
                    }
                },
                event = self.next_event() => match event? {
                    ClientEvent::Command { text } if text.trim() == start_token => {
                        match descriptor.start() {
                            Some(command) => self.dispatch(command, &mut guard, session).await?,
                            None => {
                                self.reject(ErrorKind::Protocol, "this server has no start command")
                                    .await?
                            }
                        }
                    }
                    ClientEvent::Command { text } => self.dispatch(&text, &mut guard, session).await?,
                    ClientEvent::Disconnect => return Err(ConnectionEnd::Disconnected),
                    ClientEvent::Ping => self.send(ServerEvent::Pong).await?,
                    _ => self.reject(ErrorKind::Protocol, "a session is already running").await?,
                },
            }
        }
    }

    /// Pass a command line through the sandbox guard into the shell
    async fn dispatch(
        &mut self,
        line: &str,
        guard: &mut SandboxGuard,
        session: &mut ProcessSession,
    ) -> Result<(), ConnectionEnd> {
        if let CommandVerdict::Denied { requested } = guard.check_command(line) {
            let err = SessionError::SandboxViolation {
                requested,
                root: guard.root().to_path_buf(),
            };
            tracing::warn!("Dropped command from {}: {}", session.owner_id(), err);
            return self.send_error(&err).await;
        }

        if let Err(e) = session.send_line(line).await {
            self.send_error(&e).await?;
        }
        Ok(())
    }

    /// Forward output still buffered after the shell exited
    async fn drain(&mut self, output: &mut OutputStream) -> Result<(), ConnectionEnd> {
        while let Ok(Some(chunk)) = tokio::time::timeout(OUTPUT_DRAIN, output.recv()).await {
            self.send(ServerEvent::output(chunk.to_vec())).await?;
        }
        Ok(())
    }

    /// Next valid event from the peer
    ///
    /// Malformed lines are answered with a protocol error and skipped.
    async fn next_event(&mut self) -> Result<ClientEvent, ConnectionEnd> {
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => return Err(ConnectionEnd::Shutdown),
                frame = self.framed.next() => frame,
            };

            match frame {
                Some(Ok(Frame::Event(event))) => return Ok(event),
                Some(Ok(Frame::Invalid { reason })) => {
                    tracing::debug!("Invalid event: {}", reason);
                    self.reject(ErrorKind::Protocol, &format!("invalid event: {}", reason))
                        .await?;
                }
                Some(Err(e)) => {
                    let _ = self.reject(ErrorKind::Protocol, &e.to_string()).await;
                    return Err(ConnectionEnd::Transport(e.to_string()));
                }
                None => return Err(ConnectionEnd::PeerClosed),
            }
        }
    }

    async fn send(&mut self, event: ServerEvent) -> Result<(), ConnectionEnd> {
        self.framed
            .send(event)
            .await
            .map_err(|e| ConnectionEnd::Transport(e.to_string()))
    }

    async fn send_error(&mut self, err: &SessionError) -> Result<(), ConnectionEnd> {
        self.send(ServerEvent::error(err.kind(), err.to_string())).await
    }

    async fn reject(&mut self, kind: ErrorKind, message: &str) -> Result<(), ConnectionEnd> {
        self.send(ServerEvent::error(kind, message)).await
    }
}

/// Resolve when the timer fires; never if there is none
async fn fire(timer: &mut Option<Pin<Box<Sleep>>>) {
    match timer {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
