//! Session orchestrator
//!
//! Shared by every connection task. Holds the collaborators and settings
//! needed to turn a token and a server choice into a running shell; the
//! per-connection lifecycle itself lives in [`crate::connection`].

use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::sync::CancellationToken;

use th_core::config::ServerConfig;
use th_core::traits::{IdentityStore, ServerRegistry};
use th_core::{Identity, ServerDescriptor, ServerId, SessionError, StoreError};
use th_protocol::ServerSummary;

use crate::connection::{Connection, ConnectionSummary};
use crate::pipeline::Pipeline;
use crate::process::{ProcessSession, ShellSpec};

/// Turns authenticated connections into shell sessions
pub struct SessionOrchestrator {
    config: ServerConfig,
    identities: Arc<dyn IdentityStore>,
    registry: Arc<dyn ServerRegistry>,
    shell: ShellSpec,
    pipeline: Pipeline,
}

impl SessionOrchestrator {
    /// Create an orchestrator
    ///
    /// Fails if the configured shell is not allowed.
    pub fn new(
        config: ServerConfig,
        identities: Arc<dyn IdentityStore>,
        registry: Arc<dyn ServerRegistry>,
    ) -> Result<Self, SessionError> {
        let shell = ShellSpec::from_config(&config)?;
        let pipeline = Pipeline::new(config.pipeline.clone());
        Ok(Self {
            config,
            identities,
            registry,
            shell,
            pipeline,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Resolve a presented token to an identity
    ///
    /// Has no side effects beyond the store lookup.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, SessionError> {
        if token.trim().is_empty() {
            return Err(SessionError::Authentication("missing token".to_string()));
        }

        match self.identities.resolve(token).await {
            Ok(identity) => {
                tracing::info!("Authenticated {}", identity.id);
                Ok(identity)
            }
            Err(StoreError::NotFound(_)) => {
                tracing::warn!("Rejected unknown or stale token");
                Err(SessionError::Authentication(
                    "unknown or expired token".to_string(),
                ))
            }
            Err(e) => Err(SessionError::Authentication(e.to_string())),
        }
    }

    /// Verify a username/password and issue a fresh token
    pub async fn login(
        &self,
        username: &str,
        password: &str,
    ) -> Result<(Identity, String), SessionError> {
        let token = self
            .identities
            .login(username, password)
            .await
            .map_err(|e| match e {
                StoreError::InvalidCredentials => {
                    SessionError::Authentication("invalid username or password".to_string())
                }
                other => SessionError::Authentication(other.to_string()),
            })?;

        let identity = self.authenticate(&token).await?;
        Ok((identity, token))
    }

    /// Servers an identity may select, its implicit shell first
    pub async fn list_servers(&self, identity: &Identity) -> Result<Vec<ServerSummary>, SessionError> {
        let owned = self
            .registry
            .list_for_owner(&identity.id)
            .await
            .map_err(|e| SessionError::ServerNotFound(e.to_string()))?;

        let mut servers = Vec::with_capacity(owned.len() + 1);
        servers.push(self.implicit_descriptor(identity).summary());
        servers.extend(owned.iter().map(ServerDescriptor::summary));
        Ok(servers)
    }

    /// Resolve the descriptor a session should run on
    ///
    /// `None`, or the identity's implicit ID, selects the implicit shell
    /// workspace. Anything else is looked up in the registry and must be
    /// owned by `identity`.
    pub async fn resolve_target(
        &self,
        identity: &Identity,
        server_id: Option<&str>,
    ) -> Result<ServerDescriptor, SessionError> {
        let implicit = ServerId::implicit_for(&identity.id);
        let requested = match server_id.map(str::trim).filter(|s| !s.is_empty()) {
            None => return Ok(self.implicit_descriptor(identity)),
            Some(id) if id == implicit.as_str() => return Ok(self.implicit_descriptor(identity)),
            Some(id) => ServerId::new(id),
        };

        let descriptor = self.registry.get(&requested).await.map_err(|e| match e {
            StoreError::NotFound(_) => SessionError::ServerNotFound(requested.to_string()),
            other => SessionError::ServerNotFound(other.to_string()),
        })?;

        if descriptor.owner_id != identity.id {
            tracing::warn!(
                "{} tried to open server {} owned by {}",
                identity.id,
                descriptor.id,
                descriptor.owner_id
            );
            return Err(SessionError::Authorization {
                identity: identity.id.to_string(),
                server_id: descriptor.id.to_string(),
            });
        }

        // An ownership record in the identity store must agree with the registry
        match self.identities.owner_of(&descriptor.id).await {
            Ok(owner) if owner.id == identity.id => {}
            Err(StoreError::NotFound(_)) => {}
            Ok(owner) => {
                tracing::warn!(
                    "Server {} is registered to {} but recorded as owned by {}",
                    descriptor.id,
                    descriptor.owner_id,
                    owner.id
                );
                return Err(SessionError::Authorization {
                    identity: identity.id.to_string(),
                    server_id: descriptor.id.to_string(),
                });
            }
            Err(e) => {
                tracing::warn!("Ownership lookup for {} failed: {}", descriptor.id, e);
                return Err(SessionError::Authorization {
                    identity: identity.id.to_string(),
                    server_id: descriptor.id.to_string(),
                });
            }
        }

        Ok(descriptor)
    }

    /// Spawn the shell for a descriptor whose working root exists
    pub fn start_process(&self, descriptor: &ServerDescriptor) -> Result<ProcessSession, SessionError> {
        ProcessSession::start(&self.shell, descriptor)
    }

    /// Drive one connection from authentication to teardown
    pub async fn serve<S>(&self, stream: S, cancel: CancellationToken) -> ConnectionSummary
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        Connection::new(self, stream, cancel).run().await
    }

    fn implicit_descriptor(&self, identity: &Identity) -> ServerDescriptor {
        ServerDescriptor::implicit_shell(&identity.id, &self.config.sessions_dir)
    }
}

/// Create a working root if it does not exist yet
///
/// Safe to call repeatedly and concurrently for the same path.
pub async fn ensure_working_root(path: &Path) -> Result<(), SessionError> {
    tokio::fs::create_dir_all(path).await.map_err(|e| {
        SessionError::Process(format!(
            "cannot create working root {}: {}",
            path.display(),
            e
        ))
    })?;

    if !tokio::fs::metadata(path).await?.is_dir() {
        return Err(SessionError::Process(format!(
            "working root {} is not a directory",
            path.display()
        )));
    }
    Ok(())
}
