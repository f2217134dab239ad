//! Daemon bootstrap shared by `termhostd` and `termhost serve`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use th_core::config::{self, ServerConfig};
use th_core::store::{Accounts, AccountsFile, MemoryIdentityStore, MemoryRegistry};

use crate::orchestrator::SessionOrchestrator;
use crate::server::TermhostServer;

/// Initialize logging, preferring `RUST_LOG` over `level`
pub fn init_logging(level: &str) {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load the daemon configuration
///
/// An explicit path must load. Without one the default location is tried
/// and defaults are used if it is missing or unreadable.
pub fn load_server_config(path: Option<&Path>) -> Result<ServerConfig> {
    if let Some(config_path) = path {
        return config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            ServerConfig::default()
        }))
    } else {
        tracing::info!("Using default configuration");
        Ok(ServerConfig::default())
    }
}

/// Load the identity store and registry named by the config
pub fn load_accounts(config: &ServerConfig) -> Result<Accounts> {
    let Some(path) = &config.accounts_path else {
        tracing::warn!("No accounts file configured - all connections will be rejected");
        return Ok(Accounts {
            identities: MemoryIdentityStore::new(),
            registry: MemoryRegistry::new(&config.sessions_dir),
        });
    };

    let accounts = AccountsFile::load(path)
        .with_context(|| format!("Failed to load accounts from {:?}", path))?
        .into_stores(&config.sessions_dir)
        .with_context(|| format!("Invalid accounts file {:?}", path))?;

    if accounts.identities.is_empty() {
        tracing::warn!("Accounts file has no identities - all connections will be rejected");
    }
    Ok(accounts)
}

/// Build an orchestrator backed by the configured accounts
pub fn build_orchestrator(config: ServerConfig) -> Result<SessionOrchestrator> {
    let accounts = load_accounts(&config)?;
    std::fs::create_dir_all(&config.sessions_dir)
        .with_context(|| format!("Failed to create sessions dir {:?}", config.sessions_dir))?;

    let orchestrator = SessionOrchestrator::new(
        config,
        Arc::new(accounts.identities),
        Arc::new(accounts.registry),
    )?;
    Ok(orchestrator)
}

/// Cancel `cancel` on Ctrl+C or SIGTERM
pub fn shutdown_on_signal(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}

/// Run the daemon until `cancel` fires
pub async fn run(config: ServerConfig, cancel: CancellationToken) -> Result<()> {
    let bind_address = config.bind_address.clone();
    tracing::info!("Sessions directory: {}", config.sessions_dir.display());

    let orchestrator = Arc::new(build_orchestrator(config)?);
    let server = TermhostServer::bind(&bind_address, orchestrator, cancel).await?;
    server.run().await?;

    tracing::info!("termhost shutdown complete");
    Ok(())
}
