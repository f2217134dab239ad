//! termhost CLI
//!
//! Single binary for termhost:
//! - Daemon (accepts connections and runs per-identity shells)
//! - Line-mode client (connect, servers)
//! - Account and configuration helpers

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use termhost::client::DEFAULT_ADDRESS;
use termhost::commands::{self, Credentials};
use th_server::daemon;

#[derive(Parser)]
#[command(name = "termhost")]
#[command(author, version, about = "Remote per-identity shell sessions")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Where to reach the daemon and who to be
#[derive(clap::Args)]
struct ClientArgs {
    /// Daemon address
    #[arg(short, long, env = "TERMHOST_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Access token
    #[arg(short, long, env = "TERMHOST_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log in as this user instead of presenting a token
    #[arg(short, long, conflicts_with = "token")]
    user: Option<String>,

    /// Password for --user
    #[arg(long, env = "TERMHOST_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl ClientArgs {
    fn credentials(&self) -> Result<Credentials> {
        Credentials::from_args(self.token.clone(), self.user.clone(), self.password.clone())
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon in the foreground
    Serve {
        /// Bind address (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
        /// Accounts file (overrides config)
        #[arg(long)]
        accounts: Option<PathBuf>,
    },

    /// Open a session and relay stdin lines to its shell
    Connect {
        /// Server to open (defaults to your own shell workspace)
        server: Option<String>,
        #[command(flatten)]
        client: ClientArgs,
    },

    /// List the servers you can open sessions on
    Servers {
        #[command(flatten)]
        client: ClientArgs,
    },

    /// Hash a password for an accounts file
    HashPassword {
        /// Password (read from stdin when omitted)
        password: Option<String>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Show config file path
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) if matches!(cli.command, Commands::Serve { .. }) => "info",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::Serve { bind, accounts } => {
            let mut config = daemon::load_server_config(cli.config.as_deref())?;
            if let Some(bind) = bind {
                config.bind_address = bind;
            }
            if let Some(accounts) = accounts {
                config.accounts_path = Some(accounts);
            }

            let cancel = CancellationToken::new();
            daemon::shutdown_on_signal(cancel.clone());
            daemon::run(config, cancel).await?;
        }

        Commands::Connect { server, client } => {
            let credentials = client.credentials()?;
            commands::connect_command(&client.address, &credentials, server.as_deref()).await?;
        }

        Commands::Servers { client } => {
            let credentials = client.credentials()?;
            commands::servers_command(&client.address, &credentials).await?;
        }

        Commands::HashPassword { password } => {
            commands::hash_password_command(password).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Path => commands::config_path(cli.config.as_ref()),
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
        },
    }

    Ok(())
}
