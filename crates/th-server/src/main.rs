//! termhost daemon
//!
//! Accepts peer connections and gives each authenticated identity a shell
//! rooted in its own working directory.

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;

use th_server::daemon;

#[derive(Parser)]
#[command(name = "termhostd")]
#[command(about = "termhost session orchestrator daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Accounts file (overrides config)
    #[arg(short, long)]
    accounts: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.foreground { "debug" } else { &args.log_level };
    daemon::init_logging(log_level);

    tracing::info!("termhost daemon starting...");

    let mut config = daemon::load_server_config(args.config.as_deref())?;

    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(accounts) = args.accounts {
        config.accounts_path = Some(accounts);
    }

    let cancel = CancellationToken::new();
    daemon::shutdown_on_signal(cancel.clone());

    daemon::run(config, cancel).await
}
