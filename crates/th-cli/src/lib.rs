//! th-cli: Command-line interface for termhost
//!
//! Provides the `termhost` binary: runs the daemon, opens line-mode
//! sessions against it, lists servers and manages configuration.

pub mod client;
pub mod commands;
pub mod output;
