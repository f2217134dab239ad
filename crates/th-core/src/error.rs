//! Core error types for termhost

use std::path::PathBuf;

use th_protocol::{ErrorKind, ProtocolError};
use thiserror::Error;

/// Top-level error type for the termhost ecosystem
#[derive(Error, Debug)]
pub enum ThError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Session error
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Identity store or registry error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while establishing or running a session
#[derive(Error, Debug)]
pub enum SessionError {
    /// Bad, missing or stale token
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// The identity does not own the requested server
    #[error("Identity {identity} does not own server {server_id}")]
    Authorization { identity: String, server_id: String },

    /// The requested server does not exist
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// A provisioning stage failed
    #[error("{stage} failed: {detail}")]
    Provisioning { stage: String, detail: String },

    /// A change-directory request resolved outside the working root
    #[error("cd: {requested}: outside of working root {}", root.display())]
    SandboxViolation { requested: String, root: PathBuf },

    /// The shell process could not be spawned or failed
    #[error("Shell process error: {0}")]
    Process(String),

    /// Input was sent to a shell that is no longer running
    #[error("Shell is not running")]
    NotRunning,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Wire category for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Authentication(_) => ErrorKind::Auth,
            SessionError::Authorization { .. } => ErrorKind::Authorization,
            SessionError::ServerNotFound(_) => ErrorKind::NotFound,
            SessionError::Provisioning { .. } => ErrorKind::Provisioning,
            SessionError::SandboxViolation { .. } => ErrorKind::SandboxViolation,
            SessionError::Process(_) | SessionError::NotRunning | SessionError::Io(_) => {
                ErrorKind::Process
            }
        }
    }
}

/// Identity store and server registry errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum StoreError {
    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Username/password did not match
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Record already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Owner already has the maximum number of servers
    #[error("Identity {owner} already owns {cap} servers")]
    CapReached { owner: String, cap: usize },

    /// Record failed validation
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// The store does not support this operation
    #[error("Operation not supported by this store")]
    Unsupported,
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
