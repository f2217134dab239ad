//! Server (orchestrator daemon) configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};

/// Configuration for the termhost daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to accept peer connections on
    pub bind_address: String,

    /// Directory holding per-identity and per-server working roots
    pub sessions_dir: PathBuf,

    /// TOML file with identities and server descriptors
    pub accounts_path: Option<PathBuf>,

    /// Shell to spawn for sessions (defaults to `$SHELL`, then `/bin/sh`)
    pub shell: Option<String>,

    /// Extra environment variables for sessions
    pub env: Vec<(String, String)>,

    /// Maximum length of a single inbound event line, in bytes
    pub max_frame_length: usize,

    /// Provisioning pipeline settings
    pub pipeline: PipelineConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            sessions_dir: super::default_data_dir().join("sessions"),
            accounts_path: None,
            shell: None,
            env: vec![("TERM".to_string(), "xterm-color".to_string())],
            max_frame_length: th_protocol::DEFAULT_MAX_FRAME_LENGTH,
            pipeline: PipelineConfig::default(),
        }
    }
}

/// Provisioning pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Program used to clone repositories
    pub git_program: String,

    /// Upper bound on a single clone or build step
    #[serde(with = "duration_secs")]
    pub step_timeout: Duration,

    /// Maximum bytes of step output kept for the progress report
    pub max_step_output: usize,

    /// Delay between the shell starting and the start command being injected
    #[serde(rename = "start_delay_ms", with = "duration_millis")]
    pub start_delay: Duration,

    /// Reserved command that injects the server's start command
    pub start_token: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            git_program: "git".to_string(),
            step_timeout: Duration::from_secs(600),
            max_step_output: 64 * 1024,
            start_delay: Duration::from_millis(1000),
            start_token: "!start".to_string(),
        }
    }
}
