//! Shell selection

use std::path::Path;

use th_core::config::ServerConfig;
use th_core::SessionError;

/// Shells that may be spawned without appearing in `/etc/shells`
const ALLOWED_SHELLS: &[&str] = &[
    "/bin/sh",
    "/bin/bash",
    "/bin/zsh",
    "/bin/dash",
    "/bin/ksh",
    "/usr/bin/sh",
    "/usr/bin/bash",
    "/usr/bin/zsh",
    "/usr/bin/dash",
    "/usr/bin/ksh",
    "/usr/local/bin/bash",
    "/usr/local/bin/zsh",
    "/opt/homebrew/bin/bash",
    "/opt/homebrew/bin/zsh",
];

/// Validate that a shell path is allowed and exists
fn validate_shell_path(shell: &str) -> Result<String, SessionError> {
    let listed = ALLOWED_SHELLS.contains(&shell) || in_etc_shells(shell);
    if !listed {
        return Err(SessionError::Process(format!(
            "shell '{}' is not in the allowed shell list",
            shell
        )));
    }

    if !Path::new(shell).exists() {
        return Err(SessionError::Process(format!(
            "shell '{}' does not exist",
            shell
        )));
    }

    Ok(shell.to_string())
}

fn in_etc_shells(shell: &str) -> bool {
    std::fs::read_to_string("/etc/shells")
        .map(|shells| {
            shells.lines().any(|line| {
                let line = line.trim();
                !line.starts_with('#') && line == shell
            })
        })
        .unwrap_or(false)
}

/// The interpreter and base environment every session is spawned with
#[derive(Debug, Clone)]
pub struct ShellSpec {
    program: String,
    env: Vec<(String, String)>,
}

impl ShellSpec {
    /// Pick and validate the shell from configuration
    ///
    /// Order: `shell` from the config, then `$SHELL`, then `/bin/sh`.
    pub fn from_config(config: &ServerConfig) -> Result<Self, SessionError> {
        let requested = config
            .shell
            .clone()
            .or_else(|| std::env::var("SHELL").ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string());

        let program = validate_shell_path(&requested)?;
        tracing::debug!("Using validated shell: {}", program);

        Ok(Self {
            program,
            env: config.env.clone(),
        })
    }

    /// Path of the shell binary
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Extra environment variables
    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unlisted_shell() {
        assert!(matches!(
            validate_shell_path("/tmp/evil/bash"),
            Err(SessionError::Process(_))
        ));
        assert!(validate_shell_path("python3").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_accepts_bin_sh() {
        let config = ServerConfig {
            shell: Some("/bin/sh".to_string()),
            ..ServerConfig::default()
        };
        let spec = ShellSpec::from_config(&config).unwrap();
        assert_eq!(spec.program(), "/bin/sh");
        assert!(spec
            .env()
            .iter()
            .any(|(k, v)| k == "TERM" && v == "xterm-color"));
    }
}
