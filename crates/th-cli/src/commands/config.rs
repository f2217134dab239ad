//! Config command implementations

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::output::{print_error, print_info, print_success, print_warning};
use th_core::config::{self, ServerConfig};

fn resolve_path(config_path: Option<&PathBuf>) -> PathBuf {
    config_path
        .cloned()
        .unwrap_or_else(config::default_config_path)
}

/// Print the config file path
pub fn config_path(config_path: Option<&PathBuf>) {
    println!("{}", resolve_path(config_path).display());
}

/// Show the configuration file, or the defaults if there is none
pub fn config_show(config_path: Option<&PathBuf>) -> Result<()> {
    let path = resolve_path(config_path);

    if !path.exists() {
        print_warning(&format!("No configuration file found at {:?}", path));
        print_info("Run 'termhost config init' to create one. Defaults:");
        println!("{}", toml::to_string_pretty(&ServerConfig::default())?);
        return Ok(());
    }

    // Parse first so a broken file is reported rather than echoed
    let _: ServerConfig = config::load_config(&path)
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    print_info(&format!("Configuration file: {:?}", path));
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;
    println!("{}", content);

    Ok(())
}

/// Write a commented default configuration
pub fn config_init(config_path: Option<&PathBuf>, force: bool) -> Result<()> {
    let path = resolve_path(config_path);

    if path.exists() && !force {
        print_error(&format!("Config file already exists: {:?}", path));
        print_info("Use --force to overwrite");
        return Ok(());
    }

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if !dir.exists() {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory: {:?}", dir))?;
            print_success(&format!("Created config directory: {:?}", dir));
        }
    }

    std::fs::write(&path, generate_default_config(&ServerConfig::default()))
        .with_context(|| format!("Failed to write config file: {:?}", path))?;

    print_success(&format!("Created configuration file: {:?}", path));
    print_info("Point accounts_path at an accounts file to allow connections");
    Ok(())
}

/// Generate default configuration content
fn generate_default_config(defaults: &ServerConfig) -> String {
    let pipeline = &defaults.pipeline;
    format!(
        r#"# termhost configuration

# Address to accept connections on
bind_address = "{bind}"

# Directory holding session working roots
sessions_dir = "{sessions}"

# Identities and servers (see `termhost hash-password`)
# accounts_path = "{accounts}"

# Shell for sessions (defaults to $SHELL, then /bin/sh)
# shell = "/bin/bash"

# Longest accepted event line, in bytes
max_frame_length = {max_frame}

[pipeline]
git_program = "{git}"
# Seconds a clone or build step may run
step_timeout = {timeout}
# Bytes of step output kept for progress reports
max_step_output = {max_output}
# Delay before the start command is sent to a new shell
start_delay_ms = {delay}
# Command that re-sends the start command
start_token = "{token}"
"#,
        bind = defaults.bind_address,
        sessions = toml_path(&defaults.sessions_dir),
        accounts = toml_path(&config::default_config_dir().join("accounts.toml")),
        max_frame = defaults.max_frame_length,
        git = pipeline.git_program,
        timeout = pipeline.step_timeout.as_secs(),
        max_output = pipeline.max_step_output,
        delay = pipeline.start_delay.as_millis(),
        token = pipeline.start_token,
    )
}

fn toml_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "\\\\")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses_back() {
        let defaults = ServerConfig::default();
        let parsed: ServerConfig = toml::from_str(&generate_default_config(&defaults)).unwrap();

        assert_eq!(parsed.bind_address, defaults.bind_address);
        assert_eq!(parsed.sessions_dir, defaults.sessions_dir);
        assert!(parsed.accounts_path.is_none());
        assert_eq!(parsed.pipeline.step_timeout, defaults.pipeline.step_timeout);
        assert_eq!(parsed.pipeline.start_delay, defaults.pipeline.start_delay);
        assert_eq!(parsed.pipeline.start_token, "!start");
    }

    #[test]
    fn test_init_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        config_init(Some(&path), false).unwrap();
        std::fs::write(&path, "bind_address = \"127.0.0.1:1\"\n").unwrap();

        config_init(Some(&path), false).unwrap();
        assert!(std::fs::read_to_string(&path).unwrap().contains("127.0.0.1:1"));

        config_init(Some(&path), true).unwrap();
        assert!(!std::fs::read_to_string(&path).unwrap().contains("127.0.0.1:1"));
    }
}
