//! Output formatting utilities for the CLI
//!
//! Tables for server listings, a summary for a freshly opened session, and
//! colored status messages.

use std::io::Write;

use crossterm::style::{Color, Print, ResetColor, SetForegroundColor};
use tabled::{settings::Style, Table, Tabled};

use th_protocol::{ServerSummary, SessionInfo};

/// Format a server listing as an ASCII table
///
/// Returns "No servers" if the list is empty.
pub fn format_servers(servers: &[ServerSummary]) -> String {
    if servers.is_empty() {
        return "No servers".to_string();
    }

    #[derive(Tabled)]
    struct ServerRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "NAME")]
        name: String,
        #[tabled(rename = "KIND")]
        kind: String,
    }

    let rows: Vec<ServerRow> = servers
        .iter()
        .map(|s| ServerRow {
            id: truncate(&s.id, 36),
            name: s.display_name.clone(),
            kind: s.kind.to_string(),
        })
        .collect();

    Table::new(rows).with(Style::rounded()).to_string()
}

/// One-line summary of a running session
pub fn format_session(info: &SessionInfo) -> String {
    format!(
        "Session on {} ({}) in {} (PID: {})",
        info.display_name,
        info.kind,
        info.working_root,
        info.pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    )
}

/// Truncate a string with ellipsis if too long
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

enum Target {
    Stdout,
    Stderr,
}

fn print_styled(target: Target, color: Color, marker: &str, msg: &str) {
    let mut out: Box<dyn Write> = match target {
        Target::Stdout => Box::new(std::io::stdout()),
        Target::Stderr => Box::new(std::io::stderr()),
    };
    // Nothing sensible to do if the terminal is gone
    let _ = crossterm::execute!(
        out,
        SetForegroundColor(color),
        Print(marker),
        ResetColor,
        Print(msg),
        Print("\n")
    );
}

/// Print a success message in green with a checkmark prefix
pub fn print_success(msg: &str) {
    print_styled(Target::Stdout, Color::Green, "✓ ", msg);
}

/// Print an error message in red to stderr
pub fn print_error(msg: &str) {
    print_styled(Target::Stderr, Color::Red, "✗ ", msg);
}

/// Print a warning message in yellow to stderr
pub fn print_warning(msg: &str) {
    print_styled(Target::Stderr, Color::Yellow, "⚠ ", msg);
}

/// Print an informational message in cyan to stderr
///
/// Session commands keep stdout for shell output, so notices go to stderr.
pub fn print_info(msg: &str) {
    print_styled(Target::Stderr, Color::Cyan, "ℹ ", msg);
}

/// Print a provisioning or lifecycle line from the daemon to stderr
pub fn print_progress(text: &str) {
    for line in text.lines() {
        eprintln!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use th_protocol::ServerKind;

    #[test]
    fn test_format_empty_servers() {
        assert_eq!(format_servers(&[]), "No servers");
    }

    #[test]
    fn test_format_servers_table() {
        let servers = vec![
            ServerSummary {
                id: "session_alice".to_string(),
                display_name: "session_alice".to_string(),
                kind: ServerKind::Shell,
            },
            ServerSummary {
                id: "0123456789abcdef0123456789abcdef0123".to_string(),
                display_name: "api".to_string(),
                kind: ServerKind::Repository,
            },
        ];

        let table = format_servers(&servers);
        assert!(table.contains("KIND"));
        assert!(table.contains("session_alice"));
        assert!(table.contains("repository"));
        assert!(table.contains("0123456789abcdef0123456789abcdef0123"));
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghijkl", 8), "abcde...");
    }

    #[test]
    fn test_format_session() {
        let info = SessionInfo {
            server_id: "session_alice".to_string(),
            display_name: "session_alice".to_string(),
            kind: ServerKind::Shell,
            working_root: "/srv/sessions/session_alice".to_string(),
            pid: Some(42),
        };
        assert_eq!(
            format_session(&info),
            "Session on session_alice (shell) in /srv/sessions/session_alice (PID: 42)"
        );
    }
}
