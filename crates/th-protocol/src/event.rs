//! Event types for the termhost connection protocol
//!
//! Every connection carries a sequence of [`ClientEvent`]s from the peer and a
//! sequence of [`ServerEvent`]s back. Events are JSON objects tagged by a
//! `type` field, one per line.
//!
//! # Event Flow
//!
//! A typical connection:
//!
//! 1. Peer sends `authenticate` (or `login`), server answers `auth_result`
//! 2. Peer sends `select_server`; a repository-backed server emits `progress`
//!    lines while it is provisioned
//! 3. Server sends `session_info` once the shell is running
//! 4. Peer sends `command` events, server streams `output` events
//! 5. Peer sends `disconnect` (or drops the connection) and the shell is
//!    terminated

use serde::{Deserialize, Serialize};
use std::fmt;

/// Event sent from the peer to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Present an access token
    Authenticate { token: String },

    /// Exchange a username and password for a fresh access token.
    ///
    /// A successful login invalidates the identity's previous token.
    Login { username: String, password: String },

    /// Select the server to open a session on.
    ///
    /// `None` selects the identity's implicit shell workspace.
    SelectServer {
        #[serde(default)]
        server_id: Option<String>,
    },

    /// List the servers owned by the authenticated identity
    ListServers,

    /// A command line for the shell
    Command { text: String },

    /// Keepalive
    Ping,

    /// Stop the session and close the connection
    Disconnect,
}

impl ClientEvent {
    /// Build a command event
    pub fn command(text: impl Into<String>) -> Self {
        ClientEvent::Command { text: text.into() }
    }

    /// Build an authenticate event
    pub fn authenticate(token: impl Into<String>) -> Self {
        ClientEvent::Authenticate {
            token: token.into(),
        }
    }
}

/// Event sent from the orchestrator to the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Result of `authenticate` or `login`
    AuthResult {
        ok: bool,
        /// Freshly issued token (login only)
        #[serde(default, skip_serializing_if = "Option::is_none")]
        token: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Human-readable provisioning or lifecycle line
    Progress { text: String },

    /// Raw bytes produced by the shell (stdout and stderr, in arrival order)
    Output { data: Vec<u8> },

    /// The session is running
    SessionInfo(SessionInfo),

    /// Servers owned by the identity
    Servers { servers: Vec<ServerSummary> },

    /// Typed error
    Error { kind: ErrorKind, message: String },

    /// Pong response
    Pong,
}

impl ServerEvent {
    /// Build a progress event
    pub fn progress(text: impl Into<String>) -> Self {
        ServerEvent::Progress { text: text.into() }
    }

    /// Build an output event
    pub fn output(data: impl Into<Vec<u8>>) -> Self {
        ServerEvent::Output { data: data.into() }
    }

    /// Build an error event
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        ServerEvent::Error {
            kind,
            message: message.into(),
        }
    }

    /// Successful authentication
    pub fn auth_ok(token: Option<String>) -> Self {
        ServerEvent::AuthResult {
            ok: true,
            token,
            error: None,
        }
    }

    /// Failed authentication
    pub fn auth_failed(reason: impl Into<String>) -> Self {
        ServerEvent::AuthResult {
            ok: false,
            token: None,
            error: Some(reason.into()),
        }
    }
}

/// Error category carried by [`ServerEvent::Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing, unknown or stale credentials
    Auth,
    /// The identity does not own the requested server
    Authorization,
    /// The requested server does not exist
    NotFound,
    /// A provisioning stage failed (the session still starts)
    Provisioning,
    /// A change-directory request left the working root and was dropped
    SandboxViolation,
    /// The shell process could not be spawned or exited
    Process,
    /// The event was malformed or not valid in the current phase
    Protocol,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Auth => write!(f, "auth"),
            ErrorKind::Authorization => write!(f, "authorization"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Provisioning => write!(f, "provisioning"),
            ErrorKind::SandboxViolation => write!(f, "sandbox_violation"),
            ErrorKind::Process => write!(f, "process"),
            ErrorKind::Protocol => write!(f, "protocol"),
        }
    }
}

/// Kind of workspace a server provides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerKind {
    /// Plain interactive shell
    Shell,
    /// Shell over a cloned and built repository
    Repository,
}

impl fmt::Display for ServerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerKind::Shell => write!(f, "shell"),
            ServerKind::Repository => write!(f, "repository"),
        }
    }
}

/// Descriptor subset sent once a session is running
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// Server the session was opened on
    pub server_id: String,
    /// Display name of the server
    pub display_name: String,
    /// Kind of server
    pub kind: ServerKind,
    /// Directory the shell is rooted in
    pub working_root: String,
    /// Process ID of the shell
    pub pid: Option<u32>,
}

/// Entry in a server listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerSummary {
    pub id: String,
    pub display_name: String,
    pub kind: ServerKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_wire_format() {
        let event = ClientEvent::command("ls -la");
        let json = serde_json::to_string(&event).unwrap();
        assert_eq!(json, r#"{"type":"command","text":"ls -la"}"#);
    }

    #[test]
    fn test_select_server_without_id() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"select_server"}"#).unwrap();
        assert_eq!(event, ClientEvent::SelectServer { server_id: None });
    }

    #[test]
    fn test_auth_result_omits_empty_fields() {
        let json = serde_json::to_string(&ServerEvent::auth_ok(None)).unwrap();
        assert_eq!(json, r#"{"type":"auth_result","ok":true}"#);
    }

    #[test]
    fn test_session_info_is_flattened_into_tag() {
        let event = ServerEvent::SessionInfo(SessionInfo {
            server_id: "srv-1".to_string(),
            display_name: "api".to_string(),
            kind: ServerKind::Repository,
            working_root: "/srv/sessions/alice/srv-1".to_string(),
            pid: Some(42),
        });

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""type":"session_info""#));
        assert!(json.contains(r#""kind":"repository""#));
        assert!(json.contains(r#""workingRoot""#));

        let decoded: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn test_error_kind_display_matches_wire_name() {
        for kind in [
            ErrorKind::Auth,
            ErrorKind::SandboxViolation,
            ErrorKind::NotFound,
        ] {
            let wire = serde_json::to_string(&kind).unwrap();
            assert_eq!(wire.trim_matches('"'), kind.to_string());
        }
    }
}
