//! Core domain types

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

pub use th_protocol::ServerKind;
use th_protocol::{ServerSummary, SessionInfo};

use crate::error::StoreError;

/// Unique identifier for an identity (its username)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct IdentityId(pub String);

impl IdentityId {
    /// Create a new identity ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Parse a username, rejecting anything unsafe to embed in a path
    pub fn parse(username: &str) -> Result<Self, StoreError> {
        let valid = !username.is_empty()
            && username.len() <= 64
            && !username.starts_with('.')
            && username
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));

        if valid {
            Ok(Self(username.to_string()))
        } else {
            Err(StoreError::Invalid(format!("invalid username: {:?}", username)))
        }
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for IdentityId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Unique identifier for a server descriptor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    /// Create a server ID from an existing string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh random server ID
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// ID of the implicit shell workspace for an identity
    pub fn implicit_for(owner: &IdentityId) -> Self {
        Self(format!("session_{}", owner.as_str()))
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ServerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// An authenticated principal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Username
    pub id: IdentityId,
    /// Stored credential hash (see [`crate::credential`])
    pub credential_hash: String,
    /// Currently valid access token, if one has been issued
    pub auth_token: Option<String>,
    /// Servers this identity owns
    pub owned_server_ids: HashSet<ServerId>,
}

impl Identity {
    /// Create an identity with no token and no servers
    pub fn new(id: IdentityId, credential_hash: impl Into<String>) -> Self {
        Self {
            id,
            credential_hash: credential_hash.into(),
            auth_token: None,
            owned_server_ids: HashSet::new(),
        }
    }

    /// Check whether this identity owns a server
    pub fn owns(&self, server_id: &ServerId) -> bool {
        self.owned_server_ids.contains(server_id)
    }
}

/// A provisioned workspace owned by one identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub id: ServerId,
    pub owner_id: IdentityId,
    pub display_name: String,
    pub kind: ServerKind,
    /// Repository to clone (repository servers only)
    #[serde(default)]
    pub source_location: Option<String>,
    /// Command run once after cloning (repository servers only)
    #[serde(default)]
    pub build_command: Option<String>,
    /// Command injected into the shell once it is running (repository servers only)
    #[serde(default)]
    pub start_command: Option<String>,
    /// Directory the shell is rooted in
    pub working_root: PathBuf,
}

impl ServerDescriptor {
    /// The implicit shell workspace assigned to an identity that selects no server
    pub fn implicit_shell(owner: &IdentityId, sessions_dir: &Path) -> Self {
        let id = ServerId::implicit_for(owner);
        Self {
            working_root: sessions_dir.join(id.as_str()),
            display_name: id.to_string(),
            id,
            owner_id: owner.clone(),
            kind: ServerKind::Shell,
            source_location: None,
            build_command: None,
            start_command: None,
        }
    }

    /// Check the kind-specific required fields
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.kind == ServerKind::Repository && self.source().is_none() {
            return Err(StoreError::Invalid(format!(
                "repository server {} has no source location",
                self.id
            )));
        }
        if self.working_root.as_os_str().is_empty() {
            return Err(StoreError::Invalid(format!(
                "server {} has no working root",
                self.id
            )));
        }
        Ok(())
    }

    /// Source location, if this is a repository server and one is set
    pub fn source(&self) -> Option<&str> {
        self.repository_field(&self.source_location)
    }

    /// Build command, if this is a repository server and one is set
    pub fn build(&self) -> Option<&str> {
        self.repository_field(&self.build_command)
    }

    /// Start command, if this is a repository server and one is set
    pub fn start(&self) -> Option<&str> {
        self.repository_field(&self.start_command)
    }

    fn repository_field<'a>(&self, field: &'a Option<String>) -> Option<&'a str> {
        if self.kind != ServerKind::Repository {
            return None;
        }
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    /// Listing entry for this server
    pub fn summary(&self) -> ServerSummary {
        ServerSummary {
            id: self.id.to_string(),
            display_name: self.display_name.clone(),
            kind: self.kind,
        }
    }

    /// Session info sent once a shell is running on this server
    pub fn session_info(&self, pid: Option<u32>) -> SessionInfo {
        SessionInfo {
            server_id: self.id.to_string(),
            display_name: self.display_name.clone(),
            kind: self.kind,
            working_root: self.working_root.display().to_string(),
            pid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repository(build: Option<&str>) -> ServerDescriptor {
        ServerDescriptor {
            id: ServerId::new("srv-1"),
            owner_id: IdentityId::new("bob"),
            display_name: "api".to_string(),
            kind: ServerKind::Repository,
            source_location: Some("https://example.com/api.git".to_string()),
            build_command: build.map(str::to_string),
            start_command: Some("npm start".to_string()),
            working_root: PathBuf::from("/srv/sessions/bob/srv-1"),
        }
    }

    #[test]
    fn test_identity_id_parse() {
        assert!(IdentityId::parse("alice").is_ok());
        assert!(IdentityId::parse("bob_2.dev").is_ok());
        assert!(IdentityId::parse("").is_err());
        assert!(IdentityId::parse("../root").is_err());
        assert!(IdentityId::parse(".hidden").is_err());
        assert!(IdentityId::parse("a/b").is_err());
    }

    #[test]
    fn test_generated_server_ids_are_unique() {
        let a = ServerId::generate();
        let b = ServerId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_implicit_shell_root() {
        let owner = IdentityId::new("alice");
        let descriptor = ServerDescriptor::implicit_shell(&owner, Path::new("/srv"));
        assert_eq!(descriptor.working_root, PathBuf::from("/srv/session_alice"));
        assert_eq!(descriptor.kind, ServerKind::Shell);
        assert!(descriptor.validate().is_ok());
    }

    #[test]
    fn test_blank_build_command_is_absent() {
        assert_eq!(repository(Some("  ")).build(), None);
        assert_eq!(repository(Some("make")).build(), Some("make"));
        assert_eq!(repository(None).build(), None);
    }

    #[test]
    fn test_shell_kind_ignores_repository_fields() {
        let mut descriptor = repository(Some("make"));
        descriptor.kind = ServerKind::Shell;
        assert_eq!(descriptor.source(), None);
        assert_eq!(descriptor.build(), None);
        assert_eq!(descriptor.start(), None);
    }

    #[test]
    fn test_repository_requires_source() {
        let mut descriptor = repository(None);
        descriptor.source_location = None;
        assert!(descriptor.validate().is_err());
    }
}
