//! Accounts file loading
//!
//! An accounts file is a TOML document with `[[identity]]` and `[[server]]`
//! tables:
//!
//! ```toml
//! [[identity]]
//! username = "bob"
//! credential_hash = "sha256$...$..."   # from `termhost hash-password`
//! token = "optional-static-token"
//!
//! [[server]]
//! owner = "bob"
//! display_name = "api"
//! kind = "repository"
//! source_location = "https://example.com/api.git"
//! build_command = "npm install"
//! start_command = "npm start"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::{MemoryIdentityStore, MemoryRegistry};
use crate::error::{ConfigError, StoreError, ThError};
use crate::types::{Identity, IdentityId, ServerDescriptor, ServerId, ServerKind};

/// Parsed accounts file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountsFile {
    #[serde(default, rename = "identity")]
    pub identities: Vec<IdentityRecord>,
    #[serde(default, rename = "server")]
    pub servers: Vec<ServerRecord>,
}

/// Identity entry in an accounts file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityRecord {
    pub username: String,
    pub credential_hash: String,
    /// Token valid until the identity next logs in
    #[serde(default)]
    pub token: Option<String>,
}

/// Server entry in an accounts file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerRecord {
    /// Stable ID (generated when omitted)
    #[serde(default)]
    pub id: Option<String>,
    pub owner: String,
    pub display_name: String,
    pub kind: ServerKind,
    #[serde(default)]
    pub source_location: Option<String>,
    #[serde(default)]
    pub build_command: Option<String>,
    #[serde(default)]
    pub start_command: Option<String>,
    /// Working root (defaults to `<sessions_dir>/<owner>/<id>`)
    #[serde(default)]
    pub working_root: Option<PathBuf>,
}

/// Stores populated from an accounts file
#[derive(Debug)]
pub struct Accounts {
    pub identities: MemoryIdentityStore,
    pub registry: MemoryRegistry,
}

impl AccountsFile {
    /// Parse an accounts document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse an accounts file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        crate::config::load_config(path)
    }

    /// Build the identity store and registry
    ///
    /// Every server's owner must be listed as an identity; ownership is
    /// granted on the identity as each server is registered.
    pub fn into_stores(self, sessions_dir: &Path) -> Result<Accounts, ThError> {
        let identities = MemoryIdentityStore::new();
        let registry = MemoryRegistry::new(sessions_dir);

        for record in self.identities {
            let mut identity = Identity::new(
                IdentityId::parse(&record.username)?,
                record.credential_hash,
            );
            identity.auth_token = record.token.filter(|t| !t.is_empty());
            identities.insert(identity)?;
        }

        for record in self.servers {
            let owner = IdentityId::parse(&record.owner)?;
            if identities.get(&owner).is_none() {
                return Err(StoreError::NotFound(format!(
                    "owner {} of server {:?}",
                    owner, record.display_name
                ))
                .into());
            }

            let id = record.id.map(ServerId::new).unwrap_or_else(ServerId::generate);
            let working_root = record
                .working_root
                .unwrap_or_else(|| registry.default_working_root(&owner, &id));

            let descriptor = registry.insert(ServerDescriptor {
                id,
                owner_id: owner.clone(),
                display_name: record.display_name,
                kind: record.kind,
                source_location: record.source_location,
                build_command: record.build_command,
                start_command: record.start_command,
                working_root,
            })?;
            identities.grant(&owner, descriptor.id)?;
        }

        tracing::info!(
            "Loaded {} identities and {} servers",
            identities.len(),
            registry.len()
        );

        Ok(Accounts {
            identities,
            registry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::hash_credential;
    use crate::traits::{IdentityStore, ServerRegistry};

    fn sample() -> String {
        format!(
            r#"
[[identity]]
username = "bob"
credential_hash = "{}"
token = "bob-token"

[[identity]]
username = "alice"
credential_hash = "{}"

[[server]]
id = "api"
owner = "bob"
display_name = "API"
kind = "repository"
source_location = "https://example.com/api.git"
build_command = ""
start_command = "npm start"

[[server]]
owner = "alice"
display_name = "scratch"
kind = "shell"
working_root = "/tmp/alice-scratch"
"#,
            hash_credential("builder"),
            hash_credential("wonderland"),
        )
    }

    #[tokio::test]
    async fn test_load_accounts() {
        let accounts = AccountsFile::from_toml_str(&sample())
            .unwrap()
            .into_stores(Path::new("/srv/sessions"))
            .unwrap();

        let bob = accounts.identities.resolve("bob-token").await.unwrap();
        assert!(bob.owns(&ServerId::new("api")));

        let api = accounts.registry.get(&ServerId::new("api")).await.unwrap();
        assert_eq!(api.owner_id, bob.id);
        assert_eq!(api.working_root, PathBuf::from("/srv/sessions/bob/api"));
        assert_eq!(api.build(), None);

        let alice = accounts
            .registry
            .list_for_owner(&IdentityId::new("alice"))
            .await
            .unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].working_root, PathBuf::from("/tmp/alice-scratch"));

        let token = accounts
            .identities
            .login("alice", "wonderland")
            .await
            .unwrap();
        assert!(accounts.identities.resolve(&token).await.is_ok());
    }

    #[test]
    fn test_server_with_unknown_owner() {
        let content = r#"
[[server]]
owner = "ghost"
display_name = "x"
kind = "shell"
"#;
        let err = AccountsFile::from_toml_str(content)
            .unwrap()
            .into_stores(Path::new("/srv"))
            .unwrap_err();
        assert!(matches!(err, ThError::Store(StoreError::NotFound(_))));
    }

    #[test]
    fn test_empty_accounts_file() {
        let accounts = AccountsFile::from_toml_str("")
            .unwrap()
            .into_stores(Path::new("/srv"))
            .unwrap();
        assert!(accounts.identities.is_empty());
        assert!(accounts.registry.is_empty());
    }
}
