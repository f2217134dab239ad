//! In-memory server registry

use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::StoreError;
use crate::traits::ServerRegistry;
use crate::types::{IdentityId, ServerDescriptor, ServerId, ServerKind};

/// Maximum number of servers one identity may own
pub const MAX_SERVERS_PER_OWNER: usize = 2;

/// Fields supplied when creating a server
#[derive(Debug, Clone)]
pub struct NewServer {
    pub display_name: String,
    pub kind: ServerKind,
    pub source_location: Option<String>,
    pub build_command: Option<String>,
    pub start_command: Option<String>,
}

impl NewServer {
    /// A plain shell server
    pub fn shell(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            kind: ServerKind::Shell,
            source_location: None,
            build_command: None,
            start_command: None,
        }
    }

    /// A repository-backed server
    pub fn repository(
        display_name: impl Into<String>,
        source_location: impl Into<String>,
        build_command: Option<String>,
        start_command: Option<String>,
    ) -> Self {
        Self {
            display_name: display_name.into(),
            kind: ServerKind::Repository,
            source_location: Some(source_location.into()),
            build_command,
            start_command,
        }
    }
}

/// Server registry backed by a concurrent map
///
/// Working roots for created servers are laid out as
/// `<sessions_dir>/<owner>/<server id>`.
#[derive(Debug)]
pub struct MemoryRegistry {
    /// Descriptors indexed by server ID
    servers: DashMap<ServerId, ServerDescriptor>,
    /// Root directory for generated working roots
    sessions_dir: PathBuf,
    /// Serializes the cap check with the insert
    create_lock: Mutex<()>,
}

impl MemoryRegistry {
    /// Create an empty registry
    pub fn new(sessions_dir: impl Into<PathBuf>) -> Self {
        Self {
            servers: DashMap::new(),
            sessions_dir: sessions_dir.into(),
            create_lock: Mutex::new(()),
        }
    }

    /// Working root a server with this owner and ID gets by default
    pub fn default_working_root(&self, owner: &IdentityId, id: &ServerId) -> PathBuf {
        self.sessions_dir.join(owner.as_str()).join(id.as_str())
    }

    /// Create a server with a fresh ID, enforcing the per-owner cap
    pub fn create(
        &self,
        owner: &IdentityId,
        new: NewServer,
    ) -> Result<ServerDescriptor, StoreError> {
        let id = ServerId::generate();
        let descriptor = ServerDescriptor {
            working_root: self.default_working_root(owner, &id),
            id,
            owner_id: owner.clone(),
            display_name: new.display_name,
            kind: new.kind,
            source_location: new.source_location,
            build_command: new.build_command,
            start_command: new.start_command,
        };
        self.insert(descriptor)
    }

    /// Insert a prepared descriptor, enforcing the per-owner cap
    pub fn insert(&self, descriptor: ServerDescriptor) -> Result<ServerDescriptor, StoreError> {
        descriptor.validate()?;

        let _guard = self
            .create_lock
            .lock()
            .map_err(|_| StoreError::Invalid("registry lock poisoned".to_string()))?;

        if self.servers.contains_key(&descriptor.id) {
            return Err(StoreError::AlreadyExists(descriptor.id.to_string()));
        }

        let owned = self
            .servers
            .iter()
            .filter(|r| r.value().owner_id == descriptor.owner_id)
            .count();
        if owned >= MAX_SERVERS_PER_OWNER {
            return Err(StoreError::CapReached {
                owner: descriptor.owner_id.to_string(),
                cap: MAX_SERVERS_PER_OWNER,
            });
        }

        self.servers
            .insert(descriptor.id.clone(), descriptor.clone());
        tracing::debug!(
            "Registered {} server {} for {}",
            descriptor.kind,
            descriptor.id,
            descriptor.owner_id
        );
        Ok(descriptor)
    }

    /// Remove a server
    pub fn remove(&self, id: &ServerId) -> Option<ServerDescriptor> {
        self.servers.remove(id).map(|(_, d)| d)
    }

    /// Number of servers
    pub fn len(&self) -> usize {
        self.servers.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }
}

#[async_trait]
impl ServerRegistry for MemoryRegistry {
    async fn get(&self, id: &ServerId) -> Result<ServerDescriptor, StoreError> {
        self.servers
            .get(id)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn list_for_owner(
        &self,
        owner: &IdentityId,
    ) -> Result<Vec<ServerDescriptor>, StoreError> {
        let mut servers: Vec<ServerDescriptor> = self
            .servers
            .iter()
            .filter(|r| &r.value().owner_id == owner)
            .map(|r| r.value().clone())
            .collect();
        servers.sort_by(|a, b| a.display_name.cmp(&b.display_name));
        Ok(servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_get() {
        let registry = MemoryRegistry::new("/srv/sessions");
        let owner = IdentityId::new("alice");

        let created = registry.create(&owner, NewServer::shell("scratch")).unwrap();
        assert_eq!(
            created.working_root,
            PathBuf::from("/srv/sessions/alice").join(created.id.as_str())
        );

        let fetched = registry.get(&created.id).await.unwrap();
        assert_eq!(fetched, created);
    }

    #[test]
    fn test_cap_per_owner() {
        let registry = MemoryRegistry::new("/srv/sessions");
        let alice = IdentityId::new("alice");
        let bob = IdentityId::new("bob");

        registry.create(&alice, NewServer::shell("one")).unwrap();
        registry.create(&alice, NewServer::shell("two")).unwrap();
        assert_eq!(
            registry.create(&alice, NewServer::shell("three")).unwrap_err(),
            StoreError::CapReached {
                owner: "alice".to_string(),
                cap: MAX_SERVERS_PER_OWNER
            }
        );

        // Other owners are unaffected
        registry.create(&bob, NewServer::shell("one")).unwrap();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_remove_frees_a_slot() {
        let registry = MemoryRegistry::new("/srv/sessions");
        let alice = IdentityId::new("alice");

        let first = registry.create(&alice, NewServer::shell("one")).unwrap();
        registry.create(&alice, NewServer::shell("two")).unwrap();
        assert!(registry.remove(&first.id).is_some());
        assert!(registry.create(&alice, NewServer::shell("three")).is_ok());
    }

    #[test]
    fn test_repository_without_source_rejected() {
        let registry = MemoryRegistry::new("/srv/sessions");
        let mut new = NewServer::repository("api", "", None, None);
        new.source_location = None;
        assert!(matches!(
            registry.create(&IdentityId::new("bob"), new),
            Err(StoreError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_list_for_owner_sorted() {
        let registry = MemoryRegistry::new("/srv/sessions");
        let alice = IdentityId::new("alice");
        registry.create(&alice, NewServer::shell("zeta")).unwrap();
        registry.create(&alice, NewServer::shell("alpha")).unwrap();
        registry
            .create(&IdentityId::new("bob"), NewServer::shell("bob's"))
            .unwrap();

        let names: Vec<String> = registry
            .list_for_owner(&alice)
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.display_name)
            .collect();
        assert_eq!(names, vec!["alpha".to_string(), "zeta".to_string()]);
    }
}
