//! In-memory identity store

use async_trait::async_trait;
use dashmap::DashMap;

use crate::credential::{generate_token, hash_credential, verify_credential};
use crate::error::StoreError;
use crate::traits::IdentityStore;
use crate::types::{Identity, IdentityId, ServerId};

/// Identity store backed by concurrent maps
///
/// Each identity has at most one live token. Issuing a new token removes the
/// previous one from the token index, so stale tokens stop resolving.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    /// Identities indexed by ID
    identities: DashMap<IdentityId, Identity>,
    /// Live tokens indexed by token value
    tokens: DashMap<String, IdentityId>,
}

impl MemoryIdentityStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new identity with a plaintext password
    pub fn register(&self, username: &str, password: &str) -> Result<Identity, StoreError> {
        let id = IdentityId::parse(username)?;
        self.insert(Identity::new(id, hash_credential(password)))
    }

    /// Insert a prepared identity record
    ///
    /// If the record carries a token it is indexed immediately.
    pub fn insert(&self, identity: Identity) -> Result<Identity, StoreError> {
        use dashmap::mapref::entry::Entry;

        if let Some(token) = &identity.auth_token {
            if self.tokens.contains_key(token) {
                return Err(StoreError::AlreadyExists("token".to_string()));
            }
        }

        match self.identities.entry(identity.id.clone()) {
            Entry::Occupied(_) => return Err(StoreError::AlreadyExists(identity.id.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(identity.clone());
            }
        }

        if let Some(token) = &identity.auth_token {
            self.tokens.insert(token.clone(), identity.id.clone());
        }

        tracing::debug!("Registered identity {}", identity.id);
        Ok(identity)
    }

    /// Issue a fresh token for an identity, invalidating the previous one
    pub fn issue_token(&self, id: &IdentityId) -> Result<String, StoreError> {
        let token = generate_token();

        let previous = {
            let mut identity = self
                .identities
                .get_mut(id)
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
            identity.auth_token.replace(token.clone())
        };

        if let Some(previous) = previous {
            self.tokens.remove(&previous);
        }
        self.tokens.insert(token.clone(), id.clone());

        tracing::info!("Issued new token for {}", id);
        Ok(token)
    }

    /// Record that an identity owns a server
    pub fn grant(&self, id: &IdentityId, server_id: ServerId) -> Result<(), StoreError> {
        let mut identity = self
            .identities
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        identity.owned_server_ids.insert(server_id);
        Ok(())
    }

    /// Get an identity by ID
    pub fn get(&self, id: &IdentityId) -> Option<Identity> {
        self.identities.get(id).map(|r| r.value().clone())
    }

    /// Number of identities
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }
}

#[async_trait]
impl IdentityStore for MemoryIdentityStore {
    async fn resolve(&self, token: &str) -> Result<Identity, StoreError> {
        let id = self
            .tokens
            .get(token)
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound("token".to_string()))?;

        // The token index and the identity are updated separately; only
        // accept the token if it is still the identity's current one.
        match self.get(&id) {
            Some(identity) if identity.auth_token.as_deref() == Some(token) => Ok(identity),
            _ => Err(StoreError::NotFound("token".to_string())),
        }
    }

    async fn owner_of(&self, server_id: &ServerId) -> Result<Identity, StoreError> {
        self.identities
            .iter()
            .find(|r| r.value().owns(server_id))
            .map(|r| r.value().clone())
            .ok_or_else(|| StoreError::NotFound(server_id.to_string()))
    }

    async fn login(&self, username: &str, password: &str) -> Result<String, StoreError> {
        let id = IdentityId::new(username);
        let verified = self
            .get(&id)
            .map(|identity| verify_credential(&identity.credential_hash, password))
            .unwrap_or(false);

        if !verified {
            tracing::warn!("Rejected login for {:?}", username);
            return Err(StoreError::InvalidCredentials);
        }

        self.issue_token(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_login_rotates_token() {
        let store = MemoryIdentityStore::new();
        store.register("alice", "wonderland").unwrap();

        let first = store.login("alice", "wonderland").await.unwrap();
        assert_eq!(store.resolve(&first).await.unwrap().id.as_str(), "alice");

        let second = store.login("alice", "wonderland").await.unwrap();
        assert_ne!(first, second);
        assert_eq!(
            store.resolve(&first).await.unwrap_err(),
            StoreError::NotFound("token".to_string())
        );
        assert!(store.resolve(&second).await.is_ok());
    }

    #[tokio::test]
    async fn test_login_wrong_password() {
        let store = MemoryIdentityStore::new();
        store.register("alice", "wonderland").unwrap();

        assert_eq!(
            store.login("alice", "looking-glass").await.unwrap_err(),
            StoreError::InvalidCredentials
        );
        assert_eq!(
            store.login("mallory", "wonderland").await.unwrap_err(),
            StoreError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn test_unknown_token() {
        let store = MemoryIdentityStore::new();
        assert!(store.resolve("deadbeef").await.is_err());
    }

    #[tokio::test]
    async fn test_owner_of() {
        let store = MemoryIdentityStore::new();
        store.register("alice", "a").unwrap();
        store.register("bob", "b").unwrap();
        store
            .grant(&IdentityId::new("bob"), ServerId::new("srv-1"))
            .unwrap();

        let owner = store.owner_of(&ServerId::new("srv-1")).await.unwrap();
        assert_eq!(owner.id.as_str(), "bob");
        assert!(store.owner_of(&ServerId::new("srv-2")).await.is_err());
    }

    #[test]
    fn test_duplicate_registration() {
        let store = MemoryIdentityStore::new();
        store.register("alice", "a").unwrap();
        assert_eq!(
            store.register("alice", "b").unwrap_err(),
            StoreError::AlreadyExists("alice".to_string())
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_insert_with_static_token() {
        let store = MemoryIdentityStore::new();
        let mut identity = Identity::new(IdentityId::new("carol"), hash_credential("c"));
        identity.auth_token = Some("static-token".to_string());
        store.insert(identity).unwrap();

        let resolved = store.resolve("static-token").await.unwrap();
        assert_eq!(resolved.id.as_str(), "carol");
    }
}
