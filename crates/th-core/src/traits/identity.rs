//! Identity store trait

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{Identity, ServerId};

/// Source of identities for the orchestrator
///
/// Implementations are shared by every connection task and must be safe for
/// concurrent reads.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Resolve an access token to the identity it currently belongs to
    async fn resolve(&self, token: &str) -> Result<Identity, StoreError>;

    /// Find the identity owning a server
    async fn owner_of(&self, server_id: &ServerId) -> Result<Identity, StoreError>;

    /// Verify a username/password pair and issue a fresh token.
    ///
    /// The identity's previous token stops resolving.
    async fn login(&self, _username: &str, _password: &str) -> Result<String, StoreError> {
        Err(StoreError::Unsupported)
    }
}
