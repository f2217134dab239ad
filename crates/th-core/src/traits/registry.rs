//! Server registry trait

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::{IdentityId, ServerDescriptor, ServerId};

/// Source of server descriptors for the orchestrator
///
/// The orchestrator only reads descriptors; creation, deletion and the
/// per-owner cap belong to the implementation.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    /// Fetch a descriptor by ID
    async fn get(&self, id: &ServerId) -> Result<ServerDescriptor, StoreError>;

    /// List descriptors owned by an identity
    async fn list_for_owner(&self, owner: &IdentityId) -> Result<Vec<ServerDescriptor>, StoreError>;
}
