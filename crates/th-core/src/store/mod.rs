//! In-memory collaborator implementations

mod accounts;
mod identity;
mod registry;

pub use accounts::{Accounts, AccountsFile, IdentityRecord, ServerRecord};
pub use identity::MemoryIdentityStore;
pub use registry::{MemoryRegistry, NewServer, MAX_SERVERS_PER_OWNER};
