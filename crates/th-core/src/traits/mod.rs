//! Collaborator trait definitions

mod identity;
mod registry;

pub use identity::IdentityStore;
pub use registry::ServerRegistry;
