//! th-core: Core types, configuration and collaborators for termhost
//!
//! This crate provides the domain types shared by the orchestrator and the
//! CLI, the error taxonomy, configuration loading, and the identity store and
//! server registry collaborators the orchestrator consumes.

pub mod config;
pub mod credential;
pub mod error;
pub mod store;
pub mod traits;
pub mod types;

pub use error::{ConfigError, SessionError, StoreError, ThError};
pub use types::{Identity, IdentityId, ServerDescriptor, ServerId, ServerKind};
