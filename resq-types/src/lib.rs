//! Core type definitions for resq.
//!
//! This crate defines the small vocabulary shared by every layer of the cache:
//! - Entity identities and class identifiers
//! - Field-level and class-level change notifications
//!
//! Nothing here knows about schemas, scheduling or queries.

mod event;
mod ids;

pub use event::{EntityUpdate, FieldEvent, FieldEventKind};
pub use ids::{ClassId, Identity};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}
