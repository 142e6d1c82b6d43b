//! Change notifications.
//!
//! Two levels exist. A [`FieldEvent`] is dispatched on the per-identity
//! channel of a field store every time a field is read or changed. An
//! [`EntityUpdate`] is the class-level projection of a change, which is
//! what dependent queries subscribe to.

use crate::Identity;
use serde::{Deserialize, Serialize};

/// Whether a field was read or written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldEventKind {
    Get,
    Set,
}

/// A read or write of one field of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldEvent {
    pub kind: FieldEventKind,
    pub key: String,
}

impl FieldEvent {
    /// A field was read through the get path.
    pub fn get(key: impl Into<String>) -> Self {
        Self {
            kind: FieldEventKind::Get,
            key: key.into(),
        }
    }

    /// A field value changed through the set path.
    pub fn set(key: impl Into<String>) -> Self {
        Self {
            kind: FieldEventKind::Set,
            key: key.into(),
        }
    }

    #[must_use]
    pub fn is_get(&self) -> bool {
        self.kind == FieldEventKind::Get
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.kind == FieldEventKind::Set
    }
}

/// Class-level change notification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityUpdate {
    /// The entity that changed.
    pub identity: Identity,
    /// The field that changed, or `None` when the entity was just created.
    pub key: Option<String>,
}

impl EntityUpdate {
    /// An entity became canonical for its class.
    pub fn created(identity: Identity) -> Self {
        Self {
            identity,
            key: None,
        }
    }

    /// A field of an existing entity changed.
    pub fn changed(identity: Identity, key: impl Into<String>) -> Self {
        Self {
            identity,
            key: Some(key.into()),
        }
    }
}
