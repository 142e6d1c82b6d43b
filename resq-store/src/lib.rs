//! Identity-deduplicated entity store for resq.
//!
//! A [`Store`] hands out [`EntityClass`]es built from a [`Shape`]. Constructing
//! raw input through a class validates it field by field and resolves it to
//! the one canonical [`Entity`] for its identity, so every part of an
//! application holding "user 42" holds the same instance and sees the same
//! writes. Classes can be extended; a derived class keeps its own instances
//! but shares field values with its ancestors.
//!
//! Entities are held weakly everywhere inside the store. An entity nobody
//! references is collected together with its field record.
//!
//! Live derived values are declared with [`Entity::with_updates`], see
//! [`updates`].

mod class;
mod config;
mod entity;
mod error;
mod record;
mod schema;
mod store;
pub mod updates;
pub mod validators;

pub use class::{ConstructHook, EntityClass, Getter};
pub use config::{CHANGE_DEBOUNCE_ENV, StoreConfig, UPDATE_DEBOUNCE_ENV};
pub use entity::{Entity, WeakEntity};
pub use error::{FieldIssue, StoreError, StoreResult, ValidationError};
pub use schema::{ConstructionContext, FieldValidator, MergeStrategy, Shape};
pub use store::Store;
pub use updates::{Queries, QueryMethod, UpdateManager};

pub use resq_types::{ClassId, EntityUpdate, FieldEvent, FieldEventKind, Identity};
