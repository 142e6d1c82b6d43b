//! Async queries as cached entities.
//!
//! A [`QueryDefinition`] wraps an async operation. Each distinct argument value
//! maps to one [`Query`], itself an entity in the store with the fields
//! `loading`, `result` and `error`, so UI adapters observe queries exactly like
//! any other entity.
//!
//! Queries are lazy: nothing runs until a field is read, the query is
//! invalidated, or [`Query::resolved`] is awaited. At most one run is in
//! flight per query.
//! Operation failures and panics never escape; they become the query's
//! `error`.

mod definition;
mod error;
mod query;

pub use definition::QueryDefinition;
pub use error::{QueryError, UNKNOWN_ERROR};
pub use query::{Query, QueryOutcome, QueryState};
