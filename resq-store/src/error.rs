//! Error types for the entity store.

use resq_types::Identity;
use std::fmt;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// One failing field of a construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldIssue {
    pub field: String,
    pub message: String,
}

impl FieldIssue {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn join_issues(issues: &[FieldIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Raw input rejected by a validator or by the shape as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Construction input was not a JSON object.
    #[error("expected an object, got {0}")]
    NotAnObject(&'static str),

    /// A single value failed validation.
    #[error("{0}")]
    Invalid(String),

    /// Every field that failed during one construction.
    #[error("invalid fields: {}", join_issues(.0))]
    Fields(Vec<FieldIssue>),
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Invalid`].
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }

    /// The per-field issues, empty unless this is [`ValidationError::Fields`].
    pub fn issues(&self) -> &[FieldIssue] {
        match self {
            Self::Fields(issues) => issues,
            _ => &[],
        }
    }
}

/// Errors that can occur in store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Raw input failed validation. Nothing was written.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// The field is not declared by the entity's class.
    #[error("unknown field `{field}` on {class}")]
    UnknownField { class: String, field: String },

    /// A write tried to move an entity to another identity.
    #[error("cannot change identity of {class} from {from} to {to}")]
    IdentityChange {
        class: String,
        from: Identity,
        to: Identity,
    },

    /// An update callback issued its queries in a different order than on a
    /// previous run.
    #[error(
        "query slot {slot} was {expected} but is now {found}; queries must run in the same order every time"
    )]
    OrderingViolation {
        slot: usize,
        expected: String,
        found: String,
    },

    /// A seed passed to `query_many_seeded` contains a non-matching entity.
    #[error("seed entity {identity} of {class} does not match the predicate")]
    SeedMismatch { class: String, identity: Identity },

    /// The update manager was cancelled.
    #[error("update manager has been cancelled")]
    Cancelled,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error raised from an application callback.
    #[error("{0}")]
    Callback(String),
}

impl StoreError {
    /// Wraps an application error raised inside a hook or update callback.
    pub fn callback(message: impl fmt::Display) -> Self {
        Self::Callback(message.to_string())
    }
}
