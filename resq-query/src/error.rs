use std::any::Any;
use thiserror::Error;

/// Message stored for panics whose payload is not a string.
pub const UNKNOWN_ERROR: &str = "An unknown error occurred.";

/// Failure of a query operation, as recorded in the query's `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct QueryError {
    message: String,
}

impl QueryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Normalizes a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<String>() {
            Ok(message) => return Self::new(*message),
            Err(payload) => payload,
        };
        match payload.downcast::<&'static str>() {
            Ok(message) => Self::new(*message),
            Err(_) => Self::new(UNKNOWN_ERROR),
        }
    }
}

impl From<anyhow::Error> for QueryError {
    fn from(error: anyhow::Error) -> Self {
        Self::new(error.to_string())
    }
}
