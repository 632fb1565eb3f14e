// crates/herbtrace-core/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("duplicate idempotency token '{0}'")]
    DuplicateToken(String),

    #[error("store unavailable: {0}")]
    Store(String),
}

impl TraceError {
    pub fn validation(message: impl Into<String>) -> Self {
        TraceError::Validation(message.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        TraceError::NotFound(what.into())
    }

    pub fn store(err: impl std::fmt::Display) -> Self {
        TraceError::Store(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TraceError>;
