//! Error types for bugtrail
//!
//! The variants form the domain taxonomy every store and the service layer
//! report in. Backend driver errors never appear here directly; they go
//! through [`crate::db::ErrorConverter`] first.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing issue, category or user.
    #[error("not found: {0}")]
    NotFound(String),

    /// Duplicate category name among siblings, duplicate username.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input, preset ids, invalid enum values, missing fields.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The operation is valid but the current state forbids it.
    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    /// Query shapes the core does not serve (keyword search).
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// Unmapped backend failure. Details are logged, not returned.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be turned into a domain value.
    #[error("internal error: {0}")]
    Internal(String),

    /// The caller went away (closed stream receiver).
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// The caller's deadline expired.
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("config error: {0}")]
    Config(String),
}

impl Error {
    /// True for the errors that mean "the caller gave up" rather than
    /// "the server failed".
    pub fn is_caller_abort(&self) -> bool {
        matches!(self, Error::Cancelled(_) | Error::DeadlineExceeded(_))
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Error::NotFound(what.into())
    }

    pub fn invalid(what: impl Into<String>) -> Self {
        Error::InvalidArgument(what.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Error::DeadlineExceeded("operation timed out".to_string())
    }
}
