//! Backend error conversion
//!
//! Stores never return driver errors. Each operation builds a converter with
//! the SQLSTATE codes it expects and the domain errors they mean in that
//! context; everything else becomes an opaque `Unavailable`.

use std::collections::HashMap;

use tracing::error;

use crate::Error;

pub const SQLSTATE_SYNTAX_ERROR: &str = "42601";
pub const SQLSTATE_FOREIGN_KEY_VIOLATION: &str = "23503";
pub const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

/// What went wrong, stripped of the driver's types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Failure {
    Database {
        code: Option<String>,
        message: String,
    },
    Timeout,
    Other(String),
}

pub(crate) fn classify(err: &sqlx::Error) -> Failure {
    match err {
        sqlx::Error::Database(db) => Failure::Database {
            code: db.code().map(|c| c.into_owned()),
            message: db.message().to_string(),
        },
        sqlx::Error::PoolTimedOut => Failure::Timeout,
        other => Failure::Other(other.to_string()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorConverter {
    table: HashMap<&'static str, Error>,
}

impl ErrorConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn syntax_error(self, err: Error) -> Self {
        self.map(SQLSTATE_SYNTAX_ERROR, err)
    }

    pub fn foreign_key_violation(self, err: Error) -> Self {
        self.map(SQLSTATE_FOREIGN_KEY_VIOLATION, err)
    }

    pub fn unique_violation(self, err: Error) -> Self {
        self.map(SQLSTATE_UNIQUE_VIOLATION, err)
    }

    fn map(mut self, code: &'static str, err: Error) -> Self {
        self.table.insert(code, err);
        self
    }

    pub fn convert(&self, err: sqlx::Error) -> Error {
        self.resolve(classify(&err))
    }

    pub(crate) fn resolve(&self, failure: Failure) -> Error {
        match failure {
            Failure::Database { code, message } => {
                if let Some(mapped) = code.as_deref().and_then(|c| self.table.get(c)) {
                    return mapped.clone();
                }
                error!(code = code.as_deref().unwrap_or("none"), %message, "unexpected database error");
                Error::Unavailable("database error".to_string())
            }
            Failure::Timeout => Error::DeadlineExceeded("timed out waiting for a connection".to_string()),
            Failure::Other(message) => {
                error!(%message, "unexpected driver error");
                Error::Unavailable("internal error".to_string())
            }
        }
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        ErrorConverter::new().convert(err)
    }
}
