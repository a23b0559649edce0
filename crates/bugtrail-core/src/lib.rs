//! bugtrail-core: Core library for the bugtrail issue tracker
//!
//! Issues, their append-only history, a category tree and users, stored in
//! CockroachDB. Every mutation runs inside a transaction and is normalized
//! so that an issue is NEW exactly when nobody is assigned to it.

pub mod config;
pub mod db;
pub mod error;
pub mod invariants;
pub mod issue;
pub mod pagination;
pub mod search;
pub mod service;
pub mod validation;

pub use config::Config;
pub use db::{Database, Session};
pub use error::Error;
pub use issue::{
    AssigneeChange, Issue, IssueDiff, IssueState, IssueStatus, IssueType, IssueUpdate, NewIssue,
    NewIssueUpdate,
};
pub use service::Service;

/// Result type for bugtrail operations
pub type Result<T> = std::result::Result<T, Error>;
