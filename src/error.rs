use serde::Serialize;
use thiserror::Error;

use crate::catalog::TableRef;

#[derive(Error, Debug)]
pub enum DiscoverxError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid rule '{rule}': {message}")]
    InvalidRule { rule: String, message: String },
    #[error("Metadata error: {0}")]
    Metadata(String),
    #[error("Execution error: {0}")]
    Execution(String),
    #[error("Publish error: {0}")]
    Publish(String),
    #[error("No matching columns for tags [{}]", tags.join(", "))]
    NoMatchingColumns { tags: Vec<String> },
    #[error("Nothing to review, no scan has been run")]
    NoScan,
    #[error("Persistence error: {0}")]
    Persistence(String),
    #[error("Internal invariant violated: {0}")]
    Invariant(String),
    #[error("Lock poisoned: {0}")]
    Lock(String),
}

pub type Result<T> = std::result::Result<T, DiscoverxError>;

impl DiscoverxError {
    pub fn invalid_rule(rule: &str, message: impl Into<String>) -> Self {
        Self::InvalidRule { rule: rule.to_string(), message: message.into() }
    }
}

// Helper conversions
impl From<rusqlite::Error> for DiscoverxError {
    fn from(e: rusqlite::Error) -> Self { Self::Persistence(e.to_string()) }
}
impl From<config::ConfigError> for DiscoverxError {
    fn from(e: config::ConfigError) -> Self { Self::Config(e.to_string()) }
}
impl<T> From<std::sync::PoisonError<T>> for DiscoverxError {
    fn from(e: std::sync::PoisonError<T>) -> Self { Self::Lock(e.to_string()) }
}

// ------------- Per-unit failures -------------
// These never abort a multi-unit operation. They are collected into the
// report of the operation that produced them.

/// A catalog, schema or table that could not be listed during enumeration.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("skipped '{scope}': {message}")]
pub struct EnumerationWarning {
    pub scope: String,
    pub message: String,
}

/// A sampling statement that failed for one table.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("scan of '{table}' failed: {message}")]
pub struct ScanUnitError {
    pub table: TableRef,
    pub statement: String,
    pub message: String,
}

/// A search or delete statement that failed for one table.
#[derive(Error, Debug, Clone, PartialEq, Serialize)]
#[error("operation on '{table}' failed: {message}")]
pub struct PerTableOperationError {
    pub table: TableRef,
    pub statement: String,
    pub message: String,
}
