//! Unified error type for bedrockdb
//!
//! Errors are grouped by *kind*, matching the locus/policy taxonomy: a parse
//! or schema or predicate error leaves the current transaction usable, while
//! a protocol or resource or internal error drives a full abort.

use std::fmt;
use std::io;

/// Where an error originates and how the coordinator should react to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Front-end tokenizing/parsing failure. No state change.
    Parse,
    /// Unknown table/column, bad type, FK/PK violation. Transaction stays active.
    Schema,
    /// Type mismatch in a condition, malformed IN list. Transaction stays active.
    Predicate,
    /// Wait-Die die, TSO out-of-order, OCC validation failure. Full abort.
    Protocol,
    /// I/O failure, disk full. Full abort; log-write failure is unrecoverable.
    Resource,
    /// Invariant broken. Full abort, never a process crash.
    Internal,
}

/// Unified error type for bedrockdb operations.
#[derive(Debug)]
pub struct DbError {
    pub kind: ErrorKind,
    pub message: String,
}

impl DbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Schema, message)
    }

    pub fn predicate(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Predicate, message)
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, message)
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::schema(format!("table '{}' does not exist", table))
    }

    pub fn table_exists(table: &str) -> Self {
        Self::schema(format!("table '{}' already exists", table))
    }

    pub fn unknown_column(column: &str) -> Self {
        Self::schema(format!("unknown column '{}'", column))
    }

    /// Whether this error leaves the current transaction usable (kinds 1-3)
    /// or requires the coordinator to run the full abort pipeline (4-6).
    pub fn aborts_transaction(&self) -> bool {
        matches!(self.kind, ErrorKind::Protocol | ErrorKind::Resource | ErrorKind::Internal)
    }
}

impl fmt::Display for DbError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for DbError {}

impl From<io::Error> for DbError {
    fn from(e: io::Error) -> Self {
        DbError::resource(e.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(e: serde_json::Error) -> Self {
        DbError::resource(format!("catalog encoding error: {}", e))
    }
}

impl From<Box<bincode::ErrorKind>> for DbError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        DbError::resource(format!("WAL encoding error: {}", e))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;
