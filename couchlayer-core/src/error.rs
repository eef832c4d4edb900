//! Error types and result types for database and schema operations.
//!
//! This module provides comprehensive error handling for every operation in
//! the crate. Use [`CouchResult<T>`] as the return type for fallible
//! operations.

use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when talking to a document
/// database or converting between wire and typed values.
///
/// Transport implementations translate HTTP statuses into the first four
/// variants at the boundary (see [`check_status`]); everything after that is
/// raised synchronously by the schema and lifecycle layers.
#[derive(Error, Debug)]
pub enum CouchError {
    /// The target document or database does not exist.
    #[error("Not found: {0}")]
    NotFound(String),
    /// The revision supplied with a write no longer matches the server's.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// Credentials are missing or were rejected.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// Any other non-success HTTP status.
    #[error("Request failed with status {status}: {reason}")]
    RequestFailed {
        /// HTTP status code returned by the server.
        status: u16,
        /// Error reason extracted from the response, if any.
        reason: String,
    },
    /// Connection-level failure (DNS, socket, timeout) from the transport.
    #[error("Transport error: {0}")]
    Transport(String),
    /// Serialization/deserialization error when decoding a response body.
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// A value's type is incompatible with the declared property type, or a
    /// wire value is malformed for it.
    #[error("Type conversion error: {0}")]
    TypeConversion(String),
    /// A required field is absent/empty or a custom validator rejected it.
    #[error("Bad value: {0}")]
    BadValue(String),
    /// A property was declared under a reserved field name.
    #[error("Cannot define property using reserved word '{0}'")]
    ReservedWord(String),
    /// The same field name was declared twice in a schema hierarchy.
    #[error("Duplicate property: {0}")]
    DuplicateProperty(String),
    /// Key-based access to a field that is neither declared nor dynamic.
    #[error("Key not found: {0}")]
    KeyNotFound(String),
    /// An attachment name or payload is unusable.
    #[error("Invalid attachment: {0}")]
    InvalidAttachment(String),
    /// A bulk write reported per-document errors. Documents that succeeded
    /// have already been updated in place; this is the only error that also
    /// signals a partially successful outcome.
    #[error("{0}")]
    BulkSave(BulkSaveError),
    /// `one()` found more than one row.
    #[error("{0} results found where at most one was expected")]
    MultipleResults(usize),
    /// `one()` found no row while one was required.
    #[error("No result found")]
    NoResult,
}

/// A specialized `Result` type used throughout the crate.
pub type CouchResult<T> = Result<T, CouchError>;

/// Per-document outcome of a partially failed bulk write.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkDocError {
    /// Position of the document in the input sequence.
    pub index: usize,
    /// Identity of the document, when the server reported one.
    pub id: Option<String>,
    /// Error marker (e.g. `conflict`).
    pub error: String,
    /// Human-readable reason.
    pub reason: String,
}

/// Identity and revision of a document a bulk write did accept.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSaved {
    pub id: String,
    pub rev: String,
}

/// Partial-failure report for a bulk write.
///
/// `saved` lists the documents the server accepted (their in-memory
/// counterparts carry the new identity/revision already); `errors` lists the
/// rejected ones in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkSaveError {
    pub saved: Vec<BulkSaved>,
    pub errors: Vec<BulkDocError>,
}

impl std::fmt::Display for BulkSaveError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bulk save rejected {} of {} documents",
            self.errors.len(),
            self.errors.len() + self.saved.len()
        )
    }
}

impl From<SerdeJsonError> for CouchError {
    fn from(err: SerdeJsonError) -> Self {
        CouchError::Serialization(err.to_string())
    }
}

/// Maps a non-success HTTP status to the error taxonomy.
///
/// Returns `Ok(())` for 2xx/3xx. Every transport implementation routes its
/// responses through this single mapping so callers see one taxonomy no
/// matter which transport is plugged in.
pub fn check_status(status: u16, reason: impl Into<String>) -> CouchResult<()> {
    match status {
        0..=399 => Ok(()),
        404 => Err(CouchError::NotFound(reason.into())),
        409 => Err(CouchError::Conflict(reason.into())),
        401 | 403 => Err(CouchError::Unauthorized(reason.into())),
        _ => Err(CouchError::RequestFailed { status, reason: reason.into() }),
    }
}
