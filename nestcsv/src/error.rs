//! Error types for the nestcsv codec and import pipeline.
//!
//! - [`SchemaError`] - Invalid schema definitions (fatal at definition time)
//! - [`CsvError`] - Tokenizer, encoding and IO failures on a CSV source
//! - [`FieldError`] - One field of one record could not be read or assigned
//! - [`StoreError`] - The external store failed a batched lookup
//!
//! Only [`SchemaError`] and [`CsvError`] stop work early. Field and store
//! problems met while a pipeline runs are recorded in its
//! [`Diagnostics`](crate::diagnostics::Diagnostics) sink instead of being raised.

use thiserror::Error;

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors raised while defining or loading a [`Schema`](crate::schema::Schema).
#[derive(Debug, Error)]
pub enum SchemaError {
    /// An association was declared on a schema that is itself an association.
    #[error("nested associations are not supported (association '{association}')")]
    NestedAssociation { association: String },

    /// The schema definition is inconsistent.
    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    /// JSON serialization/deserialization error.
    #[error("Schema JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// CSV Source Errors
// =============================================================================

/// Errors from reading or writing CSV text.
#[derive(Debug, Error)]
pub enum CsvError {
    /// The tokenizer rejected the input.
    #[error("csv is malformed: {message}")]
    Malformed { line: Option<u64>, message: String },

    /// Failed to read the source.
    #[error("Failed to read csv source: {0}")]
    Io(#[from] std::io::Error),

    /// Raw bytes could not be decoded to text.
    #[error("Failed to decode csv bytes: {0}")]
    Encoding(String),

    /// A row could not be serialized.
    #[error("Failed to write csv row: {0}")]
    Write(String),
}

impl From<csv::Error> for CsvError {
    fn from(err: csv::Error) -> Self {
        let line = err.position().map(|p| p.line());
        let message = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(io) => CsvError::Io(io),
            _ => CsvError::Malformed { line, message },
        }
    }
}

// =============================================================================
// Field Errors
// =============================================================================

/// A single field of a single record was rejected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    /// The record has no attribute or property with this name.
    #[error("unknown field '{field}'")]
    Unknown { field: String },

    /// The record knows the field but refused the value.
    #[error("Invalid value for field '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl FieldError {
    pub fn unknown(field: impl Into<String>) -> Self {
        FieldError::Unknown { field: field.into() }
    }

    /// Name of the field the error is scoped to.
    pub fn field(&self) -> &str {
        match self {
            FieldError::Unknown { field } | FieldError::InvalidValue { field, .. } => field,
        }
    }
}

// =============================================================================
// Store Errors
// =============================================================================

/// Errors from the external persistent store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The batched lookup failed.
    #[error("Store lookup failed: {0}")]
    Lookup(String),

    /// Backend-specific failure.
    #[error("Store backend error: {0}")]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for schema definition.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for CSV source operations.
pub type CsvResult<T> = Result<T, CsvError>;

/// Result type for per-field reads and writes.
pub type FieldResult<T> = Result<T, FieldError>;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
