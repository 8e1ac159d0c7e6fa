//! Error types for flatstore
//!
//! Provides a unified error type for all operations.

use std::path::PathBuf;

use thiserror::Error;

use crate::validation::FieldType;

/// Result type alias using FlatError
pub type Result<T> = std::result::Result<T, FlatError>;

/// Unified error type for flatstore operations
#[derive(Debug, Error)]
pub enum FlatError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Validation Errors (raised before any write)
    // -------------------------------------------------------------------------
    #[error("Invalid {kind} name: {name:?}")]
    InvalidIdentifier { kind: &'static str, name: String },

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Field {field:?} must be {expected}, got {found}")]
    FieldType {
        field: String,
        expected: FieldType,
        found: &'static str,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    // -------------------------------------------------------------------------
    // Data Errors
    // -------------------------------------------------------------------------
    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Corrupt file {path:?} quarantined to {quarantined:?}; index reset to empty")]
    Corruption { path: PathBuf, quarantined: PathBuf },

    #[error("Potential data loss: {0}")]
    DataLoss(String),

    #[error("Mutation of record {id} failed: {source}")]
    Mutation {
        id: u64,
        #[source]
        source: Box<FlatError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Registry / Query Errors
    // -------------------------------------------------------------------------
    #[error("Table not registered: {0}")]
    TableNotRegistered(String),

    #[error("Query error: {0}")]
    Query(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl FlatError {
    /// True for errors raised before any write because the input was rejected.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            FlatError::InvalidIdentifier { .. }
                | FlatError::MissingField(_)
                | FlatError::FieldType { .. }
                | FlatError::Validation(_)
        )
    }
}
