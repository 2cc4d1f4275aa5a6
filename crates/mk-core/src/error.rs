//! # AppError
//!
//! Centralized error handling for the Mask ecosystem.
//! Maps store and input failures to the three kinds callers act on.

use thiserror::Error;

/// The primary error type for all space and feed operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., Space, Post)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Rejected input (e.g., empty post, malformed space code).
    /// Nothing was sent to the store.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Any failure reported by the document store
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl AppError {
    pub fn not_found(kind: &str, id: impl Into<String>) -> Self {
        AppError::NotFound(kind.to_string(), id.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        AppError::ValidationError(reason.into())
    }
}

/// Raised by store adapters when an update targets a document that does not
/// exist. Carried inside `anyhow::Error` so services can downcast it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("document {0} does not exist")]
pub struct MissingDocument(pub String);

/// A specialized Result type for Mask logic.
pub type Result<T> = std::result::Result<T, AppError>;
