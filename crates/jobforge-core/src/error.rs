//! Unified error types shared across Jobforge crates.

use std::fmt::Debug;
use thiserror::Error;

/// Unified error type for Jobforge.
///
/// Crate-local error enums (such as the job queue's `JobError`) convert into
/// this type at crate boundaries so binaries and request layers deal with a
/// single shape.
#[derive(Error, Debug)]
pub enum ForgeError {
    /// Resource not found
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound {
        resource_type: &'static str,
        id: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Shared store unreachable or returned a protocol error
    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    /// Stored data violates an invariant
    #[error("Data inconsistency: {0}")]
    Inconsistency(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ForgeError {
    /// Returns the HTTP status code a request layer should map this error to.
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::NotFound { .. } => 404,
            Self::StoreUnavailable(_) => 503,
            Self::Configuration(_) | Self::Inconsistency(_) | Self::Internal(_) => 500,
        }
    }

    /// Returns a machine-readable error code.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::StoreUnavailable(_) => "STORE_UNAVAILABLE",
            Self::Inconsistency(_) => "DATA_INCONSISTENCY",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Creates a not found error for a resource.
    #[must_use]
    pub fn not_found<T: ToString>(resource_type: &'static str, id: T) -> Self {
        Self::NotFound {
            resource_type,
            id: id.to_string(),
        }
    }
}

impl From<serde_json::Error> for ForgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON serialization error: {}", err))
    }
}
