//! Result type aliases for Jobforge.

use crate::ForgeError;

/// A specialized `Result` type for Jobforge operations.
pub type ForgeResult<T> = Result<T, ForgeError>;
