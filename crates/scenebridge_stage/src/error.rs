//! Error types for the persisted hierarchy.

use thiserror::Error;

/// Result type for stage operations.
pub type StageResult<T> = Result<T, StageError>;

/// Errors that can occur in stage and layer operations.
#[derive(Debug, Error)]
pub enum StageError {
    /// A path string could not be parsed.
    #[error("invalid path {path:?}: {message}")]
    InvalidPath {
        /// The offending path text.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// No prim exists at the given path.
    #[error("prim not found: {path}")]
    PrimNotFound {
        /// The path that did not resolve.
        path: String,
    },

    /// An operation was applied to a property path where a prim path is
    /// required, or vice versa.
    #[error("invalid target {path}: {message}")]
    InvalidTarget {
        /// The offending path.
        path: String,
        /// Description of the mismatch.
        message: String,
    },
}

impl StageError {
    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a prim not found error.
    pub fn prim_not_found(path: impl std::fmt::Display) -> Self {
        Self::PrimNotFound {
            path: path.to_string(),
        }
    }

    /// Creates an invalid target error.
    pub fn invalid_target(path: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::InvalidTarget {
            path: path.to_string(),
            message: message.into(),
        }
    }
}
