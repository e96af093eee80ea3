//! Error types for the synchronization engine.

use scenebridge_scene::SceneError;
use scenebridge_stage::{StageError, StagePath, TraversalFailure};
use thiserror::Error;

/// Result type for synchronization operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during pull, merge, discard, and duplicate
/// operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The operation was rejected before any side effect.
    #[error("precondition failed: {message}")]
    Precondition {
        /// Description of the failed precondition.
        message: String,
    },

    /// The bulk import produced no nodes.
    #[error("nothing to edit: import produced no nodes")]
    EmptyImport,

    /// The bulk export failed or produced nothing.
    #[error("export failed: {message}")]
    ExportFailed {
        /// Description of the failure.
        message: String,
    },

    /// A per-node updater operation reported failure, aborting the rest of
    /// its batch. Already-applied updaters in the same batch are not rolled
    /// back.
    #[error("updater {operation} failed at {path}")]
    UpdaterFailed {
        /// The path whose updater failed.
        path: String,
        /// The updater operation that failed.
        operation: String,
    },

    /// A layer traversal was aborted by its visitor.
    #[error("traversal aborted at {path}: {reason}")]
    TraversalAborted {
        /// The path the visitor aborted at.
        path: StagePath,
        /// The visitor's reason.
        reason: String,
    },

    /// Duplicate endpoints addressed the same hierarchy on both sides.
    #[error("duplicate endpoints must span the two hierarchies")]
    UnsupportedDuplicate,

    /// A cross-hierarchy path string could not be parsed.
    #[error("invalid cross path {path:?}: {message}")]
    InvalidCrossPath {
        /// The offending path text.
        path: String,
        /// Description of the problem.
        message: String,
    },

    /// Persisted hierarchy error.
    #[error("stage error: {0}")]
    Stage(#[from] StageError),

    /// Editable hierarchy error.
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
}

impl SyncError {
    /// Creates a precondition failure.
    pub fn precondition(message: impl Into<String>) -> Self {
        Self::Precondition {
            message: message.into(),
        }
    }

    /// Creates an export failure.
    pub fn export_failed(message: impl Into<String>) -> Self {
        Self::ExportFailed {
            message: message.into(),
        }
    }

    /// Creates a per-node updater failure.
    pub fn updater_failed(path: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::UpdaterFailed {
            path: path.into(),
            operation: operation.into(),
        }
    }

    /// Creates an invalid cross path error.
    pub fn invalid_cross_path(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidCrossPath {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<TraversalFailure> for SyncError {
    fn from(failure: TraversalFailure) -> Self {
        Self::TraversalAborted {
            path: failure.path,
            reason: failure.reason,
        }
    }
}
