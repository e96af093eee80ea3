//! Error types for the editable scene graph.

use crate::id::NodeId;
use thiserror::Error;

/// Result type for scene graph operations.
pub type SceneResult<T> = Result<T, SceneError>;

/// Errors that can occur in scene graph operations.
#[derive(Debug, Error)]
pub enum SceneError {
    /// The referenced node no longer exists.
    #[error("node not found: {id}")]
    NodeNotFound {
        /// The stale handle.
        id: NodeId,
    },

    /// A node name is empty or already taken where uniqueness is required.
    #[error("invalid node name {name:?}: {message}")]
    InvalidName {
        /// The offending name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The node cannot be deleted in its current state.
    #[error("cannot delete node {id}: {message}")]
    InvalidDelete {
        /// The node targeted for deletion.
        id: NodeId,
        /// Description of the problem.
        message: String,
    },

    /// A snapshot could not be restored.
    #[error("cannot restore node {id}: {message}")]
    InvalidRestore {
        /// The node the snapshot describes.
        id: NodeId,
        /// Description of the problem.
        message: String,
    },
}

impl SceneError {
    /// Creates a node not found error.
    pub fn node_not_found(id: NodeId) -> Self {
        Self::NodeNotFound { id }
    }

    /// Creates an invalid name error.
    pub fn invalid_name(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidName {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid delete error.
    pub fn invalid_delete(id: NodeId, message: impl Into<String>) -> Self {
        Self::InvalidDelete {
            id,
            message: message.into(),
        }
    }

    /// Creates an invalid restore error.
    pub fn invalid_restore(id: NodeId, message: impl Into<String>) -> Self {
        Self::InvalidRestore {
            id,
            message: message.into(),
        }
    }
}
