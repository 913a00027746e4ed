//! Service Layer Error Types
//!
//! This module defines error types for tree operations, separating
//! structurally impossible requests (which are never retried) from
//! transient storage failures (which callers may retry).

use crate::db::StoreError;
use thiserror::Error;

/// Tree operation errors
///
/// The move preconditions are detected before any write happens, so every
/// structural error here guarantees storage was left untouched.
#[derive(Error, Debug)]
pub enum TreeServiceError {
    /// Structural mutation attempted on a node with no assigned interval
    #[error("Node '{id}' has no position in the tree yet and cannot be moved")]
    NewNodeCannotMove { id: String },

    /// Target of a move equals the node being moved
    #[error("Node '{id}' cannot be moved to itself")]
    CannotMoveToSelf { id: String },

    /// Target of a move lies inside the node's own subtree
    #[error("Node '{id}' cannot be moved to its descendant '{target_id}'")]
    CannotMoveToDescendant { id: String, target_id: String },

    /// A relative move has no sibling in that direction to anchor against
    #[error("Could not resolve target node: {context}")]
    NoTargetToResolve { context: String },

    /// Cross-scope move attempted
    #[error("Node '{id}' and target '{target_id}' are not in the same scope")]
    ScopeMismatch { id: String, target_id: String },

    /// A reload could not locate the expected row
    #[error("Node not found: {id}")]
    NodeNotFound { id: String },

    /// An observer vetoed the move before any write happened
    #[error("Move of node '{id}' was vetoed by an observer")]
    MoveVetoed { id: String },

    /// Parent chain loops back on itself (corrupted data)
    #[error("Circular reference detected: {context}")]
    CircularReference { context: String },

    /// Storage operation failed
    #[error("Storage operation failed: {0}")]
    Store(#[from] StoreError),
}

impl TreeServiceError {
    /// Create a new-node-cannot-move error
    pub fn new_node_cannot_move(id: impl Into<String>) -> Self {
        Self::NewNodeCannotMove { id: id.into() }
    }

    /// Create a cannot-move-to-self error
    pub fn cannot_move_to_self(id: impl Into<String>) -> Self {
        Self::CannotMoveToSelf { id: id.into() }
    }

    /// Create a cannot-move-to-descendant error
    pub fn cannot_move_to_descendant(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self::CannotMoveToDescendant {
            id: id.into(),
            target_id: target_id.into(),
        }
    }

    /// Create a no-target-to-resolve error
    pub fn no_target_to_resolve(context: impl Into<String>) -> Self {
        Self::NoTargetToResolve {
            context: context.into(),
        }
    }

    /// Create a scope mismatch error
    pub fn scope_mismatch(id: impl Into<String>, target_id: impl Into<String>) -> Self {
        Self::ScopeMismatch {
            id: id.into(),
            target_id: target_id.into(),
        }
    }

    /// Create a node not found error
    pub fn node_not_found(id: impl Into<String>) -> Self {
        Self::NodeNotFound { id: id.into() }
    }

    /// Create a move vetoed error
    pub fn move_vetoed(id: impl Into<String>) -> Self {
        Self::MoveVetoed { id: id.into() }
    }

    /// Create a circular reference error
    pub fn circular_reference(context: impl Into<String>) -> Self {
        Self::CircularReference {
            context: context.into(),
        }
    }

    /// Whether the failure is a transient storage condition worth retrying,
    /// as opposed to a structurally impossible request.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Store(e) if e.is_retryable())
    }
}
