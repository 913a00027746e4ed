//! Canopy Core - Nested-Set Tree Engine
//!
//! This crate maintains hierarchical data encoded as nested sets: every node
//! carries a `(left, right)` interval, descendants are the rows whose
//! intervals nest strictly inside their ancestor's, and subtree or ancestry
//! queries become single range scans with no recursion.
//!
//! # Architecture
//!
//! - **Pure JSON properties**: all caller-defined attributes (scope and
//!   ordering columns included) live in one `properties` document
//! - **Explicit lifecycle**: create, two-phase update, move, delete, soft
//!   delete and restore are explicit service methods, each wrapping one
//!   transaction; there are no storage-side hooks
//! - **Scoped forests**: equality-constrained scope columns split the table
//!   into independent trees that never interact
//! - **Pluggable storage**: the engine speaks to a [`db::NodeStore`] trait;
//!   an in-memory implementation ships for embedding and tests
//!
//! # Modules
//!
//! - [`models`] - Data structures (Node, TreeConfig, TreeEntry, ...)
//! - [`services`] - Business services (TreeService and the engine internals)
//! - [`db`] - Storage abstraction and the in-memory backend

pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use db::*;
pub use models::*;
pub use services::*;
