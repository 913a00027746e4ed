//! Data Models
//!
//! This module contains the core data structures used throughout Canopy:
//!
//! - `Node` - one row of the tree table, carrying the nested-set interval
//! - `TreeConfig` - static column bindings (order column, scope columns)
//! - `NodeTree` / `TreeEntry` - hierarchical export and import shapes
//!
//! All caller-defined attributes use the Pure JSON approach and live in the
//! `properties` field of the universal node row.

mod node;

pub use node::{compare_json_values, Node, NodeTree, ScopeKey, TreeConfig, TreeEntry};
