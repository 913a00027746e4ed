//! Business Services
//!
//! This module contains the nested-set engine services:
//!
//! - `TreeService` - lifecycle, structural moves, queries, maintenance and
//!   hierarchical exports
//! - `move_engine` - the interval arithmetic behind every structural change
//! - `set_validator` - structural invariant checks over loaded partitions
//! - `set_builder` - full interval rebuild from parent pointers
//! - `set_mapper` - bulk tree import with prune-and-replace semantics
//!
//! Services coordinate between the storage layer and application logic:
//! every mutating operation opens one transaction, delegates to the engine
//! internals, and commits or rolls back as a whole.

pub mod error;
pub(crate) mod move_engine;
pub(crate) mod set_builder;
pub(crate) mod set_mapper;
pub(crate) mod set_validator;
pub mod tree_service;

pub use error::TreeServiceError;
pub use move_engine::{MoveEvent, MovePosition};
pub use tree_service::{
    to_hierarchy, to_tree_entries, ChangeIntent, MoveObserver, NewNode, TreeService,
};
