//! Storage Layer
//!
//! This module defines the storage contract the tree engine runs against
//! and ships the in-memory reference backend:
//!
//! - `NodeStore` / `StoreTransaction` - the abstraction every backend
//!   implements: range-filtered reads, bulk range updates, pessimistic
//!   range locks, all-or-nothing transactions
//! - `NodeFilter` / `NodeChanges` - the predicate and change-set objects
//!   backends translate into their native query language
//! - `MemoryStore` - whole-table in-process backend used by the test suite
//!
//! The engine never issues point writes for interval maintenance; every
//! shift is a bulk additive update over a range predicate, which is what
//! lets a relational backend execute it as one indexed statement.

mod error;
mod memory_store;
mod node_store;

pub use error::StoreError;
pub use memory_store::{MemoryStore, MemoryTransaction};
pub use node_store::{NodeChanges, NodeFilter, NodeStore, OrderBy, StoreTransaction};
