//! In-Memory Store - Reference Backend
//!
//! A complete `NodeStore` implementation over a single in-process table,
//! used by the test suite and as the reference semantics for real backends.
//!
//! Concurrency model: one `tokio::sync::Mutex` guards the whole table and a
//! transaction holds the owned guard for its lifetime. That is the coarsest
//! possible range lock, so the pessimistic-locking contract of
//! `StoreTransaction::lock_for_update` holds trivially; `lock_for_update`
//! itself only logs. Transactions edit a working copy and publish it on
//! commit, so dropping a transaction (or calling `rollback`) discards every
//! pending write.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::db::error::StoreError;
use crate::db::node_store::{NodeChanges, NodeFilter, NodeStore, StoreTransaction};
use crate::models::Node;

/// Whole-table in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    table: Arc<Mutex<Vec<Node>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the full table, soft-deleted rows included. Test helper.
    pub async fn snapshot(&self) -> Vec<Node> {
        self.table.lock().await.clone()
    }
}

#[async_trait]
impl NodeStore for MemoryStore {
    async fn find_by_id(&self, id: &str) -> Result<Option<Node>, StoreError> {
        let table = self.table.lock().await;
        Ok(table.iter().find(|n| n.id == id && !n.is_deleted()).cloned())
    }

    async fn query(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        let table = self.table.lock().await;
        let rows = table.iter().filter(|n| filter.matches(n)).cloned().collect();
        Ok(filter.finish(rows))
    }

    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError> {
        let guard = Arc::clone(&self.table).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }
}

/// Open transaction over a [`MemoryStore`]: exclusive table guard plus a
/// working copy that replaces the table on commit.
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Vec<Node>>,
    working: Vec<Node>,
}

#[async_trait]
impl StoreTransaction for MemoryTransaction {
    async fn find_by_id(
        &mut self,
        id: &str,
        include_deleted: bool,
    ) -> Result<Option<Node>, StoreError> {
        Ok(self
            .working
            .iter()
            .find(|n| n.id == id && (include_deleted || !n.is_deleted()))
            .cloned())
    }

    async fn query(&mut self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError> {
        let rows = self
            .working
            .iter()
            .filter(|n| filter.matches(n))
            .cloned()
            .collect();
        Ok(filter.finish(rows))
    }

    async fn lock_for_update(&mut self, filter: &NodeFilter) -> Result<(), StoreError> {
        // The table guard is already exclusive for the whole transaction.
        let locked = self.working.iter().filter(|n| filter.matches(n)).count();
        tracing::trace!(rows = locked, "range lock held via table guard");
        Ok(())
    }

    async fn insert(&mut self, node: Node) -> Result<Node, StoreError> {
        if self.working.iter().any(|n| n.id == node.id) {
            return Err(StoreError::duplicate_id(&node.id));
        }
        self.working.push(node.clone());
        Ok(node)
    }

    async fn update_where(
        &mut self,
        filter: &NodeFilter,
        changes: &NodeChanges,
    ) -> Result<u64, StoreError> {
        let mut touched = 0;
        for node in self.working.iter_mut() {
            if filter.matches(node) {
                changes.apply(node);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn delete_where(&mut self, filter: &NodeFilter) -> Result<u64, StoreError> {
        let before = self.working.len();
        self.working.retain(|n| !filter.matches(n));
        Ok((before - self.working.len()) as u64)
    }

    async fn commit(mut self: Box<Self>) -> Result<(), StoreError> {
        *self.guard = std::mem::take(&mut self.working);
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        // Dropping the working copy discards every pending write.
        Ok(())
    }
}
