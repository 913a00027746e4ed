//! NodeStore Trait - Storage Abstraction Layer
//!
//! This module defines the `NodeStore` and `StoreTransaction` traits that
//! abstract the backing store for the tree engine. The engine only ever
//! needs range-filtered reads, bulk range updates/deletes, pessimistic
//! range locks, and all-or-nothing transactions; any transactional
//! relational store can sit behind this contract.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: all methods are async so embedded and networked
//!    backends can implement the same contract
//! 2. **Predicate objects, not SQL**: `NodeFilter` captures the range
//!    predicates over `left`/`right`/`parent`/`depth`; backends translate
//!    them into whatever query language they speak
//! 3. **Additive bulk updates**: interval shifting is expressed as
//!    `NodeChanges` deltas applied over a filter, never as per-row writes
//! 4. **Explicit transactions**: every structural mutation runs inside one
//!    `StoreTransaction`; dropping a transaction without committing rolls it
//!    back

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::db::error::StoreError;
use crate::models::{compare_json_values, Node, ScopeKey};

/// Result-set ordering for [`NodeFilter`] queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum OrderBy {
    /// Backend-defined order
    #[default]
    Unordered,
    /// Ascending by `left` (tree order)
    LeftAsc,
    /// Descending by `left`
    LeftDesc,
    /// Descending by `right` (first row carries the scope's maximum `right`)
    RightDesc,
    /// By a property value, ties broken by `left` then id
    Property { key: String, descending: bool },
}

/// Range predicate over the tree table.
///
/// All fields are conjunctive; `None` means "no constraint". Soft-deleted
/// rows are excluded unless `include_deleted` is set.
#[derive(Debug, Clone, Default)]
pub struct NodeFilter {
    /// Scope column equality constraints
    pub scope: Option<ScopeKey>,

    /// Exact id match
    pub id: Option<String>,

    /// Restrict to these ids
    pub ids: Option<Vec<String>>,

    /// Exclude these ids
    pub exclude_ids: Option<Vec<String>>,

    /// Parent match; double-Option: `Some(None)` selects root rows
    pub parent_id: Option<Option<String>>,

    pub left_gt: Option<i64>,
    pub left_gte: Option<i64>,
    pub left_lt: Option<i64>,
    pub left_lte: Option<i64>,

    pub right_gt: Option<i64>,
    pub right_gte: Option<i64>,
    pub right_lt: Option<i64>,
    pub right_lte: Option<i64>,

    pub depth_gte: Option<i64>,
    pub depth_lte: Option<i64>,

    /// `Some(true)` selects leaves (`right - left == 1`), `Some(false)`
    /// selects positioned non-leaves
    pub is_leaf: Option<bool>,

    /// Include soft-deleted rows
    pub include_deleted: bool,

    pub order_by: OrderBy,

    pub limit: Option<usize>,
}

impl NodeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_scope(mut self, scope: ScopeKey) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_ids(mut self, ids: Vec<String>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn without_ids(mut self, ids: Vec<String>) -> Self {
        self.exclude_ids = Some(ids);
        self
    }

    /// `Some(id)` selects children of `id`; `None` selects root rows.
    pub fn with_parent(mut self, parent_id: Option<String>) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn left_gt(mut self, v: i64) -> Self {
        self.left_gt = Some(v);
        self
    }

    pub fn left_gte(mut self, v: i64) -> Self {
        self.left_gte = Some(v);
        self
    }

    pub fn left_lt(mut self, v: i64) -> Self {
        self.left_lt = Some(v);
        self
    }

    pub fn left_lte(mut self, v: i64) -> Self {
        self.left_lte = Some(v);
        self
    }

    pub fn right_gt(mut self, v: i64) -> Self {
        self.right_gt = Some(v);
        self
    }

    pub fn right_gte(mut self, v: i64) -> Self {
        self.right_gte = Some(v);
        self
    }

    pub fn right_lt(mut self, v: i64) -> Self {
        self.right_lt = Some(v);
        self
    }

    pub fn right_lte(mut self, v: i64) -> Self {
        self.right_lte = Some(v);
        self
    }

    pub fn depth_gte(mut self, v: i64) -> Self {
        self.depth_gte = Some(v);
        self
    }

    pub fn depth_lte(mut self, v: i64) -> Self {
        self.depth_lte = Some(v);
        self
    }

    pub fn leaves(mut self) -> Self {
        self.is_leaf = Some(true);
        self
    }

    pub fn non_leaves(mut self) -> Self {
        self.is_leaf = Some(false);
        self
    }

    pub fn with_deleted(mut self) -> Self {
        self.include_deleted = true;
        self
    }

    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by = order;
        self
    }

    pub fn take(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Evaluate the predicate against one row. Rows without an assigned
    /// interval never satisfy interval constraints (null comparison
    /// semantics).
    pub fn matches(&self, node: &Node) -> bool {
        if !self.include_deleted && node.is_deleted() {
            return false;
        }
        if let Some(scope) = &self.scope {
            if !scope.iter().all(|(col, v)| node.property(col) == v) {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if &node.id != id {
                return false;
            }
        }
        if let Some(ids) = &self.ids {
            if !ids.iter().any(|i| i == &node.id) {
                return false;
            }
        }
        if let Some(ids) = &self.exclude_ids {
            if ids.iter().any(|i| i == &node.id) {
                return false;
            }
        }
        if let Some(parent) = &self.parent_id {
            if &node.parent_id != parent {
                return false;
            }
        }

        let left_constrained = self.left_gt.is_some()
            || self.left_gte.is_some()
            || self.left_lt.is_some()
            || self.left_lte.is_some();
        let right_constrained = self.right_gt.is_some()
            || self.right_gte.is_some()
            || self.right_lt.is_some()
            || self.right_lte.is_some();

        if left_constrained {
            let Some(left) = node.left else { return false };
            if self.left_gt.is_some_and(|v| left <= v)
                || self.left_gte.is_some_and(|v| left < v)
                || self.left_lt.is_some_and(|v| left >= v)
                || self.left_lte.is_some_and(|v| left > v)
            {
                return false;
            }
        }
        if right_constrained {
            let Some(right) = node.right else { return false };
            if self.right_gt.is_some_and(|v| right <= v)
                || self.right_gte.is_some_and(|v| right < v)
                || self.right_lt.is_some_and(|v| right >= v)
                || self.right_lte.is_some_and(|v| right > v)
            {
                return false;
            }
        }
        if self.depth_gte.is_some_and(|v| node.depth < v)
            || self.depth_lte.is_some_and(|v| node.depth > v)
        {
            return false;
        }
        if let Some(want_leaf) = self.is_leaf {
            let Some((l, r)) = node.bounds() else { return false };
            if (r - l == 1) != want_leaf {
                return false;
            }
        }
        true
    }

    /// Sort a result set according to `order_by` and apply `limit`.
    /// Backends without native ordering can delegate here.
    pub fn finish(&self, mut rows: Vec<Node>) -> Vec<Node> {
        match &self.order_by {
            OrderBy::Unordered => {}
            OrderBy::LeftAsc => rows.sort_by_key(|n| (n.left.unwrap_or(i64::MAX), n.id.clone())),
            OrderBy::LeftDesc => {
                rows.sort_by_key(|n| (n.left.unwrap_or(i64::MAX), n.id.clone()));
                rows.reverse();
            }
            OrderBy::RightDesc => {
                rows.sort_by_key(|n| (n.right.unwrap_or(i64::MIN), n.id.clone()));
                rows.reverse();
            }
            OrderBy::Property { key, descending } => {
                rows.sort_by(|a, b| {
                    compare_json_values(a.property(key), b.property(key))
                        .then_with(|| a.left.unwrap_or(i64::MAX).cmp(&b.left.unwrap_or(i64::MAX)))
                        .then_with(|| a.id.cmp(&b.id))
                });
                if *descending {
                    rows.reverse();
                }
            }
        }
        if let Some(limit) = self.limit {
            rows.truncate(limit);
        }
        rows
    }
}

/// Bulk field changes applied over a [`NodeFilter`].
///
/// Deltas are additive and skip rows whose interval is unassigned (null
/// arithmetic semantics); `set_*` fields write absolute values. The
/// double-Option fields follow the usual pattern: outer `None` leaves the
/// column untouched, `Some(None)` nulls it out.
#[derive(Debug, Clone, Default)]
pub struct NodeChanges {
    pub left_delta: Option<i64>,
    pub right_delta: Option<i64>,
    pub depth_delta: Option<i64>,

    pub set_left: Option<i64>,
    pub set_right: Option<i64>,
    pub set_depth: Option<i64>,

    /// `Some(None)` makes the row a root
    pub set_parent_id: Option<Option<String>>,

    /// `Some(None)` clears the soft-delete marker
    pub set_deleted_at: Option<Option<DateTime<Utc>>>,

    /// Shallow-merge a JSON object into `properties`
    pub merge_properties: Option<Value>,
}

impl NodeChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shift_left(mut self, delta: i64) -> Self {
        self.left_delta = Some(delta);
        self
    }

    pub fn shift_right(mut self, delta: i64) -> Self {
        self.right_delta = Some(delta);
        self
    }

    pub fn shift_depth(mut self, delta: i64) -> Self {
        self.depth_delta = Some(delta);
        self
    }

    pub fn with_left(mut self, left: i64) -> Self {
        self.set_left = Some(left);
        self
    }

    pub fn with_right(mut self, right: i64) -> Self {
        self.set_right = Some(right);
        self
    }

    pub fn with_depth(mut self, depth: i64) -> Self {
        self.set_depth = Some(depth);
        self
    }

    pub fn set_parent(mut self, parent_id: Option<String>) -> Self {
        self.set_parent_id = Some(parent_id);
        self
    }

    pub fn set_deleted(mut self, deleted_at: Option<DateTime<Utc>>) -> Self {
        self.set_deleted_at = Some(deleted_at);
        self
    }

    pub fn merge_properties(mut self, properties: Value) -> Self {
        self.merge_properties = Some(properties);
        self
    }

    /// Apply the changes to one row in place.
    pub fn apply(&self, node: &mut Node) {
        if let Some(d) = self.left_delta {
            if let Some(l) = node.left {
                node.left = Some(l + d);
            }
        }
        if let Some(d) = self.right_delta {
            if let Some(r) = node.right {
                node.right = Some(r + d);
            }
        }
        if let Some(d) = self.depth_delta {
            node.depth += d;
        }
        if let Some(l) = self.set_left {
            node.left = Some(l);
        }
        if let Some(r) = self.set_right {
            node.right = Some(r);
        }
        if let Some(d) = self.set_depth {
            node.depth = d;
        }
        if let Some(parent) = &self.set_parent_id {
            node.parent_id = parent.clone();
            node.modified_at = Utc::now();
        }
        if let Some(deleted) = &self.set_deleted_at {
            node.deleted_at = *deleted;
        }
        if let Some(props) = &self.merge_properties {
            match (node.properties.as_object_mut(), props.as_object()) {
                (Some(dst), Some(src)) => {
                    for (k, v) in src {
                        dst.insert(k.clone(), v.clone());
                    }
                }
                _ => node.properties = props.clone(),
            }
            node.modified_at = Utc::now();
        }
    }
}

/// Abstraction layer for the tree table's backing store.
///
/// Implementations must be `Send + Sync`; futures may move between worker
/// threads. Reads outside a transaction see committed state only and take
/// no locks.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Look up one live (not soft-deleted) row by id.
    async fn find_by_id(&self, id: &str) -> Result<Option<Node>, StoreError>;

    /// Run a range query against committed state.
    async fn query(&self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError>;

    /// Open a transaction. All structural mutation goes through the
    /// returned handle; dropping it without committing rolls back.
    async fn begin(&self) -> Result<Box<dyn StoreTransaction>, StoreError>;
}

/// One open transaction against a [`NodeStore`].
#[async_trait]
pub trait StoreTransaction: Send {
    /// Look up one row by id within the transaction.
    async fn find_by_id(
        &mut self,
        id: &str,
        include_deleted: bool,
    ) -> Result<Option<Node>, StoreError>;

    /// Range query within the transaction.
    async fn query(&mut self, filter: &NodeFilter) -> Result<Vec<Node>, StoreError>;

    /// Acquire a pessimistic lock over every row the filter selects, before
    /// any shift math is computed from their values.
    async fn lock_for_update(&mut self, filter: &NodeFilter) -> Result<(), StoreError>;

    /// Insert a new row.
    async fn insert(&mut self, node: Node) -> Result<Node, StoreError>;

    /// Apply bulk changes to every row the filter selects; returns the
    /// number of rows touched.
    async fn update_where(
        &mut self,
        filter: &NodeFilter,
        changes: &NodeChanges,
    ) -> Result<u64, StoreError>;

    /// Delete every row the filter selects; returns the number of rows
    /// removed.
    async fn delete_where(&mut self, filter: &NodeFilter) -> Result<u64, StoreError>;

    /// Commit the transaction.
    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    /// Roll the transaction back explicitly.
    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
