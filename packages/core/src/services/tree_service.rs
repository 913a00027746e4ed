//! Tree Service - Public Engine Surface
//!
//! This module provides the main business logic layer for nested-set trees:
//!
//! - Lifecycle operations (create, two-phase update, delete, soft delete,
//!   restore)
//! - Structural moves (left/right of a sibling, child of a target, root)
//! - Structural queries (roots, leaves, trunks, ancestors, descendants,
//!   siblings, levels)
//! - Maintenance (validation, full rebuild, bulk tree import)
//! - Hierarchical exports (nested tree projection, indented list)
//!
//! # Lifecycle model
//!
//! There are no storage-side hooks: every transition is an explicit method
//! that opens one transaction, delegates to the move engine, and commits or
//! rolls back as a whole. Re-parenting during an update travels inside a
//! [`ChangeIntent`] built by `begin_update` and applied by `commit_update`,
//! so nothing about a pending move lives in shared state.
//!
//! # Observers
//!
//! Registered [`MoveObserver`]s are invoked synchronously: `moving` runs
//! after the move's preconditions pass and before the first write, and may
//! veto the operation (the surrounding transaction rolls back untouched);
//! `moved` runs after the transaction commits.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::db::{NodeChanges, NodeFilter, NodeStore, OrderBy, StoreTransaction};
use crate::models::{Node, NodeTree, ScopeKey, TreeConfig, TreeEntry};
use crate::services::error::TreeServiceError;
use crate::services::move_engine::{self, MoveEvent, MovePosition};
use crate::services::{set_builder, set_mapper, set_validator};

/// Synchronous observation hooks for structural moves.
pub trait MoveObserver: Send + Sync {
    /// Called before any write; returning `false` vetoes the move and the
    /// operation it is attached to.
    fn moving(&self, _event: &MoveEvent) -> bool {
        true
    }

    /// Called after the move's transaction committed.
    fn moved(&self, _event: &MoveEvent) {}
}

/// Parameters for creating a node.
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    /// Optional caller-supplied id; `None` auto-generates a UUID.
    pub id: Option<String>,

    /// Parent to attach under; `None` creates a root.
    pub parent_id: Option<String>,

    /// Caller-defined attributes (scope and order columns included).
    pub properties: Value,
}

impl NewNode {
    pub fn new(properties: Value) -> Self {
        Self {
            id: None,
            parent_id: None,
            properties,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }
}

/// Pending changes for one node, built by [`TreeService::begin_update`] and
/// applied atomically by [`TreeService::commit_update`]. The re-parent
/// decision is carried here explicitly instead of through shared state, so
/// concurrent updates to different nodes cannot observe each other's
/// pending parents.
#[derive(Debug, Clone)]
pub struct ChangeIntent {
    node_id: String,
    original_parent: Option<String>,
    new_parent: Option<Option<String>>,
    merge_properties: Option<Value>,
}

impl ChangeIntent {
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Request a re-parent: `Some(id)` attaches under `id` as its last
    /// child, `None` promotes the node to a root.
    pub fn set_parent(mut self, parent_id: Option<String>) -> Self {
        self.new_parent = Some(parent_id);
        self
    }

    /// Shallow-merge attributes into the node's properties.
    pub fn merge_properties(mut self, properties: Value) -> Self {
        self.merge_properties = Some(properties);
        self
    }
}

/// Business service for one tree type over a [`NodeStore`] backend.
pub struct TreeService {
    store: Arc<dyn NodeStore>,
    config: TreeConfig,
    observers: RwLock<Vec<Arc<dyn MoveObserver>>>,
}

impl TreeService {
    pub fn new(store: Arc<dyn NodeStore>, config: TreeConfig) -> Self {
        Self {
            store,
            config,
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &TreeConfig {
        &self.config
    }

    /// Register a synchronous move observer.
    pub fn add_observer(&self, observer: Arc<dyn MoveObserver>) {
        // The list is append-only, so a poisoned lock still holds valid data.
        self.observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(observer);
    }

    fn observers_snapshot(&self) -> Vec<Arc<dyn MoveObserver>> {
        self.observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn notify_moved(observers: &[Arc<dyn MoveObserver>], events: &[MoveEvent]) {
        for event in events {
            for observer in observers {
                observer.moved(event);
            }
        }
    }

    /// Listing order for sibling-level result sets: the configured order
    /// column, falling back to tree position.
    fn sibling_order(&self) -> OrderBy {
        match &self.config.order_column {
            Some(key) => OrderBy::Property {
                key: key.clone(),
                descending: false,
            },
            None => OrderBy::LeftAsc,
        }
    }

    //
    // LIFECYCLE
    //

    /// Create a node: the allocator appends it at the end of its scope, and
    /// when a parent is given the move engine attaches it as that parent's
    /// last child, all inside one transaction.
    pub async fn create(&self, params: NewNode) -> Result<Node, TreeServiceError> {
        let observers = self.observers_snapshot();
        let mut tx = self.store.begin().await?;

        let mut node = match params.id {
            Some(id) => Node::new_with_id(id, params.properties),
            None => Node::new(params.properties),
        };
        let scope = node.scope_key(&self.config);

        let result = async {
            let (left, right) = move_engine::allocate_bounds(tx.as_mut(), &scope).await?;
            node.left = Some(left);
            node.right = Some(right);
            let node = tx.insert(node).await?;

            match &params.parent_id {
                Some(parent_id) => {
                    let mut moving = |ev: &MoveEvent| observers.iter().all(|o| o.moving(ev));
                    move_engine::perform_move(
                        tx.as_mut(),
                        &self.config,
                        &node.id,
                        MovePosition::Child,
                        Some(parent_id),
                        &mut moving,
                    )
                    .await
                }
                None => Ok((node, None)),
            }
        }
        .await;

        match result {
            Ok((node, event)) => {
                tx.commit().await?;
                tracing::debug!(node_id = %node.id, "created node");
                if let Some(event) = event {
                    Self::notify_moved(&observers, &[event]);
                }
                Ok(node)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Start a two-phase update for a node, capturing its current parent.
    pub async fn begin_update(&self, node_id: &str) -> Result<ChangeIntent, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        Ok(ChangeIntent {
            node_id: node.id,
            original_parent: node.parent_id,
            new_parent: None,
            merge_properties: None,
        })
    }

    /// Apply a [`ChangeIntent`]: attribute writes first, then the re-parent
    /// move when the intent's parent differs from the captured one.
    pub async fn commit_update(&self, intent: ChangeIntent) -> Result<Node, TreeServiceError> {
        let observers = self.observers_snapshot();
        let mut tx = self.store.begin().await?;

        let result = async {
            if let Some(properties) = &intent.merge_properties {
                tx.update_where(
                    &NodeFilter::new().with_id(&intent.node_id),
                    &NodeChanges::new().merge_properties(properties.clone()),
                )
                .await?;
            }

            match &intent.new_parent {
                Some(new_parent) if *new_parent != intent.original_parent => {
                    let mut moving = |ev: &MoveEvent| observers.iter().all(|o| o.moving(ev));
                    let (position, target) = match new_parent {
                        Some(parent_id) => (MovePosition::Child, Some(parent_id.as_str())),
                        None => (MovePosition::Root, None),
                    };
                    move_engine::perform_move(
                        tx.as_mut(),
                        &self.config,
                        &intent.node_id,
                        position,
                        target,
                        &mut moving,
                    )
                    .await
                }
                _ => {
                    move_engine::set_depth(tx.as_mut(), &intent.node_id).await?;
                    let node = move_engine::reload(tx.as_mut(), &intent.node_id).await?;
                    Ok((node, None))
                }
            }
        }
        .await;

        match result {
            Ok((node, event)) => {
                tx.commit().await?;
                if let Some(event) = event {
                    Self::notify_moved(&observers, &[event]);
                }
                Ok(node)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Hard-delete a node and its whole subtree, compacting the remaining
    /// forest. Returns the number of rows removed.
    pub async fn delete(&self, node_id: &str) -> Result<u64, TreeServiceError> {
        let mut tx = self.store.begin().await?;
        match move_engine::hard_delete_subtree(tx.as_mut(), &self.config, node_id).await {
            Ok(removed) => {
                tx.commit().await?;
                Ok(removed)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Soft-delete a node and its subtree. The trashed rows keep their
    /// interval values while the live forest compacts around them.
    pub async fn soft_delete(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        let mut tx = self.store.begin().await?;
        match move_engine::soft_delete_subtree(tx.as_mut(), &self.config, node_id).await {
            Ok(node) => {
                tx.commit().await?;
                Ok(node)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Restore a soft-deleted node and its subtree into a reopened gap.
    pub async fn restore(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        let mut tx = self.store.begin().await?;
        match move_engine::restore_subtree(tx.as_mut(), &self.config, node_id).await {
            Ok(node) => {
                tx.commit().await?;
                Ok(node)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    //
    // STRUCTURAL MOVES
    //

    /// Move immediately left of the nearest left sibling.
    pub async fn move_left(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        let sibling = self.left_sibling(node_id).await?.ok_or_else(|| {
            TreeServiceError::no_target_to_resolve("this node cannot move any further to the left")
        })?;
        self.move_to_left_of(node_id, &sibling.id).await
    }

    /// Move immediately right of the nearest right sibling.
    pub async fn move_right(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        let sibling = self.right_sibling(node_id).await?.ok_or_else(|| {
            TreeServiceError::no_target_to_resolve("this node cannot move any further to the right")
        })?;
        self.move_to_right_of(node_id, &sibling.id).await
    }

    /// Move to the immediate left of the target.
    pub async fn move_to_left_of(
        &self,
        node_id: &str,
        target_id: &str,
    ) -> Result<Node, TreeServiceError> {
        self.move_node(node_id, MovePosition::Left, Some(target_id))
            .await
    }

    /// Move to the immediate right of the target.
    pub async fn move_to_right_of(
        &self,
        node_id: &str,
        target_id: &str,
    ) -> Result<Node, TreeServiceError> {
        self.move_node(node_id, MovePosition::Right, Some(target_id))
            .await
    }

    /// Make the node the target's last child.
    pub async fn make_child_of(
        &self,
        node_id: &str,
        target_id: &str,
    ) -> Result<Node, TreeServiceError> {
        self.move_node(node_id, MovePosition::Child, Some(target_id))
            .await
    }

    /// Alias for [`TreeService::make_child_of`]: a plain child move always
    /// appends as the last child.
    pub async fn make_last_child_of(
        &self,
        node_id: &str,
        target_id: &str,
    ) -> Result<Node, TreeServiceError> {
        self.make_child_of(node_id, target_id).await
    }

    /// Make the node the target's first child: when the target already has
    /// children this is a move to the left of the current first child.
    pub async fn make_first_child_of(
        &self,
        node_id: &str,
        target_id: &str,
    ) -> Result<Node, TreeServiceError> {
        let children = self.children(target_id).await?;
        match children.first() {
            None => self.make_child_of(node_id, target_id).await,
            Some(first) => self.move_to_left_of(node_id, &first.id).await,
        }
    }

    /// Detach the node's subtree and append it after the last root in its
    /// scope.
    pub async fn make_root(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        self.move_node(node_id, MovePosition::Root, None).await
    }

    async fn move_node(
        &self,
        node_id: &str,
        position: MovePosition,
        target_id: Option<&str>,
    ) -> Result<Node, TreeServiceError> {
        let observers = self.observers_snapshot();
        let mut tx = self.store.begin().await?;
        let mut moving = |ev: &MoveEvent| observers.iter().all(|o| o.moving(ev));

        let result = move_engine::perform_move(
            tx.as_mut(),
            &self.config,
            node_id,
            position,
            target_id,
            &mut moving,
        )
        .await;

        match result {
            Ok((node, event)) => {
                tx.commit().await?;
                if let Some(event) = event {
                    Self::notify_moved(&observers, &[event]);
                }
                Ok(node)
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    //
    // STRUCTURAL QUERIES
    //

    /// Look up one live node by id.
    pub async fn get_node(&self, node_id: &str) -> Result<Option<Node>, TreeServiceError> {
        Ok(self.store.find_by_id(node_id).await?)
    }

    async fn require_node(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        self.store
            .find_by_id(node_id)
            .await?
            .ok_or_else(|| TreeServiceError::node_not_found(node_id))
    }

    /// All root nodes, optionally restricted to one scope.
    pub async fn roots(&self, scope: Option<&ScopeKey>) -> Result<Vec<Node>, TreeServiceError> {
        let mut filter = NodeFilter::new()
            .with_parent(None)
            .order_by(self.sibling_order());
        if let Some(scope) = scope {
            filter = filter.in_scope(scope.clone());
        }
        Ok(self.store.query(&filter).await?)
    }

    /// The first root node, optionally restricted to one scope.
    pub async fn root(&self, scope: Option<&ScopeKey>) -> Result<Option<Node>, TreeServiceError> {
        Ok(self.roots(scope).await?.into_iter().next())
    }

    /// Every leaf node (`right - left == 1`), optionally scoped.
    pub async fn all_leaves(&self, scope: Option<&ScopeKey>) -> Result<Vec<Node>, TreeServiceError> {
        let mut filter = NodeFilter::new().leaves().order_by(self.sibling_order());
        if let Some(scope) = scope {
            filter = filter.in_scope(scope.clone());
        }
        Ok(self.store.query(&filter).await?)
    }

    /// Every trunk node (neither root nor leaf), optionally scoped.
    pub async fn all_trunks(&self, scope: Option<&ScopeKey>) -> Result<Vec<Node>, TreeServiceError> {
        let mut filter = NodeFilter::new().non_leaves().order_by(self.sibling_order());
        if let Some(scope) = scope {
            filter = filter.in_scope(scope.clone());
        }
        let mut rows = self.store.query(&filter).await?;
        rows.retain(|n| n.parent_id.is_some());
        Ok(rows)
    }

    /// Direct children in sibling order.
    pub async fn children(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        let filter = NodeFilter::new()
            .with_parent(Some(node_id.to_string()))
            .order_by(self.sibling_order());
        Ok(self.store.query(&filter).await?)
    }

    /// The node's ancestor chain from the root down, including itself.
    pub async fn ancestors_and_self(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let Some((left, right)) = node.bounds() else {
            return Ok(vec![node]);
        };
        let filter = NodeFilter::new()
            .in_scope(node.scope_key(&self.config))
            .left_lte(left)
            .right_gte(right)
            .order_by(OrderBy::LeftAsc);
        Ok(self.store.query(&filter).await?)
    }

    /// The node's ancestor chain from the root down, excluding itself.
    pub async fn ancestors(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        let mut rows = self.ancestors_and_self(node_id).await?;
        rows.retain(|n| n.id != node_id);
        Ok(rows)
    }

    /// The root at the top of the node's ancestor chain.
    pub async fn get_root(&self, node_id: &str) -> Result<Node, TreeServiceError> {
        self.ancestors_and_self(node_id)
            .await?
            .into_iter()
            .find(|n| n.is_root())
            .ok_or_else(|| TreeServiceError::node_not_found(node_id))
    }

    /// The node's whole subtree in tree (left) order, itself included.
    pub async fn descendants_and_self(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        self.descendants_query(node_id, None, true).await
    }

    /// The node's whole subtree in tree order, itself excluded.
    pub async fn descendants(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        self.descendants_query(node_id, None, false).await
    }

    /// Subtree limited to `limit` levels below the node, itself included.
    pub async fn descendants_and_self_limit_depth(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<Node>, TreeServiceError> {
        self.descendants_query(node_id, Some(limit), true).await
    }

    /// Subtree limited to `limit` levels below the node, itself excluded.
    pub async fn descendants_limit_depth(
        &self,
        node_id: &str,
        limit: i64,
    ) -> Result<Vec<Node>, TreeServiceError> {
        self.descendants_query(node_id, Some(limit), false).await
    }

    async fn descendants_query(
        &self,
        node_id: &str,
        depth_limit: Option<i64>,
        and_self: bool,
    ) -> Result<Vec<Node>, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let Some((left, right)) = node.bounds() else {
            return Ok(if and_self { vec![node] } else { Vec::new() });
        };
        let mut filter = NodeFilter::new()
            .in_scope(node.scope_key(&self.config))
            .left_gte(left)
            .left_lt(right)
            .order_by(OrderBy::LeftAsc);
        if let Some(limit) = depth_limit {
            filter = filter.depth_gte(node.depth).depth_lte(node.depth + limit);
        }
        let mut rows = self.store.query(&filter).await?;
        if !and_self {
            rows.retain(|n| n.id != node_id);
        }
        Ok(rows)
    }

    /// All children of the node's parent in sibling order, itself included.
    pub async fn siblings_and_self(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let filter = NodeFilter::new()
            .in_scope(node.scope_key(&self.config))
            .with_parent(node.parent_id.clone())
            .order_by(self.sibling_order());
        Ok(self.store.query(&filter).await?)
    }

    /// All children of the node's parent in sibling order, itself excluded.
    pub async fn siblings(&self, node_id: &str) -> Result<Vec<Node>, TreeServiceError> {
        let mut rows = self.siblings_and_self(node_id).await?;
        rows.retain(|n| n.id != node_id);
        Ok(rows)
    }

    /// The interval-adjacent sibling to the left, if any. Adjacency always
    /// follows tree position, even when listing order comes from a custom
    /// order column.
    pub async fn left_sibling(&self, node_id: &str) -> Result<Option<Node>, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let Some((left, _)) = node.bounds() else {
            return Ok(None);
        };
        let filter = NodeFilter::new()
            .in_scope(node.scope_key(&self.config))
            .with_parent(node.parent_id.clone())
            .left_lt(left)
            .order_by(OrderBy::LeftAsc);
        Ok(self.store.query(&filter).await?.pop())
    }

    /// The interval-adjacent sibling to the right, if any.
    pub async fn right_sibling(&self, node_id: &str) -> Result<Option<Node>, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let Some((left, _)) = node.bounds() else {
            return Ok(None);
        };
        let filter = NodeFilter::new()
            .in_scope(node.scope_key(&self.config))
            .with_parent(node.parent_id.clone())
            .left_gt(left)
            .order_by(OrderBy::LeftAsc)
            .take(1);
        Ok(self.store.query(&filter).await?.into_iter().next())
    }

    /// The node's level in the tree (root = 0), computed by walking parent
    /// links with a cycle guard rather than trusting the stored depth.
    pub async fn level(&self, node_id: &str) -> Result<i64, TreeServiceError> {
        let node = self.require_node(node_id).await?;
        let mut visited: HashSet<String> = HashSet::from([node.id.clone()]);
        let mut current = node;
        let mut hops = 0;
        while let Some(parent_id) = current.parent_id.clone() {
            if !visited.insert(parent_id.clone()) {
                return Err(TreeServiceError::circular_reference(format!(
                    "parent chain of node '{node_id}' revisits '{parent_id}'"
                )));
            }
            match self.store.find_by_id(&parent_id).await? {
                Some(parent) => {
                    hops += 1;
                    current = parent;
                }
                None => break,
            }
        }
        Ok(hops)
    }

    //
    // MAINTENANCE
    //

    /// Check the nested-set invariants over one scope (or every scope).
    /// Purely read-only; takes no locks.
    pub async fn is_valid_nested_set(
        &self,
        scope: Option<&ScopeKey>,
    ) -> Result<bool, TreeServiceError> {
        let filter = match scope {
            Some(scope) => NodeFilter::new().in_scope(scope.clone()),
            None => NodeFilter::new(),
        };
        let rows = self.store.query(&filter).await?;
        Ok(set_validator::check(&rows, &self.config))
    }

    /// Recompute every interval and depth from the parent pointers alone.
    /// Skips partitions that already validate unless `force` is set.
    pub async fn rebuild(
        &self,
        scope: Option<&ScopeKey>,
        force: bool,
    ) -> Result<(), TreeServiceError> {
        let mut tx = self.store.begin().await?;
        match set_builder::rebuild(tx.as_mut(), &self.config, scope, force).await {
            Ok(()) => {
                tx.commit().await?;
                tracing::debug!("rebuild committed");
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    /// Import root-level trees: upsert every entry, then prune untouched
    /// rows from the target scope. All-or-nothing.
    pub async fn build_tree(&self, entries: &[TreeEntry]) -> Result<(), TreeServiceError> {
        self.map_tree_internal(None, entries).await
    }

    /// Import `entries` as the descendancy of an existing node, pruning the
    /// rest of its subtree. All-or-nothing.
    pub async fn make_tree(
        &self,
        node_id: &str,
        entries: &[TreeEntry],
    ) -> Result<(), TreeServiceError> {
        let parent = self.require_node(node_id).await?;
        self.map_tree_internal(Some(parent), entries).await
    }

    async fn map_tree_internal(
        &self,
        parent: Option<Node>,
        entries: &[TreeEntry],
    ) -> Result<(), TreeServiceError> {
        let observers = self.observers_snapshot();
        let mut tx = self.store.begin().await?;
        let mut moving = |ev: &MoveEvent| observers.iter().all(|o| o.moving(ev));
        let mut events = Vec::new();

        let result = set_mapper::map_tree(
            tx.as_mut(),
            &self.config,
            parent.as_ref(),
            entries,
            &mut moving,
            &mut events,
        )
        .await;

        match result {
            Ok(()) => {
                tx.commit().await?;
                Self::notify_moved(&observers, &events);
                Ok(())
            }
            Err(e) => {
                let _ = tx.rollback().await;
                Err(e)
            }
        }
    }

    //
    // EXPORTS
    //

    /// Ordered `(id, indented label)` pairs for a whole scope: the label
    /// column's value prefixed by `separator` repeated depth times.
    pub async fn get_nested_list(
        &self,
        scope: Option<&ScopeKey>,
        label_column: &str,
        separator: &str,
    ) -> Result<Vec<(String, String)>, TreeServiceError> {
        let mut filter = NodeFilter::new().order_by(self.sibling_order());
        if let Some(scope) = scope {
            filter = filter.in_scope(scope.clone());
        }
        let rows = self.store.query(&filter).await?;
        Ok(rows
            .into_iter()
            .map(|node| {
                let label = match node.property(label_column) {
                    Value::String(s) => s.clone(),
                    Value::Null => String::new(),
                    other => other.to_string(),
                };
                let indent = separator.repeat(node.depth.max(0) as usize);
                (node.id, format!("{indent}{label}"))
            })
            .collect())
    }

    /// Export a node's descendancy as a tree description. Feeding the result
    /// back through [`TreeService::make_tree`] on the same node reproduces
    /// the same parent/child structure and ordering.
    pub async fn export_tree(&self, node_id: &str) -> Result<Vec<TreeEntry>, TreeServiceError> {
        let rows = self.descendants(node_id).await?;
        Ok(to_tree_entries(rows))
    }
}

/// Nest a flat, left-ordered result set into parent/children groups in one
/// pass over the parent links already loaded in memory, with no extra
/// queries.
/// Rows whose parent is not part of the set become top-level entries.
pub fn to_hierarchy(nodes: Vec<Node>) -> Vec<NodeTree> {
    let present: HashSet<String> = nodes.iter().map(|n| n.id.clone()).collect();
    let mut children_of: HashMap<String, Vec<Node>> = HashMap::new();
    let mut top: Vec<Node> = Vec::new();

    for node in nodes {
        match &node.parent_id {
            Some(parent_id) if present.contains(parent_id) => {
                children_of.entry(parent_id.clone()).or_default().push(node)
            }
            _ => top.push(node),
        }
    }

    fn attach(node: Node, children_of: &mut HashMap<String, Vec<Node>>) -> NodeTree {
        let children = children_of
            .remove(&node.id)
            .map(|kids| kids.into_iter().map(|k| attach(k, children_of)).collect())
            .unwrap_or_default();
        NodeTree { node, children }
    }

    top.into_iter().map(|n| attach(n, &mut children_of)).collect()
}

/// Convert a flat, left-ordered result set into mapper entries, one per
/// node with its `properties` flattened into the entry's attributes.
pub fn to_tree_entries(nodes: Vec<Node>) -> Vec<TreeEntry> {
    fn convert(tree: NodeTree) -> TreeEntry {
        let attributes = match tree.node.properties {
            Value::Object(map) => map,
            _ => serde_json::Map::new(),
        };
        TreeEntry {
            id: Some(tree.node.id),
            attributes,
            children: tree.children.into_iter().map(convert).collect(),
        }
    }

    to_hierarchy(nodes).into_iter().map(convert).collect()
}

// Comprehensive tests in separate modules
#[cfg(test)]
#[path = "tree_service_move_test.rs"]
mod tree_service_move_test;

#[cfg(test)]
#[path = "tree_service_delete_test.rs"]
mod tree_service_delete_test;

#[cfg(test)]
#[path = "tree_service_query_test.rs"]
mod tree_service_query_test;
