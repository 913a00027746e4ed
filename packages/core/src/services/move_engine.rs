//! Move Engine - Interval Maintenance Primitives
//!
//! Everything that rewrites `(left, right)` intervals lives here: the
//! append-at-end allocator, the subtree move algorithm, subtree deletion
//! with gap compaction, the soft-delete/restore gap expander, and depth
//! maintenance. All functions operate inside a caller-supplied
//! `StoreTransaction`, so composite operations (create-then-attach, tree
//! mapping) stay all-or-nothing.
//!
//! # The move algorithm
//!
//! A move is the classic nested-set detach/shift/reattach expressed as four
//! bulk range updates:
//!
//! 1. shift the moved subtree into negative interval space, excluding it
//!    from every later range comparison
//! 2. close the gap it left behind
//! 3. re-read the target and open a gap of the subtree's span at the new
//!    insertion point (widen before insert)
//! 4. shift the parked subtree back into the gap with one additive offset,
//!    preserving every relative position inside it
//!
//! followed by the parent pointer update and a depth recompute that
//! propagates the delta to descendants instead of revisiting each row.

use crate::db::{NodeChanges, NodeFilter, OrderBy, StoreTransaction};
use crate::models::{Node, ScopeKey, TreeConfig};
use crate::services::error::TreeServiceError;
use chrono::Utc;
use std::collections::HashSet;

/// Requested placement of a moved subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovePosition {
    /// Detach from any parent and append after the last root in scope
    Root,
    /// Become the target's last child
    Child,
    /// Become the sibling immediately left of the target
    Left,
    /// Become the sibling immediately right of the target
    Right,
}

/// Notification payload for move observers.
#[derive(Debug, Clone)]
pub struct MoveEvent {
    pub node_id: String,
    pub target_id: Option<String>,
    pub position: MovePosition,
}

/// Veto callback invoked after preconditions pass and before the first
/// write; returning `false` aborts the move with no mutation.
pub type MovingCallback<'a> = &'a mut (dyn FnMut(&MoveEvent) -> bool + Send);

/// Reload a live row inside the transaction, failing with `NodeNotFound`
/// when it was deleted out from under an in-memory handle.
pub(crate) async fn reload(
    tx: &mut dyn StoreTransaction,
    id: &str,
) -> Result<Node, TreeServiceError> {
    tx.find_by_id(id, false)
        .await?
        .ok_or_else(|| TreeServiceError::node_not_found(id))
}

/// Maximum `right` among positioned rows in scope, 0 when the scope is
/// empty.
pub(crate) async fn max_right(
    tx: &mut dyn StoreTransaction,
    scope: &ScopeKey,
) -> Result<i64, TreeServiceError> {
    let rows = tx
        .query(
            &NodeFilter::new()
                .in_scope(scope.clone())
                .right_gte(1)
                .order_by(OrderBy::RightDesc)
                .take(1),
        )
        .await?;
    Ok(rows.first().and_then(|n| n.right).unwrap_or(0))
}

/// Interval allocator: append-at-end placement for a new node.
///
/// Reads the scope's maximum `right` under the range lock and hands out
/// `(max + 1, max + 2)`; an empty scope yields `(1, 2)`.
pub(crate) async fn allocate_bounds(
    tx: &mut dyn StoreTransaction,
    scope: &ScopeKey,
) -> Result<(i64, i64), TreeServiceError> {
    tx.lock_for_update(&NodeFilter::new().in_scope(scope.clone()))
        .await?;
    let max = max_right(tx, scope).await?;
    Ok((max + 1, max + 2))
}

/// Iterative ancestor count with a visited-set guard against parent cycles
/// from corrupted data. A dangling parent pointer terminates the walk.
pub(crate) async fn compute_level(
    tx: &mut dyn StoreTransaction,
    node: &Node,
) -> Result<i64, TreeServiceError> {
    let mut visited: HashSet<String> = HashSet::from([node.id.clone()]);
    let mut current = node.clone();
    let mut hops = 0;
    while let Some(parent_id) = current.parent_id.clone() {
        if !visited.insert(parent_id.clone()) {
            return Err(TreeServiceError::circular_reference(format!(
                "parent chain of node '{}' revisits '{}'",
                node.id, parent_id
            )));
        }
        match tx.find_by_id(&parent_id, false).await? {
            Some(parent) => {
                hops += 1;
                current = parent;
            }
            None => break,
        }
    }
    Ok(hops)
}

/// Recompute and persist the node's depth; returns the new value.
pub(crate) async fn set_depth(
    tx: &mut dyn StoreTransaction,
    node_id: &str,
) -> Result<i64, TreeServiceError> {
    let node = reload(tx, node_id).await?;
    let level = compute_level(tx, &node).await?;
    tx.update_where(
        &NodeFilter::new().with_id(node_id),
        &NodeChanges::new().with_depth(level),
    )
    .await?;
    Ok(level)
}

/// Recompute the node's depth and propagate the delta to every strict
/// descendant as one additive update.
pub(crate) async fn set_depth_with_subtree(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    node_id: &str,
) -> Result<Node, TreeServiceError> {
    let node = reload(tx, node_id).await?;

    if let Some((left, right)) = node.bounds() {
        tx.lock_for_update(
            &NodeFilter::new()
                .in_scope(node.scope_key(config))
                .left_gte(left)
                .right_lte(right),
        )
        .await?;
    }

    let old_depth = node.depth;
    let new_depth = compute_level(tx, &node).await?;
    tx.update_where(
        &NodeFilter::new().with_id(node_id),
        &NodeChanges::new().with_depth(new_depth),
    )
    .await?;

    let diff = new_depth - old_depth;
    if diff != 0 && !node.is_leaf() {
        if let Some((left, right)) = node.bounds() {
            tx.update_where(
                &NodeFilter::new()
                    .in_scope(node.scope_key(config))
                    .left_gt(left)
                    .right_lt(right),
                &NodeChanges::new().shift_depth(diff),
            )
            .await?;
        }
    }

    reload(tx, node_id).await
}

/// Main move primitive. Validates the request, fires the veto callback,
/// then relocates the subtree. Returns the refreshed node and the event
/// that should be broadcast after commit (`None` when the move was a
/// structural no-op).
pub(crate) async fn perform_move(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    node_id: &str,
    position: MovePosition,
    target_id: Option<&str>,
    moving: MovingCallback<'_>,
) -> Result<(Node, Option<MoveEvent>), TreeServiceError> {
    let node = reload(tx, node_id).await?;
    let (a, b) = node
        .bounds()
        .ok_or_else(|| TreeServiceError::new_node_cannot_move(&node.id))?;

    let target = match position {
        MovePosition::Root => None,
        _ => {
            let tid = target_id
                .ok_or_else(|| TreeServiceError::no_target_to_resolve("no target node given"))?;
            Some(reload(tx, tid).await?)
        }
    };

    if let Some(t) = &target {
        if t.id == node.id {
            return Err(TreeServiceError::cannot_move_to_self(&node.id));
        }
        let (tl, tr) = t.bounds().ok_or_else(|| {
            TreeServiceError::no_target_to_resolve(format!(
                "target node '{}' has no position in the tree",
                t.id
            ))
        })?;
        if !node.in_same_scope(t, config) {
            return Err(TreeServiceError::scope_mismatch(&node.id, &t.id));
        }
        if tl >= a && tr <= b {
            return Err(TreeServiceError::cannot_move_to_descendant(&node.id, &t.id));
        }
    }

    let scope = node.scope_key(config);
    let scope_filter = NodeFilter::new().in_scope(scope.clone());
    tx.lock_for_update(&scope_filter).await?;

    let raw_bound = match (&position, &target) {
        (MovePosition::Child, Some(t)) => t.right.unwrap_or(0),
        (MovePosition::Left, Some(t)) => t.left.unwrap_or(0),
        (MovePosition::Right, Some(t)) => t.right.unwrap_or(0) + 1,
        (MovePosition::Root, _) => max_right(tx, &scope).await? + 1,
        _ => unreachable!("non-root move without target"),
    };
    // Collapse the subtree's own span out of the bound; if the adjusted
    // bound lands on the node's own edge the tree already has this shape.
    let bound = if raw_bound > b { raw_bound - 1 } else { raw_bound };
    if bound == a || bound == b {
        return Ok((node, None));
    }

    let event = MoveEvent {
        node_id: node.id.clone(),
        target_id: target.as_ref().map(|t| t.id.clone()),
        position,
    };
    if !moving(&event) {
        return Err(TreeServiceError::move_vetoed(&node.id));
    }

    let size = b - a + 1;
    tracing::debug!(
        node_id = %node.id,
        position = ?position,
        span = size,
        "relocating subtree"
    );

    // Park the subtree in negative interval space.
    tx.update_where(
        &scope_filter.clone().left_gte(a).right_lte(b),
        &NodeChanges::new().shift_left(-(b + 1)).shift_right(-(b + 1)),
    )
    .await?;

    // Close the gap it left behind.
    tx.update_where(
        &scope_filter.clone().left_gt(b),
        &NodeChanges::new().shift_left(-size),
    )
    .await?;
    tx.update_where(
        &scope_filter.clone().right_gt(b),
        &NodeChanges::new().shift_right(-size),
    )
    .await?;

    // The target may itself have shifted while the gap closed, so the
    // insertion point is recomputed from fresh values.
    let new_pos = match (&position, &target) {
        (MovePosition::Child, Some(t)) => reload(tx, &t.id).await?.right.unwrap_or(0),
        (MovePosition::Left, Some(t)) => reload(tx, &t.id).await?.left.unwrap_or(0),
        (MovePosition::Right, Some(t)) => reload(tx, &t.id).await?.right.unwrap_or(0) + 1,
        (MovePosition::Root, _) => max_right(tx, &scope).await? + 1,
        _ => unreachable!("non-root move without target"),
    };

    // Widen before insert: open a gap of the subtree's span.
    tx.update_where(
        &scope_filter.clone().left_gte(new_pos),
        &NodeChanges::new().shift_left(size),
    )
    .await?;
    tx.update_where(
        &scope_filter.clone().right_gte(new_pos),
        &NodeChanges::new().shift_right(size),
    )
    .await?;

    // Pull the parked subtree into the gap; a single additive offset keeps
    // every relative position inside it intact.
    let offset = new_pos - a + b + 1;
    tx.update_where(
        &scope_filter.clone().left_lt(0),
        &NodeChanges::new().shift_left(offset).shift_right(offset),
    )
    .await?;

    let new_parent = match (&position, &target) {
        (MovePosition::Root, _) => None,
        (MovePosition::Child, Some(t)) => Some(t.id.clone()),
        (MovePosition::Left | MovePosition::Right, Some(t)) => t.parent_id.clone(),
        _ => unreachable!("non-root move without target"),
    };
    tx.update_where(
        &NodeFilter::new().with_id(&node.id),
        &NodeChanges::new().set_parent(new_parent),
    )
    .await?;

    let node = set_depth_with_subtree(tx, config, node_id).await?;
    Ok((node, Some(event)))
}

/// Hard-delete a node together with its whole subtree, then shift trailing
/// intervals left to close the gap. A row that never got an interval is
/// removed without any shifting.
pub(crate) async fn hard_delete_subtree(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    node_id: &str,
) -> Result<u64, TreeServiceError> {
    let node = reload(tx, node_id).await?;
    let id_filter = NodeFilter::new().with_id(&node.id);

    let Some((left, right)) = node.bounds() else {
        return Ok(tx.delete_where(&id_filter).await?);
    };

    let scope_filter = NodeFilter::new().in_scope(node.scope_key(config));
    tx.lock_for_update(&scope_filter.clone().left_gte(left)).await?;

    let mut removed = tx
        .delete_where(&scope_filter.clone().left_gt(left).right_lt(right))
        .await?;
    removed += tx.delete_where(&id_filter).await?;

    let diff = right - left + 1;
    tx.update_where(
        &scope_filter.clone().left_gt(right),
        &NodeChanges::new().shift_left(-diff),
    )
    .await?;
    tx.update_where(
        &scope_filter.clone().right_gt(right),
        &NodeChanges::new().shift_right(-diff),
    )
    .await?;

    tracing::debug!(node_id = %node.id, removed, "pruned subtree and compacted intervals");
    Ok(removed)
}

/// Soft-delete a node and its subtree: mark the rows, then compact the live
/// forest exactly as a hard delete would. The trashed rows keep their stale
/// interval values until restored.
pub(crate) async fn soft_delete_subtree(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    node_id: &str,
) -> Result<Node, TreeServiceError> {
    let node = reload(tx, node_id).await?;
    let now = Utc::now();
    let id_filter = NodeFilter::new().with_id(&node.id);

    let Some((left, right)) = node.bounds() else {
        tx.update_where(&id_filter, &NodeChanges::new().set_deleted(Some(now)))
            .await?;
        return reload_trashed(tx, node_id).await;
    };

    let scope_filter = NodeFilter::new().in_scope(node.scope_key(config));
    tx.lock_for_update(&scope_filter.clone().left_gte(left)).await?;

    // Mark the subtree first so the compaction below only sees live rows.
    tx.update_where(
        &scope_filter.clone().left_gte(left).right_lte(right),
        &NodeChanges::new().set_deleted(Some(now)),
    )
    .await?;

    let diff = right - left + 1;
    tx.update_where(
        &scope_filter.clone().left_gt(right),
        &NodeChanges::new().shift_left(-diff),
    )
    .await?;
    tx.update_where(
        &scope_filter.clone().right_gt(right),
        &NodeChanges::new().shift_right(-diff),
    )
    .await?;

    reload_trashed(tx, node_id).await
}

/// Restore a soft-deleted node and its subtree: reopen the gap the node
/// used to occupy, then clear the marker on every row inside its interval.
pub(crate) async fn restore_subtree(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    node_id: &str,
) -> Result<Node, TreeServiceError> {
    let node = tx
        .find_by_id(node_id, true)
        .await?
        .ok_or_else(|| TreeServiceError::node_not_found(node_id))?;
    if !node.is_deleted() {
        return Ok(node);
    }

    // The row is still trashed here, so the id lookup must not filter on
    // the marker it is about to clear.
    let id_filter = NodeFilter::new().with_id(&node.id).with_deleted();

    let Some((left, right)) = node.bounds() else {
        tx.update_where(&id_filter, &NodeChanges::new().set_deleted(None))
            .await?;
        return reload(tx, node_id).await;
    };

    let scope_filter = NodeFilter::new().in_scope(node.scope_key(config));
    tx.lock_for_update(&scope_filter.clone().left_gte(left)).await?;

    // Reopen the gap among live rows; the trashed subtree still holds its
    // pre-delete interval values, which drop straight back into place.
    let diff = right - left + 1;
    tx.update_where(
        &scope_filter.clone().left_gte(left),
        &NodeChanges::new().shift_left(diff),
    )
    .await?;
    tx.update_where(
        &scope_filter.clone().right_gte(left),
        &NodeChanges::new().shift_right(diff),
    )
    .await?;

    tx.update_where(&id_filter, &NodeChanges::new().set_deleted(None))
        .await?;
    tx.update_where(
        &scope_filter
            .clone()
            .with_deleted()
            .left_gt(left)
            .right_lt(right),
        &NodeChanges::new().set_deleted(None),
    )
    .await?;

    tracing::debug!(node_id = %node.id, "restored subtree into reopened gap");
    reload(tx, node_id).await
}

async fn reload_trashed(
    tx: &mut dyn StoreTransaction,
    id: &str,
) -> Result<Node, TreeServiceError> {
    tx.find_by_id(id, true)
        .await?
        .ok_or_else(|| TreeServiceError::node_not_found(id))
}
