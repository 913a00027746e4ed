//! Set Mapper - Bulk Tree Import
//!
//! Maps an externally supplied nested tree description into the table:
//! find-or-create each entry by id, merge its attributes, re-parent it
//! through the move engine (so interval maintenance happens transparently),
//! recurse into its children, and finally prune every row in the target's
//! scope that the mapping pass never touched. The whole import runs inside
//! one transaction supplied by the caller; any failure rolls back the
//! entire mapped tree.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;

use crate::db::{NodeChanges, NodeFilter, StoreTransaction};
use crate::models::{Node, ScopeKey, TreeConfig, TreeEntry};
use crate::services::error::TreeServiceError;
use crate::services::move_engine::{self, MoveEvent, MovePosition, MovingCallback};

/// Map `entries` as the descendancy of `parent` (or as root-level trees
/// when `parent` is `None`), then prune untouched rows from the target's
/// scope. Collected move events are pushed onto `events` for broadcast
/// after the surrounding transaction commits.
pub(crate) async fn map_tree(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    parent: Option<&Node>,
    entries: &[TreeEntry],
    moving: MovingCallback<'_>,
    events: &mut Vec<MoveEvent>,
) -> Result<(), TreeServiceError> {
    let mut affected: Vec<String> = Vec::new();
    map_level(
        tx,
        config,
        entries,
        parent.map(|p| p.id.clone()),
        parent.map(|p| p.scope_key(config)),
        &mut affected,
        moving,
        events,
    )
    .await?;

    if affected.is_empty() {
        return Ok(());
    }

    // Prune-and-replace: everything in the target's scope that the mapping
    // pass did not touch is removed, subtrees included.
    let prune_filter = match parent {
        Some(p) => p.bounds().map(|(left, right)| {
            NodeFilter::new()
                .in_scope(p.scope_key(config))
                .left_gt(left)
                .right_lt(right)
        }),
        None => Some(NodeFilter::new().in_scope(config.null_scope())),
    };
    let Some(prune_filter) = prune_filter else {
        return Ok(());
    };

    let stale = tx.query(&prune_filter.without_ids(affected)).await?;
    if !stale.is_empty() {
        tracing::debug!(count = stale.len(), "pruning rows untouched by tree mapping");
    }
    for node in stale {
        // An earlier prune may have removed this row as part of a subtree.
        if tx.find_by_id(&node.id, false).await?.is_some() {
            move_engine::hard_delete_subtree(tx, config, &node.id).await?;
        }
    }
    Ok(())
}

/// Map one level of entries under `parent_key`, tail-recursing into each
/// entry's children. Scope columns absent from a new entry's attributes are
/// inherited from the mapping parent so the subtree lands in one partition.
#[allow(clippy::too_many_arguments)]
fn map_level<'a>(
    tx: &'a mut dyn StoreTransaction,
    config: &'a TreeConfig,
    entries: &'a [TreeEntry],
    parent_key: Option<String>,
    parent_scope: Option<ScopeKey>,
    affected: &'a mut Vec<String>,
    moving: &'a mut (dyn FnMut(&MoveEvent) -> bool + Send),
    events: &'a mut Vec<MoveEvent>,
) -> Pin<Box<dyn Future<Output = Result<(), TreeServiceError>> + Send + 'a>> {
    Box::pin(async move {
        for entry in entries {
            let existing = match &entry.id {
                Some(id) => tx.find_by_id(id, false).await?,
                None => None,
            };

            let node = match existing {
                Some(existing) => {
                    update_entry(tx, config, &existing, entry, &parent_key, moving, events)
                        .await?
                }
                None => {
                    create_entry(tx, config, entry, &parent_key, &parent_scope, moving, events)
                        .await?
                }
            };

            affected.push(node.id.clone());

            if !entry.children.is_empty() {
                let child_scope = node.scope_key(config);
                map_level(
                    tx,
                    config,
                    &entry.children,
                    Some(node.id.clone()),
                    Some(child_scope),
                    affected,
                    &mut *moving,
                    &mut *events,
                )
                .await?;
            }
        }
        Ok(())
    })
}

async fn update_entry(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    existing: &Node,
    entry: &TreeEntry,
    parent_key: &Option<String>,
    moving: MovingCallback<'_>,
    events: &mut Vec<MoveEvent>,
) -> Result<Node, TreeServiceError> {
    if !entry.attributes.is_empty() {
        tx.update_where(
            &NodeFilter::new().with_id(&existing.id),
            &NodeChanges::new().merge_properties(Value::Object(entry.attributes.clone())),
        )
        .await?;
    }
    let fresh = move_engine::reload(tx, &existing.id).await?;
    match parent_key {
        Some(pk) if fresh.parent_id.as_deref() != Some(pk.as_str()) => {
            let (moved, event) = move_engine::perform_move(
                tx,
                config,
                &fresh.id,
                MovePosition::Child,
                Some(pk),
                moving,
            )
            .await?;
            events.extend(event);
            Ok(moved)
        }
        // Top-level entries without a mapping parent keep their current
        // parent untouched.
        _ => Ok(fresh),
    }
}

async fn create_entry(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    entry: &TreeEntry,
    parent_key: &Option<String>,
    parent_scope: &Option<ScopeKey>,
    moving: MovingCallback<'_>,
    events: &mut Vec<MoveEvent>,
) -> Result<Node, TreeServiceError> {
    let mut attributes = entry.attributes.clone();
    if let Some(scope) = parent_scope {
        for (column, value) in scope {
            attributes.entry(column.clone()).or_insert_with(|| value.clone());
        }
    }

    let mut node = match &entry.id {
        Some(id) => Node::new_with_id(id.clone(), Value::Object(attributes)),
        None => Node::new(Value::Object(attributes)),
    };
    let scope = node.scope_key(config);
    let (left, right) = move_engine::allocate_bounds(tx, &scope).await?;
    node.left = Some(left);
    node.right = Some(right);
    let node = tx.insert(node).await?;

    match parent_key {
        Some(pk) => {
            let (moved, event) = move_engine::perform_move(
                tx,
                config,
                &node.id,
                MovePosition::Child,
                Some(pk),
                moving,
            )
            .await?;
            events.extend(event);
            Ok(moved)
        }
        None => Ok(node),
    }
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "set_mapper_test.rs"]
mod set_mapper_test;
