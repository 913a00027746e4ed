//! Set Builder - Full Interval Rebuild
//!
//! Recomputes `left`, `right` and `depth` for whole scope partitions from
//! nothing but the parent pointers, via a pre-order depth-first traversal.
//! This is the repair tool for trees mutated behind the engine's back (raw
//! column writes, bulk imports): it runs even when the current intervals
//! are garbage, because it never reads them for anything except sibling
//! ordering.

use std::collections::{HashMap, HashSet};

use crate::db::{NodeChanges, NodeFilter, StoreTransaction};
use crate::models::{compare_json_values, Node, ScopeKey, TreeConfig};
use crate::services::error::TreeServiceError;
use crate::services::set_validator;

/// Rebuild the given scope partition, or every partition when `scope` is
/// `None`. Partitions that already validate are skipped unless `force` is
/// set.
pub(crate) async fn rebuild(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    scope: Option<&ScopeKey>,
    force: bool,
) -> Result<(), TreeServiceError> {
    let filter = match scope {
        Some(s) => NodeFilter::new().in_scope(s.clone()),
        None => NodeFilter::new(),
    };
    tx.lock_for_update(&filter).await?;
    let rows = tx.query(&filter).await?;

    let mut partitions: HashMap<String, Vec<Node>> = HashMap::new();
    for row in rows {
        partitions
            .entry(row.scope_signature(config))
            .or_default()
            .push(row);
    }

    for (signature, partition) in partitions {
        let refs: Vec<&Node> = partition.iter().collect();
        if !force && set_validator::check_partition(&refs) {
            tracing::debug!(scope = %signature, "partition already valid, skipping rebuild");
            continue;
        }
        rebuild_partition(tx, config, partition).await?;
    }
    Ok(())
}

/// Renumber one partition: pre-order DFS from the roots in sibling order,
/// `left` assigned on entry and `right` on exit of each node, counter
/// starting at 1.
async fn rebuild_partition(
    tx: &mut dyn StoreTransaction,
    config: &TreeConfig,
    partition: Vec<Node>,
) -> Result<(), TreeServiceError> {
    let present: HashSet<String> = partition.iter().map(|n| n.id.clone()).collect();

    let mut roots: Vec<Node> = Vec::new();
    let mut children_of: HashMap<String, Vec<Node>> = HashMap::new();
    let total = partition.len();
    for node in partition {
        match &node.parent_id {
            // A dangling parent pointer is repaired by treating the row as
            // a root rather than leaving it unreachable.
            Some(pid) if present.contains(pid) => {
                children_of.entry(pid.clone()).or_default().push(node)
            }
            _ => roots.push(node),
        }
    }
    sort_siblings(&mut roots, config);
    for siblings in children_of.values_mut() {
        sort_siblings(siblings, config);
    }

    enum Frame {
        Enter(Node, i64),
        Exit(String),
    }

    let mut stack: Vec<Frame> = roots.into_iter().rev().map(|n| Frame::Enter(n, 0)).collect();
    let mut visited: HashSet<String> = HashSet::new();
    let mut counter: i64 = 1;

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(node, depth) => {
                if !visited.insert(node.id.clone()) {
                    continue;
                }
                let left = counter;
                counter += 1;
                stack.push(Frame::Exit(node.id.clone()));

                if let Some(children) = children_of.remove(&node.id) {
                    // Defer Exit processing until after the children; the
                    // Exit frame sits below them on the stack.
                    for child in children.into_iter().rev() {
                        stack.push(Frame::Enter(child, depth + 1));
                    }
                }

                tx.update_where(
                    &NodeFilter::new().with_id(&node.id),
                    &NodeChanges::new().with_left(left).with_depth(depth),
                )
                .await?;
            }
            Frame::Exit(id) => {
                tx.update_where(
                    &NodeFilter::new().with_id(&id),
                    &NodeChanges::new().with_right(counter),
                )
                .await?;
                counter += 1;
            }
        }
    }

    if visited.len() < total {
        // Rows only reachable through a parent cycle keep their old values;
        // the rebuilder repairs intervals, not the parent graph.
        tracing::warn!(
            unreachable = total - visited.len(),
            "rebuild left rows untouched: parent chain never reaches a root"
        );
    }
    Ok(())
}

fn sort_siblings(siblings: &mut [Node], config: &TreeConfig) {
    siblings.sort_by(|a, b| {
        compare_json_values(&a.order_value(config), &b.order_value(config))
            .then_with(|| a.left.unwrap_or(i64::MAX).cmp(&b.left.unwrap_or(i64::MAX)))
            .then_with(|| a.id.cmp(&b.id))
    });
}

// Comprehensive tests in separate module
#[cfg(test)]
#[path = "set_builder_test.rs"]
mod set_builder_test;
