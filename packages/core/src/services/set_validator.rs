//! Set Validator - Structural Invariant Checks
//!
//! Asserts the nested-set invariants over a loaded partition: non-null
//! bounds, `left < right`, intervals that are either disjoint or strictly
//! nested, and mutually disjoint roots. Holes in the numbering are fine
//! since only the relative ordering matters, not contiguity: a validator
//! pass says the tree answers queries correctly, not that it is compact.

use std::collections::HashMap;

use crate::models::{Node, TreeConfig};

/// Validate every scope partition among the given live rows.
pub(crate) fn check(nodes: &[Node], config: &TreeConfig) -> bool {
    let mut partitions: HashMap<String, Vec<&Node>> = HashMap::new();
    for node in nodes {
        partitions
            .entry(node.scope_signature(config))
            .or_default()
            .push(node);
    }
    partitions.values().all(|part| check_partition(part))
}

/// Validate one scope partition.
///
/// Intervals are swept in `(left asc, right desc)` order while a stack
/// tracks the chain of currently-open enclosing intervals; each interval
/// must be strictly nested in the top of the stack or start past every
/// interval already closed. Equal endpoints, duplicate bounds and partial
/// overlaps all fail the strictness checks.
pub(crate) fn check_partition(nodes: &[&Node]) -> bool {
    let mut intervals = Vec::with_capacity(nodes.len());
    for node in nodes {
        let Some((left, right)) = node.bounds() else {
            return false;
        };
        if left >= right {
            return false;
        }
        intervals.push((left, right));
    }
    intervals.sort_by_key(|&(l, r)| (l, -r));

    let mut open: Vec<(i64, i64)> = Vec::new();
    for (left, right) in intervals {
        while matches!(open.last(), Some(&(_, r)) if r < left) {
            open.pop();
        }
        if let Some(&(encl_left, encl_right)) = open.last() {
            if !(encl_left < left && right < encl_right) {
                return false;
            }
        }
        open.push((left, right));
    }
    true
}
