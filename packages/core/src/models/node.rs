//! Node Data Structures
//!
//! This module defines the core `Node` struct for Canopy's nested-set tree
//! engine, plus the supporting types consumed by the service layer:
//!
//! - **Interval encoding**: every node carries a `(left, right)` pair; a
//!   node's interval contains the intervals of all of its descendants, so
//!   subtree and ancestor queries are single range scans
//! - **Pure JSON attributes**: all caller-defined data (including scope and
//!   order columns) lives in the `properties` field
//! - **Scoped forests**: equality-constrained columns partition one table
//!   into independent trees
//!
//! # Examples
//!
//! ```rust
//! use canopy_core::models::{Node, TreeConfig};
//! use serde_json::json;
//!
//! let node = Node::new(json!({"name": "Chapter 1", "book_id": 7}));
//! assert!(node.parent_id.is_none());
//! assert!(node.bounds().is_none()); // interval assigned on create
//!
//! let config = TreeConfig::new().with_scope_columns(vec!["book_id".to_string()]);
//! let key = node.scope_key(&config);
//! assert_eq!(key["book_id"], json!(7));
//! ```

use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Equality-constrained partition key separating otherwise-independent trees
/// stored in one table. Maps scope column name to the node's value for it
/// (a missing column reads as JSON null).
pub type ScopeKey = BTreeMap<String, Value>;

/// Static column bindings for one tree type, resolved at service
/// construction rather than through runtime attribute lookup.
///
/// `parent_id`, `left`, `right` and `depth` are fixed struct fields on
/// [`Node`]; the configurable bindings are the sibling order column and the
/// scope columns, both of which name keys inside `Node::properties`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeConfig {
    /// Column used to order siblings. `None` means siblings order by their
    /// own `left` value, i.e. by tree position.
    pub order_column: Option<String>,

    /// Columns whose values must match between two nodes for them to belong
    /// to the same tree partition. Empty means one global tree.
    pub scope_columns: Vec<String>,
}

impl TreeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_order_column(mut self, column: impl Into<String>) -> Self {
        self.order_column = Some(column.into());
        self
    }

    pub fn with_scope_columns(mut self, columns: Vec<String>) -> Self {
        self.scope_columns = columns;
        self
    }

    /// Returns whether nodes of this tree type are partitioned by scope.
    pub fn is_scoped(&self) -> bool {
        !self.scope_columns.is_empty()
    }

    /// The all-null scope key, matching rows that carry no scope values.
    pub fn null_scope(&self) -> ScopeKey {
        self.scope_columns
            .iter()
            .map(|c| (c.clone(), Value::Null))
            .collect()
    }
}

/// One row of the tree table.
///
/// # Fields
///
/// - `id`: opaque primary key (UUID string by default; callers may supply
///   their own, only equality is assumed)
/// - `parent_id`: `None` means root
/// - `left` / `right`: the nested-set interval; `None` until assigned by the
///   allocator (raw-inserted rows stay unassigned until `rebuild`)
/// - `depth`: number of ancestors, root = 0
/// - `properties`: JSON object carrying all caller-defined attributes,
///   including scope and order columns
/// - `deleted_at`: soft-delete marker; trashed rows keep their stale interval
///   until restored or purged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier
    pub id: String,

    /// Parent node ID (`None` = root)
    pub parent_id: Option<String>,

    /// Left interval bound
    pub left: Option<i64>,

    /// Right interval bound
    pub right: Option<i64>,

    /// Number of ancestors (root = 0)
    #[serde(default)]
    pub depth: i64,

    /// Caller-defined attributes as JSON (scope and order columns included)
    pub properties: Value,

    /// Soft-delete marker
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last modification timestamp
    pub modified_at: DateTime<Utc>,
}

impl Node {
    /// Create a new node with an auto-generated UUID.
    pub fn new(properties: Value) -> Self {
        Self::new_with_id(Uuid::new_v4().to_string(), properties)
    }

    /// Create a new node with a caller-supplied id.
    pub fn new_with_id(id: String, properties: Value) -> Self {
        let now = Utc::now();
        Self {
            id,
            parent_id: None,
            left: None,
            right: None,
            depth: 0,
            properties,
            deleted_at: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// The node's interval, or `None` if it has not been positioned yet.
    pub fn bounds(&self) -> Option<(i64, i64)> {
        match (self.left, self.right) {
            (Some(l), Some(r)) => Some((l, r)),
            _ => None,
        }
    }

    /// Returns true once the node has an assigned interval.
    pub fn is_positioned(&self) -> bool {
        self.bounds().is_some()
    }

    /// Returns true if the row is soft-deleted.
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Returns true if this is a root node.
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Returns true if this is a leaf node (end of a branch).
    pub fn is_leaf(&self) -> bool {
        matches!(self.bounds(), Some((l, r)) if r - l == 1)
    }

    /// Returns true if this is a trunk node (not root, not leaf).
    pub fn is_trunk(&self) -> bool {
        !self.is_root() && !self.is_leaf()
    }

    /// Returns true if this is a child node.
    pub fn is_child(&self) -> bool {
        !self.is_root()
    }

    /// Read one property by key; missing keys read as JSON null.
    pub fn property(&self, key: &str) -> &Value {
        self.properties.get(key).unwrap_or(&Value::Null)
    }

    /// The node's scope key under the given configuration.
    pub fn scope_key(&self, config: &TreeConfig) -> ScopeKey {
        config
            .scope_columns
            .iter()
            .map(|c| (c.clone(), self.property(c).clone()))
            .collect()
    }

    /// Canonical string form of the scope key, used to group partitions.
    pub fn scope_signature(&self, config: &TreeConfig) -> String {
        serde_json::to_string(&self.scope_key(config)).unwrap_or_default()
    }

    /// Strict scope equality: every configured scope column must carry equal
    /// values on both nodes (null vs non-null is a mismatch). No scope
    /// columns configured means all nodes share one scope.
    pub fn in_same_scope(&self, other: &Node, config: &TreeConfig) -> bool {
        config
            .scope_columns
            .iter()
            .all(|c| self.property(c) == other.property(c))
    }

    /// The node's sibling-order value: the configured order column, or the
    /// node's own `left` when none is configured.
    pub fn order_value(&self, config: &TreeConfig) -> Value {
        match &config.order_column {
            Some(column) => self.property(column).clone(),
            None => self.left.map(Value::from).unwrap_or(Value::Null),
        }
    }

    /// Returns true if this node lies strictly inside `other`'s subtree.
    pub fn is_descendant_of(&self, other: &Node, config: &TreeConfig) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((l, _)), Some((ol, or))) => l > ol && l < or && self.in_same_scope(other, config),
            _ => false,
        }
    }

    /// Returns true if this node is `other` or lies inside its subtree.
    pub fn is_self_or_descendant_of(&self, other: &Node, config: &TreeConfig) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((l, _)), Some((ol, or))) => l >= ol && l < or && self.in_same_scope(other, config),
            _ => false,
        }
    }

    /// Returns true if `other` lies strictly inside this node's subtree.
    pub fn is_ancestor_of(&self, other: &Node, config: &TreeConfig) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((l, r)), Some((ol, _))) => l < ol && r > ol && self.in_same_scope(other, config),
            _ => false,
        }
    }

    /// Returns true if this node is `other` or `other` lies inside its subtree.
    pub fn is_self_or_ancestor_of(&self, other: &Node, config: &TreeConfig) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((l, r)), Some((ol, _))) => l <= ol && r > ol && self.in_same_scope(other, config),
            _ => false,
        }
    }

    /// Whether this node's interval falls within the interval of `other`
    /// (inclusive on both ends, so a node is inside its own subtree).
    pub fn inside_subtree(&self, other: &Node) -> bool {
        match (self.bounds(), other.bounds()) {
            (Some((l, r)), Some((ol, or))) => l >= ol && l <= or && r >= ol && r <= or,
            _ => false,
        }
    }
}

/// Total order over JSON values used for sibling ordering when a custom
/// order column is configured: null < booleans < numbers < strings < the
/// rest (arrays/objects compare by their serialized form).
pub fn compare_json_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(f64::NAN), y.as_f64().unwrap_or(f64::NAN));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ if rank(a) != rank(b) => rank(a).cmp(&rank(b)),
        _ => a.to_string().cmp(&b.to_string()),
    }
}

/// A node with its children nested beneath it, the shape produced by
/// hierarchical export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeTree {
    pub node: Node,
    pub children: Vec<NodeTree>,
}

/// One entry of an externally supplied tree description, consumed by the
/// tree mapper. Attributes other than `id` and `children` are flattened
/// into the node's `properties`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    /// Existing row to update; `None` creates a fresh node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Attribute values written into `properties`.
    #[serde(flatten)]
    pub attributes: serde_json::Map<String, Value>,

    /// Nested children, mapped beneath this entry.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<TreeEntry>,
}
