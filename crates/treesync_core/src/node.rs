//! Immutable, structurally shared tree nodes.
//!
//! A [`Node`] is either empty, a leaf, or an ordered mapping of children.
//! Nodes never change once built: every mutation returns a new node that
//! shares all untouched subtrees with the original, so `set_subtree` costs
//! O(depth · log width) rather than O(size).
//!
//! # Invariants
//!
//! - A mapping with no children is the empty node. Removing the last child
//!   of a container collapses it, and the collapse propagates upwards.
//! - The empty node carries no priority.
//! - Siblings are ordered by (priority, key): numeric priorities first, then
//!   string priorities, then children without a priority; ties fall back to
//!   [`ChildKey`] collation.

use crate::operation::MergeMap;
use crate::path::{ChildKey, Path};
use im::OrdMap;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Sort priority attached to a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Priority {
    /// No priority.
    #[default]
    None,
    /// Numeric priority.
    Number(f64),
    /// String priority.
    String(Arc<str>),
}

impl Priority {
    /// Returns true if no priority is set.
    pub fn is_none(&self) -> bool {
        matches!(self, Priority::None)
    }

    /// Creates a string priority.
    pub fn string(value: impl AsRef<str>) -> Self {
        Priority::String(Arc::from(value.as_ref()))
    }

    fn rank(&self) -> u8 {
        match self {
            Priority::Number(_) => 0,
            Priority::String(_) => 1,
            Priority::None => 2,
        }
    }

    /// Compares two priorities: numbers, then strings, then none.
    pub fn sort_cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (Priority::Number(a), Priority::Number(b)) => a.total_cmp(b),
            (Priority::String(a), Priority::String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl From<f64> for Priority {
    fn from(n: f64) -> Self {
        Priority::Number(n)
    }
}

impl From<&str> for Priority {
    fn from(s: &str) -> Self {
        Priority::string(s)
    }
}

/// A leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Leaf {
    /// Boolean.
    Bool(bool),
    /// Number (JSON numbers are doubles).
    Number(f64),
    /// UTF-8 string.
    String(Arc<str>),
    /// Placeholder for a timestamp the server assigns when it applies the write.
    ServerTimestamp,
}

impl Leaf {
    /// Returns true for the server timestamp placeholder.
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Leaf::ServerTimestamp)
    }
}

#[derive(Debug, PartialEq)]
enum Repr {
    Empty,
    Leaf {
        value: Leaf,
        priority: Priority,
    },
    Children {
        children: OrdMap<ChildKey, Node>,
        priority: Priority,
    },
}

/// An immutable tree node.
#[derive(Clone)]
pub struct Node {
    repr: Arc<Repr>,
}

impl Node {
    /// Returns the empty node.
    pub fn empty() -> Self {
        Self {
            repr: Arc::new(Repr::Empty),
        }
    }

    /// Creates a leaf node without priority.
    pub fn leaf(value: Leaf) -> Self {
        Self {
            repr: Arc::new(Repr::Leaf {
                value,
                priority: Priority::None,
            }),
        }
    }

    /// Creates the server timestamp placeholder leaf.
    pub fn server_timestamp() -> Self {
        Self::leaf(Leaf::ServerTimestamp)
    }

    /// Builds a container from `(key, child)` pairs, dropping empty children.
    pub fn from_children(children: impl IntoIterator<Item = (ChildKey, Node)>) -> Self {
        let map: OrdMap<ChildKey, Node> = children
            .into_iter()
            .filter(|(_, child)| !child.is_empty())
            .collect();
        Self::container(map, Priority::None)
    }

    fn container(children: OrdMap<ChildKey, Node>, priority: Priority) -> Self {
        if children.is_empty() {
            return Self::empty();
        }
        Self {
            repr: Arc::new(Repr::Children { children, priority }),
        }
    }

    /// Returns true for the empty node.
    pub fn is_empty(&self) -> bool {
        matches!(*self.repr, Repr::Empty)
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        matches!(*self.repr, Repr::Leaf { .. })
    }

    /// Returns the leaf value, if this is a leaf.
    pub fn as_leaf(&self) -> Option<&Leaf> {
        match &*self.repr {
            Repr::Leaf { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Returns the number value, if this is a numeric leaf.
    pub fn as_f64(&self) -> Option<f64> {
        match self.as_leaf() {
            Some(Leaf::Number(n)) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string value, if this is a string leaf.
    pub fn as_str(&self) -> Option<&str> {
        match self.as_leaf() {
            Some(Leaf::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Returns the priority of this node.
    pub fn priority(&self) -> &Priority {
        static NONE: Priority = Priority::None;
        match &*self.repr {
            Repr::Empty => &NONE,
            Repr::Leaf { priority, .. } | Repr::Children { priority, .. } => priority,
        }
    }

    /// Returns a copy of this node with a different priority.
    ///
    /// The empty node ignores priorities.
    pub fn with_priority(&self, priority: Priority) -> Node {
        match &*self.repr {
            Repr::Empty => self.clone(),
            Repr::Leaf { value, .. } => Self {
                repr: Arc::new(Repr::Leaf {
                    value: value.clone(),
                    priority,
                }),
            },
            Repr::Children { children, .. } => Self::container(children.clone(), priority),
        }
    }

    /// Returns true if both handles point at the same allocation.
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.repr, &other.repr)
    }

    /// Returns the immediate child, or the empty node.
    pub fn child(&self, key: &ChildKey) -> Node {
        match &*self.repr {
            Repr::Children { children, .. } => children.get(key).cloned().unwrap_or_else(Node::empty),
            _ => Node::empty(),
        }
    }

    /// Returns the node at `path` relative to this node, or the empty node.
    pub fn get(&self, path: &Path) -> Node {
        let mut current = self.clone();
        for key in path.segments() {
            current = current.child(key);
            if current.is_empty() {
                break;
            }
        }
        current
    }

    /// Returns true if the immediate child exists.
    pub fn has_child(&self, key: &ChildKey) -> bool {
        match &*self.repr {
            Repr::Children { children, .. } => children.contains_key(key),
            _ => false,
        }
    }

    /// Returns the number of immediate children.
    pub fn child_count(&self) -> usize {
        match &*self.repr {
            Repr::Children { children, .. } => children.len(),
            _ => 0,
        }
    }

    /// Iterates over immediate children in key order.
    pub fn children(&self) -> impl Iterator<Item = (&ChildKey, &Node)> {
        let map = match &*self.repr {
            Repr::Children { children, .. } => Some(children),
            _ => None,
        };
        map.into_iter().flat_map(|m| m.iter())
    }

    /// Returns the immediate children in sibling order: (priority, key).
    pub fn sorted_children(&self) -> Vec<(ChildKey, Node)> {
        let mut children: Vec<(ChildKey, Node)> = self
            .children()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if children.iter().any(|(_, child)| !child.priority().is_none()) {
            children.sort_by(|a, b| compare_siblings(&a.0, &a.1, &b.0, &b.1));
        }
        children
    }

    /// Returns a copy with the immediate child replaced.
    ///
    /// Setting an empty child removes it; removing the last child yields the
    /// empty node.
    pub fn with_child(&self, key: &ChildKey, child: Node) -> Node {
        let (mut children, priority) = match &*self.repr {
            Repr::Children { children, priority } => (children.clone(), priority.clone()),
            Repr::Leaf { .. } if child.is_empty() => return self.clone(),
            Repr::Leaf { priority, .. } => (OrdMap::new(), priority.clone()),
            Repr::Empty => (OrdMap::new(), Priority::None),
        };
        if child.is_empty() {
            if children.remove(key).is_none() {
                return self.clone();
            }
        } else {
            children.insert(key.clone(), child);
        }
        Self::container(children, priority)
    }

    /// Returns a copy with the subtree at `path` replaced by `node`.
    pub fn set_subtree(&self, path: &Path, node: Node) -> Node {
        self.set_at(path.segments(), node)
    }

    fn set_at(&self, segments: &[ChildKey], node: Node) -> Node {
        match segments.split_first() {
            None => node,
            Some((front, rest)) => {
                let updated = self.child(front).set_at(rest, node);
                self.with_child(front, updated)
            }
        }
    }

    /// Applies every entry of `merge` below `path` as one update.
    pub fn merge(&self, path: &Path, merge: &MergeMap) -> Node {
        let mut target = self.get(path);
        for (relative, node) in merge {
            target = target.set_subtree(relative, node.clone());
        }
        self.set_subtree(path, target)
    }

    /// Returns true if this node or any descendant is a server timestamp placeholder.
    pub fn has_placeholders(&self) -> bool {
        match &*self.repr {
            Repr::Empty => false,
            Repr::Leaf { value, .. } => value.is_placeholder(),
            Repr::Children { children, .. } => children.values().any(Node::has_placeholders),
        }
    }

    /// Rebuilds this node with every child mapped through `f`.
    ///
    /// Children that come back pointer-equal are shared with the original.
    pub(crate) fn map_children(&self, mut f: impl FnMut(&ChildKey, &Node) -> Node) -> Node {
        let Repr::Children { children, priority } = &*self.repr else {
            return self.clone();
        };
        let mut updated = children.clone();
        let mut changed = false;
        for (key, child) in children.iter() {
            let mapped = f(key, child);
            if !mapped.ptr_eq(child) {
                changed = true;
                if mapped.is_empty() {
                    updated.remove(key);
                } else {
                    updated.insert(key.clone(), mapped);
                }
            }
        }
        if changed {
            Self::container(updated, priority.clone())
        } else {
            self.clone()
        }
    }
}

/// Orders two siblings by (priority, key).
pub fn compare_siblings(a_key: &ChildKey, a: &Node, b_key: &ChildKey, b: &Node) -> Ordering {
    a.priority()
        .sort_cmp(b.priority())
        .then_with(|| a_key.cmp(b_key))
}

impl PartialEq for Node {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other) || *self.repr == *other.repr
    }
}

impl Default for Node {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self.to_json())
    }
}

impl From<bool> for Node {
    fn from(b: bool) -> Self {
        Node::leaf(Leaf::Bool(b))
    }
}

impl From<f64> for Node {
    fn from(n: f64) -> Self {
        Node::leaf(Leaf::Number(n))
    }
}

impl From<i64> for Node {
    fn from(n: i64) -> Self {
        Node::leaf(Leaf::Number(n as f64))
    }
}

impl From<i32> for Node {
    fn from(n: i32) -> Self {
        Node::leaf(Leaf::Number(f64::from(n)))
    }
}

impl From<&str> for Node {
    fn from(s: &str) -> Self {
        Node::leaf(Leaf::String(Arc::from(s)))
    }
}

impl From<String> for Node {
    fn from(s: String) -> Self {
        Node::leaf(Leaf::String(Arc::from(s)))
    }
}

impl From<Leaf> for Node {
    fn from(leaf: Leaf) -> Self {
        Node::leaf(leaf)
    }
}
