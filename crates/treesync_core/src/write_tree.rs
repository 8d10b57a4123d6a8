//! Ordered log of unacknowledged local writes.
//!
//! Every local mutation gets a monotonically increasing write id and stays
//! in the log until the server settles it. The effective value of any path
//! is the server cache overlaid with the visible writes, in write-id order.
//!
//! # Invariants
//!
//! - Entries are kept in write-id order.
//! - An acknowledged write leaves the log only once every earlier write is
//!   settled, so acks that arrive out of order still fold into the server
//!   cache in write-id order.
//! - A reverted write leaves the log immediately.

use crate::node::Node;
use crate::operation::Operation;
use crate::path::Path;
use crate::server_values::resolve_operation_with_time;
use std::collections::VecDeque;

/// Identifier establishing local write order.
pub type WriteId = u64;

/// Who issued a pending write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOrigin {
    /// A plain set, update, remove or priority change.
    User,
    /// The speculative result of a transaction.
    Transaction,
}

/// A local write the server has not settled yet.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    /// Write id.
    pub write_id: WriteId,
    /// Absolute path the operation was issued at.
    pub path: Path,
    /// The mutation.
    pub operation: Operation,
    /// Who issued it.
    pub origin: WriteOrigin,
    /// Whether it overlays the server cache in views.
    pub visible: bool,
    /// Whether the server acknowledged it.
    pub acked: bool,
}

impl PendingWrite {
    /// Returns true if this write changes the value at `path`.
    pub fn affects(&self, path: &Path) -> bool {
        match &self.operation {
            Operation::Merge(entries) if self.path.contains(path) => entries
                .keys()
                .any(|relative| self.path.join(relative).overlaps(path)),
            _ => self.path.overlaps(path),
        }
    }

    /// Returns true if this write fully determines the value at `path`.
    pub fn overwrites(&self, path: &Path) -> bool {
        match &self.operation {
            Operation::Set(_) => self.path.contains(path),
            Operation::Merge(entries) => entries
                .keys()
                .any(|relative| self.path.join(relative).contains(path)),
            Operation::SetPriority(_) => false,
        }
    }

    /// Applies this write to `base`, the value at `at`.
    pub fn apply_at(&self, at: &Path, base: Node) -> Node {
        if let Some(below) = at.relative_to(&self.path) {
            // The write is at `at` or above it.
            return match &self.operation {
                Operation::Set(node) => node.get(&below),
                Operation::Merge(entries) => {
                    let mut base = base;
                    for (relative, node) in entries {
                        let target = self.path.join(relative);
                        if let Some(inner) = at.relative_to(&target) {
                            base = node.get(&inner);
                        } else if let Some(outer) = target.relative_to(at) {
                            base = base.set_subtree(&outer, node.clone());
                        }
                    }
                    base
                }
                Operation::SetPriority(priority) if below.is_root() => {
                    base.with_priority(priority.clone())
                }
                Operation::SetPriority(_) => base,
            };
        }
        match self.path.relative_to(at) {
            Some(relative) => match &self.operation {
                Operation::Set(node) => base.set_subtree(&relative, node.clone()),
                Operation::Merge(entries) => base.merge(&relative, entries),
                Operation::SetPriority(priority) => {
                    let target = base.get(&relative).with_priority(priority.clone());
                    base.set_subtree(&relative, target)
                }
            },
            None => base,
        }
    }
}

/// The log of pending writes.
#[derive(Debug)]
pub struct WriteTree {
    entries: VecDeque<PendingWrite>,
    next_write_id: WriteId,
}

impl WriteTree {
    /// Creates an empty log; the first write id is 1.
    pub fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            next_write_id: 1,
        }
    }

    /// Appends a write and returns its id.
    pub fn add(
        &mut self,
        path: Path,
        operation: Operation,
        origin: WriteOrigin,
        visible: bool,
    ) -> WriteId {
        let write_id = self.next_write_id;
        self.next_write_id += 1;
        self.entries.push_back(PendingWrite {
            write_id,
            path,
            operation,
            origin,
            visible,
            acked: false,
        });
        write_id
    }

    /// Marks a write acknowledged and drains the settled prefix.
    ///
    /// With `server_time`, timestamp placeholders in the write are resolved
    /// first. Returns `None` if the id is unknown or already acknowledged;
    /// otherwise the drained writes in write-id order (possibly none, when an
    /// earlier write is still outstanding).
    pub fn ack(&mut self, write_id: WriteId, server_time: Option<f64>) -> Option<Vec<PendingWrite>> {
        let entry = self
            .entries
            .iter_mut()
            .find(|w| w.write_id == write_id && !w.acked)?;
        entry.acked = true;
        if let Some(time) = server_time {
            entry.operation = resolve_operation_with_time(&entry.operation, time);
        }
        Some(self.drain_settled())
    }

    /// Removes a write the server rejected.
    ///
    /// Acknowledged writes cannot be reverted; they return `None`.
    pub fn revert(&mut self, write_id: WriteId) -> Option<PendingWrite> {
        let index = self
            .entries
            .iter()
            .position(|w| w.write_id == write_id && !w.acked)?;
        self.entries.remove(index)
    }

    /// Pops acknowledged writes off the front of the log.
    pub fn drain_settled(&mut self) -> Vec<PendingWrite> {
        let mut drained = Vec::new();
        while self.entries.front().is_some_and(|w| w.acked) {
            if let Some(write) = self.entries.pop_front() {
                drained.push(write);
            }
        }
        drained
    }

    /// Returns the write with the given id.
    pub fn get(&self, write_id: WriteId) -> Option<&PendingWrite> {
        self.entries.iter().find(|w| w.write_id == write_id)
    }

    /// Returns writes at ancestors of, at, or below `path`, in write-id order.
    pub fn get_pending_for(&self, path: &Path) -> Vec<&PendingWrite> {
        self.entries.iter().filter(|w| w.affects(path)).collect()
    }

    /// Returns the writes the server has not acknowledged, in write-id order.
    pub fn unacked(&self) -> impl Iterator<Item = &PendingWrite> {
        self.entries.iter().filter(|w| !w.acked)
    }

    /// Folds every visible write matching `predicate` onto `base`, the
    /// server value at `path`.
    pub fn apply(
        &self,
        base: Node,
        path: &Path,
        mut predicate: impl FnMut(&PendingWrite) -> bool,
    ) -> Node {
        self.entries
            .iter()
            .filter(|w| w.visible && w.affects(path) && predicate(w))
            .fold(base, |acc, w| w.apply_at(path, acc))
    }

    /// Folds the visible writes issued before `write_id` onto `base`.
    pub fn apply_before(&self, base: Node, path: &Path, write_id: WriteId) -> Node {
        self.apply(base, path, |w| w.write_id < write_id)
    }

    /// Returns true if a visible write fully determines the value at `path`.
    pub fn shadows(&self, path: &Path) -> bool {
        self.entries
            .iter()
            .any(|w| w.visible && w.overwrites(path))
    }

    /// Returns the number of writes in the log.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the id the next write will get.
    pub fn next_write_id(&self) -> WriteId {
        self.next_write_id
    }
}

impl Default for WriteTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Priority;
    use crate::operation::MergeMap;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn set(tree: &mut WriteTree, p: &str, node: impl Into<Node>) -> WriteId {
        tree.add(path(p), Operation::Set(node.into()), WriteOrigin::User, true)
    }

    #[test]
    fn add_assigns_increasing_ids() {
        let mut tree = WriteTree::new();
        assert_eq!(set(&mut tree, "/a", 1), 1);
        assert_eq!(set(&mut tree, "/b", 2), 2);
        assert_eq!(tree.len(), 2);
        assert_eq!(tree.next_write_id(), 3);
    }

    #[test]
    fn out_of_order_acks_drain_in_order() {
        let mut tree = WriteTree::new();
        let first = set(&mut tree, "/a", 1);
        let second = set(&mut tree, "/a", 2);

        let drained = tree.ack(second, None).unwrap();
        assert!(drained.is_empty());
        assert_eq!(tree.unacked().count(), 1);

        let drained = tree.ack(first, None).unwrap();
        let ids: Vec<_> = drained.iter().map(|w| w.write_id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(tree.is_empty());
    }

    #[test]
    fn unknown_and_repeated_acks_are_none() {
        let mut tree = WriteTree::new();
        let id = set(&mut tree, "/a", 1);
        set(&mut tree, "/b", 1);
        assert!(tree.ack(99, None).is_none());
        assert!(tree.ack(id, None).is_some());
        assert!(tree.ack(id, None).is_none());
        assert!(tree.revert(id).is_none());
    }

    #[test]
    fn revert_removes_only_that_write() {
        let mut tree = WriteTree::new();
        let a = set(&mut tree, "/a", 1);
        let b = set(&mut tree, "/b", 2);
        let reverted = tree.revert(a).unwrap();
        assert_eq!(reverted.write_id, a);
        assert!(tree.get(b).is_some());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    fn apply_folds_ancestor_and_descendant_writes() {
        let mut tree = WriteTree::new();
        set(&mut tree, "/room", Node::from_json(&serde_json::json!({"a": 1, "b": 2})).unwrap());
        set(&mut tree, "/room/b", 5);
        tree.add(
            path("/room"),
            Operation::SetPriority(Priority::Number(1.0)),
            WriteOrigin::User,
            true,
        );

        let value = tree.apply(Node::empty(), &path("/room"), |_| true);
        assert_eq!(value.get(&path("a")), Node::from(1));
        assert_eq!(value.get(&path("b")), Node::from(5));
        assert_eq!(value.priority(), &Priority::Number(1.0));

        let child = tree.apply(Node::empty(), &path("/room/b"), |_| true);
        assert_eq!(child, Node::from(5));
    }

    #[test]
    fn apply_merge_at_ancestor_and_below() {
        let mut entries = MergeMap::new();
        entries.insert(path("x/y"), Node::from(1));
        entries.insert(path("z"), Node::from(2));
        let mut tree = WriteTree::new();
        tree.add(path("/m"), Operation::Merge(entries), WriteOrigin::User, true);

        let base = Node::empty().set_subtree(&path("keep"), Node::from(0));
        let value = tree.apply(base, &path("/m"), |_| true);
        assert_eq!(value.get(&path("x/y")), Node::from(1));
        assert_eq!(value.get(&path("keep")), Node::from(0));

        let inner = tree.apply(Node::from("old"), &path("/m/x/y"), |_| true);
        assert_eq!(inner, Node::from(1));

        let untouched = tree.apply(Node::from("old"), &path("/m/keep"), |_| true);
        assert_eq!(untouched, Node::from("old"));
        assert!(tree.get_pending_for(&path("/m/keep")).is_empty());
    }

    #[test]
    fn invisible_writes_are_skipped() {
        let mut tree = WriteTree::new();
        tree.add(path("/t"), Operation::Set(Node::from(1)), WriteOrigin::Transaction, false);
        assert!(tree.apply(Node::empty(), &path("/t"), |_| true).is_empty());
        assert!(!tree.shadows(&path("/t")));
    }

    #[test]
    fn shadows_by_overwrites_only() {
        let mut tree = WriteTree::new();
        set(&mut tree, "/a", 1);
        tree.add(
            path("/p"),
            Operation::SetPriority(Priority::Number(1.0)),
            WriteOrigin::User,
            true,
        );
        assert!(tree.shadows(&path("/a")));
        assert!(tree.shadows(&path("/a/deep")));
        assert!(!tree.shadows(&Path::root()));
        assert!(!tree.shadows(&path("/p")));
    }

    #[test]
    fn apply_before_ignores_later_writes() {
        let mut tree = WriteTree::new();
        set(&mut tree, "/c", 1);
        let second = set(&mut tree, "/c", 2);
        assert_eq!(
            tree.apply_before(Node::empty(), &path("/c"), second),
            Node::from(1)
        );
    }

    #[test]
    fn ack_with_server_time_resolves_placeholders() {
        let mut tree = WriteTree::new();
        let first = set(&mut tree, "/x", 0);
        let id = set(&mut tree, "/at", Node::server_timestamp());
        tree.ack(id, Some(12.0)).unwrap();
        assert_eq!(
            tree.get(id).map(|w| w.operation.clone()),
            Some(Operation::Set(Node::from(12.0)))
        );
        assert_eq!(tree.ack(first, None).map(|d| d.len()), Some(2));
    }
}
