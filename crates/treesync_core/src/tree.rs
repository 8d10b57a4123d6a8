//! Server cache: the last known server state.

use crate::node::Node;
use crate::operation::{MergeMap, Operation};
use crate::path::Path;
use std::collections::BTreeSet;

/// The last known server value plus the paths whose full value is known.
///
/// Data outside the complete paths may be partial: it arrived through a
/// push below a path nobody listens to as a whole.
#[derive(Debug, Clone, Default)]
pub struct ValueTree {
    root: Node,
    complete: BTreeSet<Path>,
}

impl ValueTree {
    /// Creates an empty cache that knows nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the root node.
    pub fn root(&self) -> &Node {
        &self.root
    }

    /// Returns the cached server value at `path`.
    pub fn get(&self, path: &Path) -> Node {
        self.root.get(path)
    }

    /// Replaces the value at `path`; the path becomes complete.
    pub fn apply_overwrite(&mut self, path: &Path, node: Node) {
        self.root = self.root.set_subtree(path, node);
        self.mark_complete(path);
    }

    /// Applies a merge at `path`; every merged entry becomes complete.
    pub fn apply_merge(&mut self, path: &Path, merge: &MergeMap) {
        self.root = self.root.merge(path, merge);
        for relative in merge.keys() {
            self.mark_complete(&path.join(relative));
        }
    }

    /// Applies a settled local operation.
    pub fn apply_operation(&mut self, path: &Path, operation: &Operation) {
        match operation {
            Operation::Set(node) => self.apply_overwrite(path, node.clone()),
            Operation::Merge(merge) => self.apply_merge(path, merge),
            Operation::SetPriority(priority) => {
                let updated = self.root.get(path).with_priority(priority.clone());
                self.root = self.root.set_subtree(path, updated);
            }
        }
    }

    /// Records that the full server value at `path` is known.
    pub fn mark_complete(&mut self, path: &Path) {
        if self.is_complete(path) {
            return;
        }
        self.complete.retain(|known| !path.contains(known));
        self.complete.insert(path.clone());
    }

    /// Returns true if `path` or one of its ancestors is complete.
    pub fn is_complete(&self, path: &Path) -> bool {
        self.complete.iter().any(|known| known.contains(path))
    }

    /// Drops what is known at and below `path`, except for the subtrees at
    /// `keep`, which stay as they are.
    ///
    /// Used when nothing listens to `path` any more: its data stops being
    /// updated and must not be mistaken for the server value.
    pub fn forget(&mut self, path: &Path, keep: &[Path]) {
        let kept: Vec<&Path> = keep.iter().filter(|k| path.contains(k)).collect();
        let still_complete: Vec<Path> = kept
            .iter()
            .filter(|k| self.is_complete(k))
            .map(|k| (*k).clone())
            .collect();

        let mut retained = Node::empty();
        for at in &kept {
            if let Some(relative) = at.relative_to(path) {
                retained = retained.set_subtree(&relative, self.root.get(at));
            }
        }
        self.root = self.root.set_subtree(path, retained);
        self.complete.retain(|known| !path.contains(known));
        for at in still_complete {
            self.mark_complete(&at);
        }
    }

    /// Returns the number of recorded complete roots.
    pub fn complete_count(&self) -> usize {
        self.complete.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Priority;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn overwrite_marks_complete() {
        let mut tree = ValueTree::new();
        assert!(!tree.is_complete(&path("/a")));
        tree.apply_overwrite(&path("/a"), Node::from(1));
        assert!(tree.is_complete(&path("/a")));
        assert!(tree.is_complete(&path("/a/b")));
        assert!(!tree.is_complete(&Path::root()));
        assert_eq!(tree.get(&path("/a")), Node::from(1));
    }

    #[test]
    fn ancestor_completion_absorbs_descendants() {
        let mut tree = ValueTree::new();
        tree.mark_complete(&path("/a/b"));
        tree.mark_complete(&path("/a/c"));
        assert_eq!(tree.complete_count(), 2);
        tree.mark_complete(&path("/a"));
        assert_eq!(tree.complete_count(), 1);
        tree.mark_complete(&path("/a/d"));
        assert_eq!(tree.complete_count(), 1);
    }

    #[test]
    fn merge_marks_entries_complete() {
        let mut tree = ValueTree::new();
        let mut merge = MergeMap::new();
        merge.insert(path("x"), Node::from(1));
        merge.insert(path("y/z"), Node::from(2));
        tree.apply_merge(&path("/m"), &merge);
        assert!(tree.is_complete(&path("/m/x")));
        assert!(tree.is_complete(&path("/m/y/z")));
        assert!(!tree.is_complete(&path("/m")));
        assert_eq!(tree.get(&path("/m/y/z")), Node::from(2));
    }

    #[test]
    fn forget_drops_data_and_completeness() {
        let mut tree = ValueTree::new();
        tree.apply_overwrite(&path("/a"), Node::from(1));
        tree.apply_overwrite(&path("/b"), Node::from(2));
        tree.forget(&path("/a"), &[]);
        assert!(!tree.is_complete(&path("/a")));
        assert!(tree.get(&path("/a")).is_empty());
        assert!(tree.is_complete(&path("/b")));
        assert_eq!(tree.get(&path("/b")), Node::from(2));
    }

    #[test]
    fn forget_keeps_listened_descendants() {
        let mut tree = ValueTree::new();
        tree.apply_overwrite(
            &path("/room"),
            Node::empty()
                .set_subtree(&path("x/y"), Node::from(1))
                .set_subtree(&path("z"), Node::from(2)),
        );
        tree.forget(&path("/room"), &[path("/room/x"), path("/other")]);
        assert_eq!(tree.get(&path("/room/x/y")), Node::from(1));
        assert!(tree.get(&path("/room/z")).is_empty());
        assert!(tree.is_complete(&path("/room/x")));
        assert!(!tree.is_complete(&path("/room")));
        assert!(!tree.is_complete(&path("/room/z")));
    }

    #[test]
    fn priority_operation_keeps_value() {
        let mut tree = ValueTree::new();
        tree.apply_overwrite(&path("/p"), Node::from("v"));
        tree.apply_operation(&path("/p"), &Operation::SetPriority(Priority::Number(3.0)));
        assert_eq!(tree.get(&path("/p")).as_str(), Some("v"));
        assert_eq!(tree.get(&path("/p")).priority(), &Priority::Number(3.0));
    }
}
