//! Local write operations.

use crate::error::{CoreError, CoreResult};
use crate::node::{Node, Priority};
use crate::path::Path;
use std::collections::BTreeMap;

/// Relative path → replacement node, applied as one logical update.
pub type MergeMap = BTreeMap<Path, Node>;

/// A mutation issued against a path.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Replace the subtree (an empty node removes it).
    Set(Node),
    /// Replace several descendants at once.
    Merge(MergeMap),
    /// Change only the priority of the node at the path.
    SetPriority(Priority),
}

impl Operation {
    /// A removal is a set to the empty node.
    pub fn remove() -> Self {
        Operation::Set(Node::empty())
    }

    /// Builds a merge, rejecting empty maps and entries that contain each other.
    pub fn merge(entries: MergeMap) -> CoreResult<Self> {
        validate_merge_paths(&Path::root(), &entries)?;
        Ok(Operation::Merge(entries))
    }

    /// Applies this operation to `base`, where `base` is the value at `target`
    /// and the operation was issued at `target` too.
    pub fn apply(&self, base: &Node) -> Node {
        match self {
            Operation::Set(node) => node.clone(),
            Operation::Merge(entries) => base.merge(&Path::root(), entries),
            Operation::SetPriority(priority) => base.with_priority(priority.clone()),
        }
    }

    /// Returns true if this operation replaces the whole subtree at its path.
    pub fn is_overwrite(&self) -> bool {
        matches!(self, Operation::Set(_))
    }

    /// Returns true if any node carried by this operation holds a placeholder.
    pub fn has_placeholders(&self) -> bool {
        match self {
            Operation::Set(node) => node.has_placeholders(),
            Operation::Merge(entries) => entries.values().any(Node::has_placeholders),
            Operation::SetPriority(_) => false,
        }
    }
}

/// Rejects a merge that is empty or where one entry's path contains another's.
pub fn validate_merge_paths(at: &Path, entries: &MergeMap) -> CoreResult<()> {
    if entries.is_empty() {
        return Err(CoreError::invalid_merge(at.to_string(), "merge has no entries"));
    }
    let paths: Vec<&Path> = entries.keys().collect();
    for window in paths.windows(2) {
        // Sorted order puts an ancestor directly before its first descendant.
        if window[0].contains(window[1]) {
            return Err(CoreError::invalid_merge(
                at.to_string(),
                format!("{} overlaps {}", window[0], window[1]),
            ));
        }
    }
    if paths.iter().any(|p| p.is_root()) {
        return Err(CoreError::invalid_merge(
            at.to_string(),
            "merge entry must name a child",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    #[test]
    fn merge_rejects_overlapping_paths() {
        let mut entries = MergeMap::new();
        entries.insert(path("a"), Node::from(1));
        entries.insert(path("a/b"), Node::from(2));
        assert!(matches!(
            Operation::merge(entries),
            Err(CoreError::InvalidMerge { .. })
        ));
    }

    #[test]
    fn merge_rejects_empty() {
        assert!(Operation::merge(MergeMap::new()).is_err());
    }

    #[test]
    fn apply_variants() {
        let base = Node::empty().set_subtree(&path("x"), Node::from(1));

        assert_eq!(Operation::Set(Node::from(7)).apply(&base), Node::from(7));
        assert!(Operation::remove().apply(&base).is_empty());

        let mut entries = MergeMap::new();
        entries.insert(path("y"), Node::from(2));
        let merged = Operation::merge(entries).unwrap().apply(&base);
        assert_eq!(merged.get(&path("x")), Node::from(1));
        assert_eq!(merged.get(&path("y")), Node::from(2));

        let prioritized = Operation::SetPriority(Priority::Number(4.0)).apply(&base);
        assert_eq!(prioritized.priority(), &Priority::Number(4.0));
    }
}
