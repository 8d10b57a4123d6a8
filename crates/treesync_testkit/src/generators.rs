//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random tree data that is always
//! valid: keys pass validation, numbers are finite, containers never hold
//! empty children.

use proptest::prelude::*;
use treesync_core::{ChildKey, MergeMap, Node, Operation, Path, Priority};

/// Strategy for generating valid child keys.
///
/// Mixes plain names with integer-like keys so integer collation is exercised.
pub fn child_key_strategy() -> impl Strategy<Value = ChildKey> {
    prop_oneof![
        prop::string::string_regex("[a-z][a-z0-9_]{0,7}").expect("Invalid regex"),
        (0u16..200).prop_map(|n| n.to_string()),
    ]
    .prop_map(|key| ChildKey::new(key).expect("generated key is valid"))
}

/// Strategy for generating paths of up to `max_depth` segments.
pub fn path_strategy(max_depth: usize) -> impl Strategy<Value = Path> {
    prop::collection::vec(child_key_strategy(), 0..=max_depth).prop_map(Path::from_keys)
}

/// Strategy for generating priorities.
pub fn priority_strategy() -> impl Strategy<Value = Priority> {
    prop_oneof![
        Just(Priority::None),
        (-1000i32..1000).prop_map(|n| Priority::Number(f64::from(n))),
        prop::string::string_regex("[a-z]{1,4}")
            .expect("Invalid regex")
            .prop_map(Priority::string),
    ]
}

/// Strategy for generating concrete leaves.
pub fn leaf_strategy() -> impl Strategy<Value = Node> {
    prop_oneof![
        any::<bool>().prop_map(Node::from),
        (-1_000_000i64..1_000_000).prop_map(Node::from),
        (-1000.0f64..1000.0).prop_map(Node::from),
        prop::string::string_regex("[ -~]{0,16}")
            .expect("Invalid regex")
            .prop_map(|s| Node::from(s.as_str())),
    ]
}

/// Strategy for generating nodes up to `depth` levels deep.
///
/// May produce the empty node.
pub fn node_strategy(depth: u32) -> impl Strategy<Value = Node> {
    let leaf = prop_oneof![Just(Node::empty()), leaf_strategy()];
    leaf.prop_recursive(depth, 64, 6, |inner| {
        prop::collection::vec((child_key_strategy(), inner), 0..6)
            .prop_map(Node::from_children)
    })
}

/// Strategy for generating nodes that carry priorities on their children.
pub fn prioritized_node_strategy() -> impl Strategy<Value = Node> {
    prop::collection::vec(
        (child_key_strategy(), leaf_strategy(), priority_strategy()),
        0..8,
    )
    .prop_map(|children| {
        Node::from_children(
            children
                .into_iter()
                .map(|(key, node, priority)| (key, node.with_priority(priority))),
        )
    })
}

/// Strategy for generating merge maps with non-overlapping entries.
pub fn merge_strategy() -> impl Strategy<Value = MergeMap> {
    prop::collection::btree_map(child_key_strategy(), node_strategy(2), 1..5).prop_map(
        |entries| {
            entries
                .into_iter()
                .map(|(key, node)| (Path::from_keys([key]), node))
                .collect()
        },
    )
}

/// Strategy for generating valid operations.
pub fn operation_strategy() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => node_strategy(2).prop_map(Operation::Set),
        2 => merge_strategy().prop_map(Operation::Merge),
        1 => priority_strategy().prop_map(Operation::SetPriority),
    ]
}

/// A local write at a path below a shared root.
#[derive(Debug, Clone)]
pub struct GeneratedWrite {
    /// Target path.
    pub path: Path,
    /// Operation to issue.
    pub operation: Operation,
}

/// Strategy for generating a batch of writes below `/root`.
///
/// Paths are shallow so writes overlap often.
pub fn write_batch_strategy(max_len: usize) -> impl Strategy<Value = Vec<GeneratedWrite>> {
    prop::collection::vec(
        (path_strategy(2), operation_strategy()).prop_map(|(relative, operation)| {
            GeneratedWrite {
                path: Path::parse("/root")
                    .expect("static path is valid")
                    .join(&relative),
                operation,
            }
        }),
        1..=max_len,
    )
}
