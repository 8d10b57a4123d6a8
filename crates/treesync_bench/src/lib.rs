//! Benchmark utilities.

use treesync_core::{ChildKey, Node, Path};

/// Returns the key for index `i`.
pub fn key(i: usize) -> ChildKey {
    ChildKey::new(format!("k{i}")).expect("generated key is valid")
}

/// Builds a container with `width` numeric leaves.
pub fn wide_node(width: usize) -> Node {
    Node::from_children((0..width).map(|i| (key(i), Node::from(i as f64))))
}

/// Builds a tree `depth` levels deep with `width` children per container.
pub fn nested_node(depth: usize, width: usize) -> Node {
    if depth == 0 {
        return Node::from("leaf");
    }
    Node::from_children((0..width).map(|i| (key(i), nested_node(depth - 1, width))))
}

/// Returns a path of `depth` segments.
pub fn deep_path(depth: usize) -> Path {
    Path::from_keys((0..depth).map(key))
}
