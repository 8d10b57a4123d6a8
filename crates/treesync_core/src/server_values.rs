//! Resolution of server-assigned placeholder values.
//!
//! A written node may contain [`Leaf::ServerTimestamp`] placeholders. They
//! stay unresolved in optimistic local state and only take a concrete value
//! once the server supplies one, either as an explicit server time on the
//! acknowledgment or through the data it pushes.

use crate::node::{Leaf, Node};
use crate::operation::Operation;
use crate::path::Path;

/// Replaces every timestamp placeholder with `server_time` (milliseconds).
pub fn resolve_with_time(node: &Node, server_time: f64) -> Node {
    if let Some(leaf) = node.as_leaf() {
        if leaf.is_placeholder() {
            return Node::leaf(Leaf::Number(server_time)).with_priority(node.priority().clone());
        }
        return node.clone();
    }
    if !node.has_placeholders() {
        return node.clone();
    }
    node.map_children(|_, child| resolve_with_time(child, server_time))
}

/// Replaces placeholders with the concrete value `known` holds at the same location.
///
/// Placeholders without a concrete counterpart are kept.
pub fn resolve_against(node: &Node, known: &Node) -> Node {
    if let Some(leaf) = node.as_leaf() {
        if leaf.is_placeholder() {
            return match known.as_leaf() {
                Some(concrete) if !concrete.is_placeholder() => {
                    Node::leaf(concrete.clone()).with_priority(node.priority().clone())
                }
                _ => node.clone(),
            };
        }
        return node.clone();
    }
    if !node.has_placeholders() {
        return node.clone();
    }
    node.map_children(|key, child| resolve_against(child, &known.child(key)))
}

/// Applies [`resolve_with_time`] to every node an operation carries.
pub fn resolve_operation_with_time(operation: &Operation, server_time: f64) -> Operation {
    map_operation(operation, |_, node| resolve_with_time(node, server_time))
}

/// Applies [`resolve_against`] to an operation issued at `path`, looking up
/// concrete values in `known` (a root node).
pub fn resolve_operation_against(path: &Path, operation: &Operation, known: &Node) -> Operation {
    map_operation(operation, |relative, node| {
        resolve_against(node, &known.get(&path.join(relative)))
    })
}

fn map_operation(operation: &Operation, mut f: impl FnMut(&Path, &Node) -> Node) -> Operation {
    if !operation.has_placeholders() {
        return operation.clone();
    }
    match operation {
        Operation::Set(node) => Operation::Set(f(&Path::root(), node)),
        Operation::Merge(entries) => Operation::Merge(
            entries
                .iter()
                .map(|(relative, node)| (relative.clone(), f(relative, node)))
                .collect(),
        ),
        Operation::SetPriority(_) => operation.clone(),
    }
}
