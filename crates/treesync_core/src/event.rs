//! Events raised to listeners and the diff that produces them.
//!
//! A diff between an old and a new value of a view yields one ordered batch:
//!
//! 1. `child_removed` for each vanished child, in the old sort order
//! 2. `child_changed` for each child whose value or priority changed
//! 3. `child_moved` for each re-prioritized child whose previous sibling changed
//! 4. `child_added` for each new child
//! 5. one `value` event, if the value changed
//!
//! Steps 2 to 4 follow the new sort order. Added, changed and moved events
//! carry the key of the previous sibling in the new order.

use crate::node::Node;
use crate::path::{ChildKey, Path};
use std::collections::HashMap;

/// Kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// The whole value at the path.
    Value,
    /// A child appeared.
    ChildAdded,
    /// A child's value or priority changed.
    ChildChanged,
    /// A child vanished.
    ChildRemoved,
    /// A child changed position.
    ChildMoved,
    /// The server revoked the subscription.
    Cancel,
}

impl EventType {
    /// Returns the wire-style name of the event type.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Value => "value",
            EventType::ChildAdded => "child_added",
            EventType::ChildChanged => "child_changed",
            EventType::ChildRemoved => "child_removed",
            EventType::ChildMoved => "child_moved",
            EventType::Cancel => "cancel",
        }
    }
}

/// An event delivered to a listener.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// New value of the listened path.
    Value {
        /// Listened path.
        path: Path,
        /// Effective value.
        node: Node,
    },
    /// A child was added.
    ChildAdded {
        /// Listened path.
        path: Path,
        /// Child key.
        key: ChildKey,
        /// Child value.
        node: Node,
        /// Previous sibling in sort order.
        prev: Option<ChildKey>,
    },
    /// A child changed.
    ChildChanged {
        /// Listened path.
        path: Path,
        /// Child key.
        key: ChildKey,
        /// New child value.
        node: Node,
        /// Previous sibling in sort order.
        prev: Option<ChildKey>,
    },
    /// A child was removed.
    ChildRemoved {
        /// Listened path.
        path: Path,
        /// Child key.
        key: ChildKey,
        /// Last value of the child.
        node: Node,
    },
    /// A child moved.
    ChildMoved {
        /// Listened path.
        path: Path,
        /// Child key.
        key: ChildKey,
        /// Child value.
        node: Node,
        /// New previous sibling in sort order.
        prev: Option<ChildKey>,
    },
    /// The subscription was revoked.
    Cancel {
        /// Listened path.
        path: Path,
        /// Reason given by the server.
        reason: String,
    },
}

impl Event {
    /// Returns the kind of this event.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Value { .. } => EventType::Value,
            Event::ChildAdded { .. } => EventType::ChildAdded,
            Event::ChildChanged { .. } => EventType::ChildChanged,
            Event::ChildRemoved { .. } => EventType::ChildRemoved,
            Event::ChildMoved { .. } => EventType::ChildMoved,
            Event::Cancel { .. } => EventType::Cancel,
        }
    }

    /// Returns the listened path.
    pub fn path(&self) -> &Path {
        match self {
            Event::Value { path, .. }
            | Event::ChildAdded { path, .. }
            | Event::ChildChanged { path, .. }
            | Event::ChildRemoved { path, .. }
            | Event::ChildMoved { path, .. }
            | Event::Cancel { path, .. } => path,
        }
    }

    /// Returns the child key for child events.
    pub fn key(&self) -> Option<&ChildKey> {
        match self {
            Event::ChildAdded { key, .. }
            | Event::ChildChanged { key, .. }
            | Event::ChildRemoved { key, .. }
            | Event::ChildMoved { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Returns the node carried by the event.
    pub fn node(&self) -> Option<&Node> {
        match self {
            Event::Value { node, .. }
            | Event::ChildAdded { node, .. }
            | Event::ChildChanged { node, .. }
            | Event::ChildRemoved { node, .. }
            | Event::ChildMoved { node, .. } => Some(node),
            Event::Cancel { .. } => None,
        }
    }
}

/// Which kinds of events a diff should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventFilter {
    /// Produce the `value` event.
    pub value: bool,
    /// Produce child events.
    pub children: bool,
}

fn previous_keys(sorted: &[(ChildKey, Node)]) -> HashMap<ChildKey, Option<ChildKey>> {
    let mut prev = None;
    let mut out = HashMap::with_capacity(sorted.len());
    for (key, _) in sorted {
        out.insert(key.clone(), prev.replace(key.clone()));
    }
    out
}

/// Builds the batch a listener receives when its view first becomes complete.
pub fn initial_events(path: &Path, node: &Node, filter: EventFilter) -> Vec<Event> {
    let mut events = Vec::new();
    if filter.children {
        let mut prev: Option<ChildKey> = None;
        for (key, child) in node.sorted_children() {
            events.push(Event::ChildAdded {
                path: path.clone(),
                key: key.clone(),
                node: child,
                prev: prev.replace(key),
            });
        }
    }
    if filter.value {
        events.push(Event::Value {
            path: path.clone(),
            node: node.clone(),
        });
    }
    events
}

/// Diffs two values of the view at `path`.
pub fn diff(path: &Path, old: &Node, new: &Node, filter: EventFilter) -> Vec<Event> {
    if old == new {
        return Vec::new();
    }
    let mut events = Vec::new();
    if filter.children {
        let old_sorted = old.sorted_children();
        let new_sorted = new.sorted_children();
        let old_prev = previous_keys(&old_sorted);
        let new_prev = previous_keys(&new_sorted);

        for (key, child) in &old_sorted {
            if !new.has_child(key) {
                events.push(Event::ChildRemoved {
                    path: path.clone(),
                    key: key.clone(),
                    node: child.clone(),
                });
            }
        }

        let mut moved = Vec::new();
        let mut added = Vec::new();
        for (key, child) in &new_sorted {
            let prev = new_prev.get(key).cloned().flatten();
            match old_prev.get(key) {
                None => added.push(Event::ChildAdded {
                    path: path.clone(),
                    key: key.clone(),
                    node: child.clone(),
                    prev,
                }),
                Some(was_prev) => {
                    let before = old.child(key);
                    if before == *child {
                        continue;
                    }
                    events.push(Event::ChildChanged {
                        path: path.clone(),
                        key: key.clone(),
                        node: child.clone(),
                        prev: prev.clone(),
                    });
                    if before.priority() != child.priority() && *was_prev != prev {
                        moved.push(Event::ChildMoved {
                            path: path.clone(),
                            key: key.clone(),
                            node: child.clone(),
                            prev,
                        });
                    }
                }
            }
        }
        events.extend(moved);
        events.extend(added);
    }
    if filter.value {
        events.push(Event::Value {
            path: path.clone(),
            node: new.clone(),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Priority;
    use serde_json::json;

    const ALL: EventFilter = EventFilter {
        value: true,
        children: true,
    };

    fn node(value: serde_json::Value) -> Node {
        Node::from_json(&value).unwrap()
    }

    fn key(s: &str) -> ChildKey {
        ChildKey::new(s).unwrap()
    }

    fn summary(events: &[Event]) -> Vec<String> {
        events
            .iter()
            .map(|e| match e.key() {
                Some(k) => format!("{}:{}", e.event_type().as_str(), k),
                None => e.event_type().as_str().to_string(),
            })
            .collect()
    }

    #[test]
    fn diff_emits_removed_changed_added_then_value() {
        let path = Path::parse("/room").unwrap();
        let old = node(json!({"a": 1, "b": 2, "c": 3}));
        let new = node(json!({"a": 1, "b": 5, "d": 9}));
        let events = diff(&path, &old, &new, ALL);
        assert_eq!(
            summary(&events),
            vec!["child_removed:c", "child_changed:b", "child_added:d", "value"]
        );
        assert_eq!(events[1].node(), Some(&Node::from(5)));
        assert_eq!(
            events[2],
            Event::ChildAdded {
                path: path.clone(),
                key: key("d"),
                node: Node::from(9),
                prev: Some(key("b")),
            }
        );
    }

    #[test]
    fn equal_values_produce_nothing() {
        let value = node(json!({"a": 1}));
        assert!(diff(&Path::root(), &value, &value.clone(), ALL).is_empty());
    }

    #[test]
    fn priority_change_is_changed_plus_moved() {
        let old = node(json!({"a": 1, "b": 2, "c": 3}));
        let new = old.with_child(&key("c"), Node::from(3).with_priority(Priority::string("z")));
        let events = diff(&Path::root(), &old, &new, ALL);
        assert_eq!(
            summary(&events),
            vec!["child_changed:c", "child_moved:c", "value"]
        );
        // Priorities sort before unprioritized children.
        assert!(matches!(&events[1], Event::ChildMoved { prev: None, .. }));
    }

    #[test]
    fn priority_change_without_reordering_is_not_a_move() {
        let old = node(json!({"a": {".value": 1, ".priority": 1}, "b": 2}));
        let new = old.with_child(&key("a"), Node::from(1).with_priority(Priority::Number(2.0)));
        let events = diff(&Path::root(), &old, &new, ALL);
        assert_eq!(summary(&events), vec!["child_changed:a", "value"]);
    }

    #[test]
    fn placeholder_resolution_is_a_change() {
        let old = node(json!({"at": {".sv": "timestamp"}}));
        let new = node(json!({"at": 1234}));
        let events = diff(&Path::root(), &old, &new, EventFilter { value: false, children: true });
        assert_eq!(summary(&events), vec!["child_changed:at"]);
    }

    #[test]
    fn value_only_filter() {
        let old = node(json!({"a": 1}));
        let new = node(json!({"a": 2}));
        let events = diff(&Path::root(), &old, &new, EventFilter { value: true, children: false });
        assert_eq!(summary(&events), vec!["value"]);
    }

    #[test]
    fn initial_batch_adds_children_in_sort_order() {
        let value = node(json!({"10": "x", "9": "y", "b": "z"}));
        let events = initial_events(&Path::root(), &value, ALL);
        assert_eq!(
            summary(&events),
            vec!["child_added:9", "child_added:10", "child_added:b", "value"]
        );
    }
}
