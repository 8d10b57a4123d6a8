//! Sync views: cached effective values of subscribed queries.
//!
//! The effective value of a path is the server cache at that path with
//! every visible pending write folded on top, in write-id order. Views
//! cache it per subscribed query so event generation can diff old against
//! new. The cache is an optimization only; [`compute`] is the source of truth.
//!
//! Unfiltered queries read the shared server cache. A filtered query reads
//! only the data the server sent for that query, since the server alone
//! knows which children the filter selects, and is complete only once its
//! own listen completed.

use crate::listener::QuerySpec;
use crate::node::Node;
use crate::operation::MergeMap;
use crate::path::Path;
use crate::tree::ValueTree;
use crate::write_tree::WriteTree;
use std::collections::BTreeMap;
use tracing::trace;

/// Computes the effective value at `path`.
pub fn compute(server: &ValueTree, writes: &WriteTree, path: &Path) -> Node {
    writes.apply(server.get(path), path, |_| true)
}

/// Returns true if the effective value at `path` is fully known.
pub fn is_complete(server: &ValueTree, writes: &WriteTree, path: &Path) -> bool {
    server.is_complete(path) || writes.shadows(path)
}

/// Cached effective value of one subscribed query.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheNode {
    /// The effective value.
    pub value: Node,
    /// Whether the value is fully known.
    pub complete: bool,
}

/// Server data sent for a filtered query.
#[derive(Debug, Clone, Default)]
struct QueryData {
    server: Node,
    complete: bool,
}

#[derive(Debug)]
struct View {
    /// `None` for unfiltered queries.
    data: Option<QueryData>,
    cached: CacheNode,
}

impl View {
    fn build(&self, server: &ValueTree, writes: &WriteTree, path: &Path) -> CacheNode {
        match &self.data {
            None => CacheNode {
                value: compute(server, writes, path),
                complete: is_complete(server, writes, path),
            },
            Some(data) => CacheNode {
                value: writes.apply(data.server.clone(), path, |_| true),
                complete: data.complete,
            },
        }
    }
}

/// The set of cached views, keyed by query.
#[derive(Debug, Default)]
pub struct SyncViews {
    views: BTreeMap<QuerySpec, View>,
}

impl SyncViews {
    /// Creates an empty set of views.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the view of `query`, computing it cold if it is not cached.
    pub fn ensure(&mut self, server: &ValueTree, writes: &WriteTree, query: &QuerySpec) -> &CacheNode {
        let view = self.views.entry(query.clone()).or_insert_with(|| {
            trace!(query = %query, "cold compute");
            let mut view = View {
                data: (!query.filter.is_default()).then(QueryData::default),
                cached: CacheNode {
                    value: Node::empty(),
                    complete: false,
                },
            };
            view.cached = view.build(server, writes, &query.path);
            view
        });
        &view.cached
    }

    /// Returns the cached view of `query`.
    pub fn get(&self, query: &QuerySpec) -> Option<&CacheNode> {
        self.views.get(query).map(|v| &v.cached)
    }

    /// Drops the view of `query`, with any data sent for it.
    pub fn remove(&mut self, query: &QuerySpec) -> Option<CacheNode> {
        self.views.remove(query).map(|v| v.cached)
    }

    /// Replaces the server data of a filtered query; the query becomes complete.
    ///
    /// Returns false if no filtered view of `query` exists.
    pub fn apply_query_overwrite(&mut self, query: &QuerySpec, node: Node) -> bool {
        match self.views.get_mut(query).and_then(|v| v.data.as_mut()) {
            Some(data) => {
                data.server = node;
                data.complete = true;
                true
            }
            None => false,
        }
    }

    /// Merges into the server data of a filtered query.
    ///
    /// Returns false if no filtered view of `query` exists.
    pub fn apply_query_merge(&mut self, query: &QuerySpec, merge: &MergeMap) -> bool {
        match self.views.get_mut(query).and_then(|v| v.data.as_mut()) {
            Some(data) => {
                data.server = data.server.merge(&Path::root(), merge);
                true
            }
            None => false,
        }
    }

    /// Records that the server sent everything for a filtered query.
    ///
    /// Returns false if no filtered view of `query` exists.
    pub fn mark_query_complete(&mut self, query: &QuerySpec) -> bool {
        match self.views.get_mut(query).and_then(|v| v.data.as_mut()) {
            Some(data) => {
                data.complete = true;
                true
            }
            None => false,
        }
    }

    /// Recomputes every view whose path overlaps `changed`.
    ///
    /// Returns the queries whose value or completeness changed.
    pub fn refresh(&mut self, server: &ValueTree, writes: &WriteTree, changed: &Path) -> Vec<QuerySpec> {
        let mut updated = Vec::new();
        for (query, view) in self.views.iter_mut() {
            if !query.path.overlaps(changed) {
                continue;
            }
            let fresh = view.build(server, writes, &query.path);
            if fresh != view.cached {
                trace!(query = %query, complete = fresh.complete, "view changed");
                view.cached = fresh;
                updated.push(query.clone());
            }
        }
        updated
    }

    /// Recomputes every view.
    pub fn refresh_all(&mut self, server: &ValueTree, writes: &WriteTree) -> Vec<QuerySpec> {
        self.refresh(server, writes, &Path::root())
    }

    /// Returns the cached queries.
    pub fn queries(&self) -> impl Iterator<Item = &QuerySpec> {
        self.views.keys()
    }

    /// Returns the number of cached views.
    pub fn len(&self) -> usize {
        self.views.len()
    }

    /// Returns true if no view is cached.
    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::QueryFilter;
    use crate::operation::Operation;
    use crate::write_tree::WriteOrigin;

    fn path(s: &str) -> Path {
        Path::parse(s).unwrap()
    }

    fn plain(s: &str) -> QuerySpec {
        QuerySpec::default_at(path(s))
    }

    fn limited(s: &str) -> QuerySpec {
        QuerySpec::new(path(s), QueryFilter::new("limitToLast=1"))
    }

    #[test]
    fn compute_overlays_writes_on_server_value() {
        let mut server = ValueTree::new();
        server.apply_overwrite(&path("/doc"), Node::from_json(&serde_json::json!({"a": 1})).unwrap());
        let mut writes = WriteTree::new();
        writes.add(path("/doc/b"), Operation::Set(Node::from(2)), WriteOrigin::User, true);

        let value = compute(&server, &writes, &path("/doc"));
        assert_eq!(value.get(&path("a")), Node::from(1));
        assert_eq!(value.get(&path("b")), Node::from(2));
        assert!(is_complete(&server, &writes, &path("/doc")));
    }

    #[test]
    fn pending_overwrite_makes_view_complete() {
        let server = ValueTree::new();
        let mut writes = WriteTree::new();
        assert!(!is_complete(&server, &writes, &path("/x")));
        writes.add(path("/x"), Operation::Set(Node::from(1)), WriteOrigin::User, true);
        assert!(is_complete(&server, &writes, &path("/x")));
    }

    #[test]
    fn refresh_reports_only_changed_overlapping_views() {
        let mut server = ValueTree::new();
        let writes = WriteTree::new();
        let mut views = SyncViews::new();
        views.ensure(&server, &writes, &plain("/a"));
        views.ensure(&server, &writes, &plain("/b"));

        server.apply_overwrite(&path("/a/x"), Node::from(1));
        let changed = views.refresh(&server, &writes, &path("/a/x"));
        assert_eq!(changed, vec![plain("/a")]);

        // Recomputing without a change is idempotent.
        assert!(views.refresh_all(&server, &writes).is_empty());
        assert_eq!(
            views.get(&plain("/a")).map(|v| v.value.clone()),
            Some(Node::empty().set_subtree(&path("x"), Node::from(1)))
        );
    }

    #[test]
    fn completeness_change_counts_as_change() {
        let mut server = ValueTree::new();
        let writes = WriteTree::new();
        let mut views = SyncViews::new();
        assert!(!views.ensure(&server, &writes, &plain("/e")).complete);
        server.mark_complete(&path("/e"));
        assert_eq!(views.refresh(&server, &writes, &path("/e")), vec![plain("/e")]);
        assert!(views.get(&plain("/e")).is_some_and(|v| v.complete && v.value.is_empty()));
    }

    #[test]
    fn filtered_views_ignore_shared_server_data() {
        let mut server = ValueTree::new();
        server.apply_overwrite(
            &path("/list"),
            Node::from_json(&serde_json::json!({"a": 1, "b": 2, "c": 3})).unwrap(),
        );
        let writes = WriteTree::new();
        let mut views = SyncViews::new();

        assert!(views.ensure(&server, &writes, &plain("/list")).complete);
        let filtered = views.ensure(&server, &writes, &limited("/list"));
        assert!(!filtered.complete);
        assert!(filtered.value.is_empty());

        let last = Node::from_json(&serde_json::json!({"c": 3})).unwrap();
        assert!(views.apply_query_overwrite(&limited("/list"), last.clone()));
        assert_eq!(
            views.refresh(&server, &writes, &path("/list")),
            vec![limited("/list")]
        );
        let view = views.get(&limited("/list")).unwrap();
        assert!(view.complete);
        assert_eq!(view.value, last);
    }

    #[test]
    fn filtered_views_overlay_local_writes() {
        let server = ValueTree::new();
        let mut writes = WriteTree::new();
        let mut views = SyncViews::new();
        views.ensure(&server, &writes, &limited("/q"));
        assert!(views.mark_query_complete(&limited("/q")));
        assert!(!views.mark_query_complete(&plain("/q")));

        writes.add(path("/q/z"), Operation::Set(Node::from(9)), WriteOrigin::User, true);
        views.refresh(&server, &writes, &path("/q/z"));
        let view = views.get(&limited("/q")).unwrap();
        assert!(view.complete);
        assert_eq!(view.value.get(&path("z")), Node::from(9));

        let mut merge = MergeMap::new();
        merge.insert(path("y"), Node::from(8));
        assert!(views.apply_query_merge(&limited("/q"), &merge));
        views.refresh(&server, &writes, &path("/q"));
        assert_eq!(
            views.get(&limited("/q")).map(|v| v.value.child_count()),
            Some(2)
        );
    }
}
