//! Operations the server runs when this client disconnects.

use treesync_core::{Operation, Path};

/// Ordered on-disconnect registrations.
///
/// The server forgets registrations whenever the socket drops, so the engine
/// keeps them here and registers them again on every connect. Registering an
/// operation that replaces a subtree forgets earlier registrations inside it.
#[derive(Debug, Default, Clone)]
pub struct OnDisconnectQueue {
    entries: Vec<(Path, Operation)>,
}

impl OnDisconnectQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a registration.
    pub fn queue(&mut self, path: Path, operation: Operation) {
        let replaced: Vec<Path> = match &operation {
            Operation::Set(_) => vec![path.clone()],
            Operation::Merge(entries) => entries.keys().map(|rel| path.join(rel)).collect(),
            Operation::SetPriority(_) => Vec::new(),
        };
        self.entries
            .retain(|(queued, _)| !replaced.iter().any(|r| r.contains(queued)));
        self.entries.push((path, operation));
    }

    /// Forgets registrations at or below `path`; returns how many were dropped.
    pub fn cancel(&mut self, path: &Path) -> usize {
        let before = self.entries.len();
        self.entries.retain(|(queued, _)| !path.contains(queued));
        before - self.entries.len()
    }

    /// Returns the registrations in order.
    pub fn entries(&self) -> &[(Path, Operation)] {
        &self.entries
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
