//! Structural limits on paths and values.

use crate::error::{CoreError, CoreResult};
use crate::node::{Leaf, Node, Priority};
use crate::operation::Operation;
use crate::path::Path;

/// Maximum size of a key in UTF-8 bytes.
pub const MAX_KEY_BYTES: usize = 768;
/// Maximum number of segments in a path.
pub const MAX_PATH_DEPTH: usize = 32;
/// Maximum size of a path in UTF-8 bytes.
pub const MAX_PATH_BYTES: usize = 768;
/// Maximum size of a string leaf in UTF-8 bytes.
pub const MAX_LEAF_BYTES: usize = 10 * 1024 * 1024;

/// Limits applied to paths and values before they reach a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationLimits {
    /// Maximum key size in bytes.
    pub max_key_bytes: usize,
    /// Maximum path depth, counting the segments inside written values.
    pub max_path_depth: usize,
    /// Maximum path size in bytes.
    pub max_path_bytes: usize,
    /// Maximum string leaf size in bytes.
    pub max_leaf_bytes: usize,
}

impl Default for ValidationLimits {
    fn default() -> Self {
        Self {
            max_key_bytes: MAX_KEY_BYTES,
            max_path_depth: MAX_PATH_DEPTH,
            max_path_bytes: MAX_PATH_BYTES,
            max_leaf_bytes: MAX_LEAF_BYTES,
        }
    }
}

impl ValidationLimits {
    /// Validates a node that is about to be written at `path`.
    pub fn check_node(&self, path: &Path, node: &Node) -> CoreResult<()> {
        path.validate(self)?;
        self.check_priority(path, node.priority())?;
        if let Some(leaf) = node.as_leaf() {
            return self.check_leaf(path, leaf);
        }
        for (key, child) in node.children() {
            if key.as_str().len() > self.max_key_bytes {
                return Err(CoreError::invalid_segment(
                    key.as_str(),
                    format!("key exceeds {} bytes", self.max_key_bytes),
                ));
            }
            self.check_node(&path.child(key), child)?;
        }
        Ok(())
    }

    /// Validates an operation that is about to be issued at `path`.
    pub fn check_operation(&self, path: &Path, operation: &Operation) -> CoreResult<()> {
        path.validate(self)?;
        match operation {
            Operation::Set(node) => self.check_node(path, node),
            Operation::Merge(entries) => {
                crate::operation::validate_merge_paths(path, entries)?;
                entries
                    .iter()
                    .try_for_each(|(relative, node)| self.check_node(&path.join(relative), node))
            }
            Operation::SetPriority(priority) => self.check_priority(path, priority),
        }
    }

    fn check_leaf(&self, path: &Path, leaf: &Leaf) -> CoreResult<()> {
        match leaf {
            Leaf::Number(n) if !n.is_finite() => Err(CoreError::invalid_value(
                path.to_string(),
                "numbers must be finite",
            )),
            Leaf::String(s) if s.len() > self.max_leaf_bytes => Err(CoreError::invalid_value(
                path.to_string(),
                format!("string exceeds {} bytes", self.max_leaf_bytes),
            )),
            _ => Ok(()),
        }
    }

    fn check_priority(&self, path: &Path, priority: &Priority) -> CoreResult<()> {
        match priority {
            Priority::Number(n) if !n.is_finite() => Err(CoreError::invalid_value(
                path.to_string(),
                "priority must be finite",
            )),
            Priority::String(s) if s.len() > self.max_key_bytes => Err(CoreError::invalid_value(
                path.to_string(),
                format!("priority exceeds {} bytes", self.max_key_bytes),
            )),
            _ => Ok(()),
        }
    }
}
