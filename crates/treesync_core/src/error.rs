//! Error types for treesync core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors that can occur when building paths, nodes or operations.
///
/// All of these are structural: they are raised synchronously at the call
/// that produced the malformed input and never reach the value tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoreError {
    /// A single path segment (child key) is malformed.
    #[error("invalid path segment {segment:?}: {reason}")]
    InvalidPathSegment {
        /// The offending segment.
        segment: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A path as a whole is malformed (too deep, too long).
    #[error("invalid path {path:?}: {reason}")]
    InvalidPath {
        /// The offending path.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A value cannot be represented as a node.
    #[error("invalid value at {path}: {reason}")]
    InvalidValue {
        /// Location of the value.
        path: String,
        /// Why it was rejected.
        reason: String,
    },

    /// A merge operation is malformed.
    #[error("invalid merge at {path}: {reason}")]
    InvalidMerge {
        /// Location of the merge.
        path: String,
        /// Why it was rejected.
        reason: String,
    },
}

impl CoreError {
    /// Creates an invalid path segment error.
    pub fn invalid_segment(segment: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPathSegment {
            segment: segment.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid path error.
    pub fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid value error.
    pub fn invalid_value(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Creates an invalid merge error.
    pub fn invalid_merge(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidMerge {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

/// Failure reported by an event sink.
///
/// Sink failures are isolated: they are logged and counted, and never
/// affect other listeners or the engine state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event sink failed: {0}")]
pub struct SinkError(pub String);

impl SinkError {
    /// Creates a sink error from any message.
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = CoreError::invalid_segment("a.b", "contains '.'");
        assert_eq!(
            err.to_string(),
            "invalid path segment \"a.b\": contains '.'"
        );

        let err = CoreError::invalid_value("/users/1", "NaN is not a valid number");
        assert!(err.to_string().contains("/users/1"));
    }
}
