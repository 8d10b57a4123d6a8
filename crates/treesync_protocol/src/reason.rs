//! Reasons the server gives for reverting a write.

use std::fmt;

/// Why the server rejected a write.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RevertReason {
    /// Security rules denied the write.
    PermissionDenied,
    /// The connection dropped before the write was applied.
    Disconnect,
    /// The write was canceled.
    WriteCanceled,
    /// A transaction precondition no longer holds.
    DataStale,
    /// Any other status.
    Unknown(String),
}

impl RevertReason {
    /// Parses a wire status string.
    pub fn from_status(status: &str) -> Self {
        match status {
            "permission_denied" => RevertReason::PermissionDenied,
            "disconnect" => RevertReason::Disconnect,
            "write_canceled" => RevertReason::WriteCanceled,
            "datastale" => RevertReason::DataStale,
            other => RevertReason::Unknown(other.to_string()),
        }
    }

    /// Returns the wire status string.
    pub fn as_status(&self) -> &str {
        match self {
            RevertReason::PermissionDenied => "permission_denied",
            RevertReason::Disconnect => "disconnect",
            RevertReason::WriteCanceled => "write_canceled",
            RevertReason::DataStale => "datastale",
            RevertReason::Unknown(status) => status,
        }
    }
}

impl fmt::Display for RevertReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_status())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_strings_round_trip() {
        for reason in [
            RevertReason::PermissionDenied,
            RevertReason::Disconnect,
            RevertReason::WriteCanceled,
            RevertReason::DataStale,
            RevertReason::Unknown("overloaded".into()),
        ] {
            assert_eq!(RevertReason::from_status(reason.as_status()), reason);
        }
    }

    #[test]
    fn unrecognized_status_is_unknown() {
        assert_eq!(
            RevertReason::from_status("too_big"),
            RevertReason::Unknown("too_big".into())
        );
    }
}
