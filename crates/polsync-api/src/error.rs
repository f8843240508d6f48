use thiserror::Error;

/// Top-level error type for the `polsync-api` crate.
///
/// Covers every failure mode a datastore backend can report: object
/// lookups, write conflicts, capability gaps, and watch lifecycle.
/// `polsync-core` decides how each variant affects a resync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    // ── Object errors ───────────────────────────────────────────────
    /// The requested key is not present in the datastore.
    #[error("Resource does not exist: {key}")]
    ResourceDoesNotExist { key: String },

    /// A create was attempted for a key that is already present.
    #[error("Resource already exists: {key}")]
    ResourceAlreadyExists { key: String },

    /// An update or delete carried a revision that no longer matches.
    #[error("Update conflict on {key}: {reason}")]
    UpdateConflict { key: String, reason: String },

    /// The resource could not be written or converted.
    #[error("Invalid resource {key}: {reason}")]
    InvalidResource { key: String, reason: String },

    // ── Capability ──────────────────────────────────────────────────
    /// The backend cannot perform this operation for the given identifier,
    /// e.g. watching a resource type that only supports listing.
    #[error("Operation {operation} is not supported on {identifier}")]
    OperationNotSupported {
        operation: &'static str,
        identifier: String,
    },

    // ── Watch lifecycle ─────────────────────────────────────────────
    /// The watch stream ended. `closed_by_remote` is `true` when the
    /// server side dropped the stream and resuming from the last revision
    /// is safe; `false` when the backend invalidated the watch itself.
    #[error("Watch terminated (closed by remote: {closed_by_remote}): {reason}")]
    WatchTerminated {
        closed_by_remote: bool,
        reason: String,
    },

    /// The revision asked for is older than the retained change history.
    #[error("Revision {revision} has been compacted")]
    RevisionCompacted { revision: String },

    /// The revision string could not be interpreted by this backend.
    #[error("Invalid revision '{revision}'")]
    InvalidRevision { revision: String },

    // ── Transport ───────────────────────────────────────────────────
    /// The datastore could not be reached or failed the request.
    #[error("Datastore unavailable: {message}")]
    Unavailable { message: String },
}

impl Error {
    /// Returns `true` if the backend reported a capability gap rather
    /// than a failure.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, Self::OperationNotSupported { .. })
    }

    /// For a terminated watch, returns whether the remote end closed it.
    /// Returns `None` for every other error.
    pub fn watch_terminated(&self) -> Option<bool> {
        match self {
            Self::WatchTerminated {
                closed_by_remote, ..
            } => Some(*closed_by_remote),
            _ => None,
        }
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Unavailable { .. } | Self::WatchTerminated { .. } | Self::RevisionCompacted { .. }
        )
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ResourceDoesNotExist { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_watch_termination() {
        let remote = Error::WatchTerminated {
            closed_by_remote: true,
            reason: "server restarted".into(),
        };
        let local = Error::WatchTerminated {
            closed_by_remote: false,
            reason: "resource version too old".into(),
        };

        assert_eq!(remote.watch_terminated(), Some(true));
        assert_eq!(local.watch_terminated(), Some(false));
        assert_eq!(
            Error::Unavailable {
                message: "connection refused".into()
            }
            .watch_terminated(),
            None
        );
    }

    #[test]
    fn not_supported_is_not_transient() {
        let err = Error::OperationNotSupported {
            operation: "watch",
            identifier: "/polsync/v3/ipamblocks/".into(),
        };
        assert!(err.is_not_supported());
        assert!(!err.is_transient());
    }

    #[test]
    fn display_includes_key() {
        let err = Error::ResourceDoesNotExist {
            key: "/polsync/v3/nodes/node-1".into(),
        };
        assert!(err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Resource does not exist: /polsync/v3/nodes/node-1"
        );
    }
}
