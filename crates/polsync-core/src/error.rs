// ── Syncer error types ──
//
// Errors reported to `SyncerCallbacks::on_error`. None of them stop the
// syncer as a whole; an invariant violation only ends the cache that
// hit it.

use thiserror::Error;

/// Non-fatal error notification emitted by a watcher cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// A backend or update processor call failed.
    #[error(transparent)]
    Datastore(#[from] polsync_api::Error),

    /// The backend broke its watch contract. The cache for `list_root`
    /// has torn itself down.
    #[error("Invariant violated by backend for {list_root}: {reason}")]
    InvariantViolation { list_root: String, reason: String },
}

impl SyncError {
    /// Returns `true` if the reporting cache has stopped.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation { .. })
    }
}
