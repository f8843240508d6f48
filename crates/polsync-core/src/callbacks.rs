// ── Downstream callbacks ──
//
// The dispatcher task calls these in the order messages arrive on the
// shared results channel. Implementations must not block for long: a
// slow callback backs up every cache.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::warn;

use crate::error::SyncError;
use crate::update::{SyncStatus, Update};

/// Receiver of aggregate syncer output.
pub trait SyncerCallbacks: Send + Sync {
    fn on_status_updated(&self, status: SyncStatus);

    /// A batch of updates from one resource type, in the order the cache
    /// produced them.
    fn on_updates(&self, updates: Vec<Update>);

    /// A non-fatal error notification. The default implementation logs it.
    fn on_error(&self, err: &SyncError) {
        warn!(error = %err, "Syncer reported an error");
    }
}

impl<T: SyncerCallbacks + ?Sized> SyncerCallbacks for Arc<T> {
    fn on_status_updated(&self, status: SyncStatus) {
        (**self).on_status_updated(status);
    }

    fn on_updates(&self, updates: Vec<Update>) {
        (**self).on_updates(updates);
    }

    fn on_error(&self, err: &SyncError) {
        (**self).on_error(err);
    }
}

// ── Channel adapter ─────────────────────────────────────────────────

/// One callback invocation, as delivered by [`ChannelCallbacks`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncerEvent {
    Status(SyncStatus),
    Updates(Vec<Update>),
    Error(SyncError),
}

/// Forwards every callback into an unbounded channel so async code can
/// consume syncer output with `recv().await`.
#[derive(Debug, Clone)]
pub struct ChannelCallbacks {
    tx: mpsc::UnboundedSender<SyncerEvent>,
}

impl ChannelCallbacks {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncerEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn forward(&self, event: SyncerEvent) {
        // The receiver going away only means nobody is listening anymore.
        let _ = self.tx.send(event);
    }
}

impl SyncerCallbacks for ChannelCallbacks {
    fn on_status_updated(&self, status: SyncStatus) {
        self.forward(SyncerEvent::Status(status));
    }

    fn on_updates(&self, updates: Vec<Update>) {
        self.forward(SyncerEvent::Updates(updates));
    }

    fn on_error(&self, err: &SyncError) {
        self.forward(SyncerEvent::Error(err.clone()));
    }
}
