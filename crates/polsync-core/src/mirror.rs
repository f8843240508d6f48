// ── In-memory mirror of syncer output ──
//
// A `SyncerCallbacks` implementation that applies every update batch to
// a concurrent map and republishes a sorted snapshot through `watch`
// channels, so readers get O(1) lookups and push-based change
// notification without talking to the syncer.
//
// While the syncer is not `InSync` (initial load, resync after an
// outage) caches deliver one update per batch, so snapshot publication
// is deferred to the `InSync` edge or to the next `snapshot()` call.

use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_core::Stream;
use polsync_api::{KVPair, Key};
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tracing::{debug, warn};

use crate::callbacks::SyncerCallbacks;
use crate::error::SyncError;
use crate::update::{SyncStatus, Update, UpdateType};

type Snapshot = Arc<Vec<Arc<KVPair>>>;

/// Live view of everything the syncer has reported.
pub struct SyncerMirror {
    entries: DashMap<Key, Arc<KVPair>>,
    snapshot: watch::Sender<Snapshot>,
    version: watch::Sender<u64>,
    status: watch::Sender<SyncStatus>,
    last_in_sync: watch::Sender<Option<DateTime<Utc>>>,
    errors: AtomicU64,
    /// Entries changed since the last published snapshot.
    dirty: AtomicBool,
}

impl Default for SyncerMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncerMirror {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        let (version, _) = watch::channel(0u64);
        let (status, _) = watch::channel(SyncStatus::WaitForDatastore);
        let (last_in_sync, _) = watch::channel(None);

        Self {
            entries: DashMap::new(),
            snapshot,
            version,
            status,
            last_in_sync,
            errors: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn get(&self, key: &Key) -> Option<Arc<KVPair>> {
        self.entries.get(key).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Every entry, ordered by key.
    ///
    /// Cheap `Arc` clone unless updates are pending publication.
    pub fn snapshot(&self) -> Snapshot {
        self.publish_pending();
        self.snapshot.borrow().clone()
    }

    /// Number of update batches applied so far.
    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn status(&self) -> SyncStatus {
        *self.status.borrow()
    }

    /// Receiver for aggregate status changes.
    pub fn status_receiver(&self) -> watch::Receiver<SyncStatus> {
        self.status.subscribe()
    }

    /// Wait until the aggregate status equals `target`.
    pub async fn wait_for_status(&self, target: SyncStatus) {
        let mut rx = self.status.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|status| *status == target).await;
    }

    /// When the syncer last reported `InSync`.
    pub fn last_in_sync(&self) -> Option<DateTime<Utc>> {
        *self.last_in_sync.borrow()
    }

    /// Number of error notifications received.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn subscribe(&self) -> MirrorStream {
        self.publish_pending();
        MirrorStream::new(self.snapshot.subscribe())
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn apply(&self, update: Update) {
        let key = update.kvp.key.clone();
        match update.update_type {
            UpdateType::New | UpdateType::Updated => {
                if update.kvp.is_deleted() {
                    warn!(key = %key, update_type = %update.update_type, "Ignoring update without a value");
                    return;
                }
                let previous = self.entries.insert(key.clone(), Arc::new(update.kvp));
                match (update.update_type, previous.is_some()) {
                    (UpdateType::New, true) => {
                        warn!(key = %key, "Received New for a key that is already present");
                    }
                    (UpdateType::Updated, false) => {
                        warn!(key = %key, "Received Updated for an unknown key");
                    }
                    _ => {}
                }
            }
            UpdateType::Deleted => {
                if !update.kvp.is_deleted() {
                    warn!(key = %key, "Received Deleted carrying a value");
                }
                if self.entries.remove(&key).is_none() {
                    warn!(key = %key, "Received Deleted for an unknown key");
                }
            }
        }
    }

    fn publish_pending(&self) {
        if self.dirty.swap(false, Ordering::AcqRel) {
            self.publish();
        }
    }

    fn publish(&self) {
        let mut values: Vec<Arc<KVPair>> =
            self.entries.iter().map(|r| Arc::clone(r.value())).collect();
        values.sort_by(|a, b| a.key.cmp(&b.key));
        // `send_modify` updates unconditionally, even with zero receivers.
        self.snapshot.send_modify(|snap| *snap = Arc::new(values));
    }
}

impl SyncerCallbacks for SyncerMirror {
    fn on_status_updated(&self, status: SyncStatus) {
        debug!(%status, "Mirror status updated");
        if status == SyncStatus::InSync {
            self.publish_pending();
            self.last_in_sync.send_replace(Some(Utc::now()));
        }
        self.status.send_replace(status);
    }

    fn on_updates(&self, updates: Vec<Update>) {
        for update in updates {
            self.apply(update);
        }
        self.version.send_modify(|v| *v += 1);

        if self.status() == SyncStatus::InSync {
            self.publish();
        } else {
            self.dirty.store(true, Ordering::Release);
        }
    }

    fn on_error(&self, err: &SyncError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        warn!(error = %err, "Syncer reported an error");
    }
}

// ── MirrorStream ────────────────────────────────────────────────────

/// A subscription to mirror snapshots.
///
/// Provides both point-in-time access and change notification via
/// [`changed`](Self::changed) or by converting into a `Stream`.
pub struct MirrorStream {
    current: Snapshot,
    receiver: watch::Receiver<Snapshot>,
}

impl MirrorStream {
    fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        let current = receiver.borrow().clone();
        Self { current, receiver }
    }

    /// Snapshot captured at creation time or at the last `changed()`.
    pub fn current(&self) -> &Snapshot {
        &self.current
    }

    /// Latest snapshot (may have changed since `current`).
    pub fn latest(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    /// Wait for the next change, returning the new snapshot.
    /// Returns `None` if the mirror has been dropped.
    pub async fn changed(&mut self) -> Option<Snapshot> {
        self.receiver.changed().await.ok()?;
        let snap = self.receiver.borrow_and_update().clone();
        self.current = snap.clone();
        Some(snap)
    }

    pub fn into_stream(self) -> MirrorWatchStream {
        MirrorWatchStream {
            inner: WatchStream::new(self.receiver),
        }
    }
}

/// `Stream` adapter yielding a new snapshot each time the mirror changes.
pub struct MirrorWatchStream {
    inner: WatchStream<Snapshot>,
}

impl Stream for MirrorWatchStream {
    type Item = Snapshot;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
