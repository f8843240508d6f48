// ── Watcher syncer ──
//
// Runs one watcher cache per resource type and a dispatcher that drains
// their shared results channel into the downstream callbacks, tracking
// how many caches are in sync.

use std::sync::Arc;

use polsync_api::Client;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::callbacks::SyncerCallbacks;
use crate::config::SyncerConfig;
use crate::processor::ResourceType;
use crate::update::{SyncStatus, SyncerMessage};
use crate::watcher_cache::WatcherCache;

/// Aggregate syncer over a fixed set of resource types.
///
/// Construct with [`new`](Self::new), then call [`start`](Self::start)
/// from inside a Tokio runtime. [`stop`](Self::stop) cancels every cache;
/// each one sends `Deleted` for its remaining entries before the
/// dispatcher finishes, which [`wait`](Self::wait) observes.
pub struct WatcherSyncer {
    client: Arc<dyn Client>,
    resource_types: Vec<ResourceType>,
    callbacks: Arc<dyn SyncerCallbacks>,
    config: SyncerConfig,
    cancel: CancellationToken,
    dispatcher: Option<JoinHandle<()>>,
}

impl WatcherSyncer {
    pub fn new(
        client: Arc<dyn Client>,
        resource_types: Vec<ResourceType>,
        callbacks: impl SyncerCallbacks + 'static,
    ) -> Self {
        Self {
            client,
            resource_types,
            callbacks: Arc::new(callbacks),
            config: SyncerConfig::default(),
            cancel: CancellationToken::new(),
            dispatcher: None,
        }
    }

    pub fn with_config(mut self, config: SyncerConfig) -> Self {
        self.config = config;
        self
    }

    /// Stop when `parent` is cancelled as well as on [`stop`](Self::stop).
    pub fn with_parent_token(mut self, parent: &CancellationToken) -> Self {
        self.cancel = parent.child_token();
        self
    }

    /// Spawn the cache tasks and the dispatcher. Calling this more than
    /// once has no effect.
    pub fn start(&mut self) {
        if self.dispatcher.is_some() {
            warn!("Watcher syncer already started");
            return;
        }

        let resource_types = std::mem::take(&mut self.resource_types);
        info!(resource_types = resource_types.len(), "Starting watcher syncer");

        let (results_tx, results_rx) = mpsc::channel(self.config.results_buffer.max(1));
        let num_caches = resource_types.len();
        let mut caches = Vec::with_capacity(num_caches);
        for resource_type in resource_types {
            let cache = WatcherCache::new(
                Arc::clone(&self.client),
                resource_type,
                self.config.clone(),
                results_tx.clone(),
            );
            let span = info_span!("watcher_cache", list_root = %cache.list_root());
            caches.push(tokio::spawn(cache.run(self.cancel.clone()).instrument(span)));
        }
        drop(results_tx);

        let dispatcher = Dispatcher::new(Arc::clone(&self.callbacks), num_caches);
        self.dispatcher = Some(tokio::spawn(
            dispatcher
                .run(results_rx, caches)
                .instrument(info_span!("watcher_syncer")),
        ));
    }

    /// Signal every cache to tear down.
    pub fn stop(&self) {
        debug!("Stopping watcher syncer");
        self.cancel.cancel();
    }

    /// Wait for the dispatcher to deliver the last message. Returns
    /// immediately if the syncer was never started.
    pub async fn wait(&mut self) {
        if let Some(handle) = self.dispatcher.take() {
            if let Err(err) = handle.await {
                warn!(error = %err, "Watcher syncer dispatcher failed");
            }
        }
    }

    pub fn is_started(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Token cancelled by [`stop`](Self::stop).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Drop for WatcherSyncer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────

struct Dispatcher {
    callbacks: Arc<dyn SyncerCallbacks>,
    num_caches: usize,
    num_synced: usize,
    status: SyncStatus,
}

impl Dispatcher {
    fn new(callbacks: Arc<dyn SyncerCallbacks>, num_caches: usize) -> Self {
        Self {
            callbacks,
            num_caches,
            num_synced: 0,
            status: SyncStatus::WaitForDatastore,
        }
    }

    async fn run(
        mut self,
        mut results: mpsc::Receiver<SyncerMessage>,
        caches: Vec<JoinHandle<()>>,
    ) {
        self.callbacks.on_status_updated(SyncStatus::WaitForDatastore);
        if self.num_caches == 0 {
            self.send_status(SyncStatus::InSync);
        }

        while let Some(message) = results.recv().await {
            self.dispatch(message);
        }
        debug!("Results channel closed");

        for cache in caches {
            if let Err(err) = cache.await {
                warn!(error = %err, "Watcher cache task failed");
            }
        }
        info!("Watcher syncer stopped");
    }

    fn dispatch(&mut self, message: SyncerMessage) {
        match message {
            SyncerMessage::Updates(updates) => {
                if updates.is_empty() {
                    return;
                }
                // Data arriving while waiting means a resync is under way.
                if self.status == SyncStatus::WaitForDatastore {
                    self.send_status(SyncStatus::Resyncing);
                }
                self.callbacks.on_updates(updates);
            }
            SyncerMessage::Status(SyncStatus::InSync) => {
                self.num_synced += 1;
                debug!(
                    synced = self.num_synced,
                    total = self.num_caches,
                    "Watcher cache in sync"
                );
                if self.num_synced == self.num_caches {
                    info!("All watchers have sync'd data - sending data and final sync");
                    self.send_status(SyncStatus::InSync);
                }
            }
            SyncerMessage::Status(SyncStatus::WaitForDatastore) => {
                self.num_synced = self.num_synced.saturating_sub(1);
                if self.status == SyncStatus::InSync {
                    info!("Watcher cache lost sync, waiting for datastore");
                    self.send_status(SyncStatus::WaitForDatastore);
                }
            }
            SyncerMessage::Status(SyncStatus::Resyncing) => {
                debug!("Ignoring resyncing marker from watcher cache");
            }
            SyncerMessage::Failure(err) => self.callbacks.on_error(&err),
        }
    }

    fn send_status(&mut self, status: SyncStatus) {
        debug!(%status, "Sending status update");
        self.status = status;
        self.callbacks.on_status_updated(status);
    }
}
