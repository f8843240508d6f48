// ── Resource watcher cache ──
//
// List/watch/resync loop for a single resource type. The cache owns the
// `key -> revision` map of everything it has told the dispatcher about,
// and turns raw list results and watch events into New/Updated/Deleted
// transitions against that map.
//
// All output goes through the results channel shared with the
// dispatcher. Messages that have been decided are always delivered, so
// only the list/watch calls, watch receives and retry sleeps observe
// cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use polsync_api::{Client, KVPair, KVPairList, Key, Revision, WatchEvent, WatchHandle};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::SyncerConfig;
use crate::error::SyncError;
use crate::processor::ResourceType;
use crate::update::{SyncStatus, SyncerMessage, Update};

/// What to do once a watch stops delivering events.
enum AfterWatch {
    Resync,
    Stop,
}

pub(crate) struct WatcherCache {
    client: Arc<dyn Client>,
    resource_type: ResourceType,
    list_root: String,
    config: SyncerConfig,
    results: mpsc::Sender<SyncerMessage>,
    /// Keys sent downstream and the revision they were last sent at.
    resources: BTreeMap<Key, Revision>,
    /// Entries awaiting revalidation during a full resync.
    old_resources: BTreeMap<Key, Revision>,
    current_watch_revision: Revision,
    errors: u32,
    has_synced: bool,
}

impl WatcherCache {
    pub(crate) fn new(
        client: Arc<dyn Client>,
        resource_type: ResourceType,
        config: SyncerConfig,
        results: mpsc::Sender<SyncerMessage>,
    ) -> Self {
        let list_root = resource_type.list_options.default_path_root();
        Self {
            client,
            resource_type,
            list_root,
            config,
            results,
            resources: BTreeMap::new(),
            old_resources: BTreeMap::new(),
            current_watch_revision: Revision::default(),
            errors: 0,
            has_synced: false,
        }
    }

    pub(crate) fn list_root(&self) -> &str {
        &self.list_root
    }

    /// Run until `cancel` fires or the backend breaks the watch contract,
    /// then send a `Deleted` for every remaining entry.
    pub(crate) async fn run(mut self, cancel: CancellationToken) {
        debug!("Watcher cache starting, start initial sync processing");

        while let Some(watch) = self.resync_and_create_watcher(&cancel).await {
            match self.process_watch(watch, &cancel).await {
                AfterWatch::Resync => {}
                AfterWatch::Stop => break,
            }
        }

        self.teardown().await;
        debug!("Watcher cache stopped");
    }

    // ── Resync ──────────────────────────────────────────────────────

    /// Loop until a resync completes and a watch is established. Returns
    /// `None` on cancellation.
    ///
    /// A full resync is performed when no watch revision is known;
    /// otherwise the watch resumes from the last revision seen.
    async fn resync_and_create_watcher(
        &mut self,
        cancel: &CancellationToken,
    ) -> Option<WatchHandle> {
        debug!("Starting watch sync/resync processing");
        let mut perform_full_resync = self.current_watch_revision.is_empty();

        loop {
            if cancel.is_cancelled() {
                return None;
            }

            if perform_full_resync {
                debug!("Full resync is required");
                if let Some(processor) = self.resource_type.update_processor.as_mut() {
                    debug!("Trigger converter resync notification");
                    processor.on_syncer_starting();
                }

                let latest = Revision::default();
                let listed = tokio::select! {
                    biased;
                    () = cancel.cancelled() => return None,
                    res = self.client.list(&self.resource_type.list_options, &latest) => res,
                };
                match listed {
                    Ok(list) => self.apply_list(list).await,
                    Err(err) => {
                        info!(error = %err, "Failed to perform list of current data during resync");
                        self.on_error().await;
                        if !sleep_or_cancel(cancel, self.config.list_retry_interval).await {
                            return None;
                        }
                        continue;
                    }
                }
            }

            let watched = tokio::select! {
                biased;
                () = cancel.cancelled() => return None,
                res = self.client.watch(&self.resource_type.list_options, &self.current_watch_revision) => res,
            };
            match watched {
                Ok(watch) => {
                    debug!(revision = %self.current_watch_revision, "Resync completed, now watching for change events");
                    return Some(watch);
                }
                Err(err) if err.is_not_supported() => {
                    debug!("Watch operation not supported, polling");
                    perform_full_resync = true;
                    if !sleep_or_cancel(cancel, self.config.watch_poll_interval).await {
                        return None;
                    }
                }
                Err(err) => {
                    info!(error = %err, full_resync = perform_full_resync, "Failed to create watcher");
                    self.on_error().await;
                    perform_full_resync = true;
                    if !sleep_or_cancel(cancel, self.config.list_retry_interval).await {
                        return None;
                    }
                }
            }
        }
    }

    /// Replay a full listing against the cache.
    async fn apply_list(&mut self, list: KVPairList) {
        self.old_resources = std::mem::take(&mut self.resources);

        for kvp in list.kvps {
            self.handle_watch_list_event(kvp).await;
        }

        self.finish_resync().await;
        self.current_watch_revision = list.revision;
    }

    /// Report the first sync, then delete whatever the listing did not
    /// revalidate.
    async fn finish_resync(&mut self) {
        if !self.has_synced {
            info!("Sending synced update");
            self.send(SyncerMessage::Status(SyncStatus::InSync)).await;
            self.has_synced = true;
            self.errors = 0;
        }

        let stale = std::mem::take(&mut self.old_resources);
        if !stale.is_empty() {
            debug!(count = stale.len(), "Sending resync deletes");
            let updates = stale
                .into_keys()
                .map(|key| Update::deleted(key, Revision::default()))
                .collect();
            self.send(SyncerMessage::Updates(updates)).await;
        }
    }

    // ── Watch ───────────────────────────────────────────────────────

    async fn process_watch(
        &mut self,
        mut watch: WatchHandle,
        cancel: &CancellationToken,
    ) -> AfterWatch {
        loop {
            let event = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    debug!("Stopping watcher");
                    watch.stop();
                    return AfterWatch::Stop;
                }
                event = watch.next() => event,
            };

            let Some(event) = event else {
                info!("Watch channel closed by remote, recreating watcher");
                return AfterWatch::Resync;
            };

            match event {
                WatchEvent::Added(kvp) | WatchEvent::Modified { new: kvp, .. } => {
                    self.handle_watch_list_event(kvp).await;
                }
                WatchEvent::Deleted { old: Some(mut kvp) } => {
                    kvp.value = None;
                    self.handle_watch_list_event(kvp).await;
                }
                WatchEvent::Deleted { old: None } => {
                    self.on_invariant_violation("delete event without previous value")
                        .await;
                    watch.stop();
                    return AfterWatch::Stop;
                }
                WatchEvent::Error(err) => {
                    if self.handle_watch_error(err).await {
                        watch.stop();
                        return AfterWatch::Resync;
                    }
                }
            }
        }
    }

    /// Forward a watch error and decide whether the watch must be
    /// recreated.
    async fn handle_watch_error(&mut self, err: polsync_api::Error) -> bool {
        let terminated = err.watch_terminated();
        self.send(SyncerMessage::Failure(err.into())).await;

        let mut resync = false;
        match terminated {
            Some(true) => {
                debug!("Watch closed by remote, resuming from last revision");
                resync = true;
            }
            Some(false) => {
                debug!("Watch was not closed by remote, full resync required");
                self.current_watch_revision.clear();
                self.on_error().await;
                resync = true;
            }
            None => self.on_error().await,
        }

        if self.errors > self.config.error_threshold {
            info!(
                errors = self.errors,
                threshold = self.config.error_threshold,
                "Error threshold exceeded while watching, forcing full resync"
            );
            self.current_watch_revision.clear();
            resync = true;
        }
        resync
    }

    // ── Event handling ──────────────────────────────────────────────

    /// Convert a list item or watch event (if a processor is attached)
    /// and apply the result to the cache.
    async fn handle_watch_list_event(&mut self, kvp: KVPair) {
        if !kvp.revision.is_empty() {
            self.current_watch_revision = kvp.revision.clone();
        }

        let converted = match self.resource_type.update_processor.as_mut() {
            Some(processor) => processor.process(&kvp),
            None => Ok(vec![kvp]),
        };

        match converted {
            Ok(kvps) => {
                for kvp in kvps {
                    self.handle_converted_event(kvp).await;
                }
                self.errors = 0;
            }
            Err(err) => {
                warn!(error = %err, "Failed to convert datastore entry");
                self.send(SyncerMessage::Failure(err.into())).await;
            }
        }
    }

    async fn handle_converted_event(&mut self, kvp: KVPair) {
        if kvp.is_deleted() {
            self.handle_deleted(kvp.key, kvp.revision).await;
        } else {
            self.handle_added_or_modified(kvp).await;
        }
    }

    async fn handle_added_or_modified(&mut self, kvp: KVPair) {
        self.mark_as_valid(&kvp.key);

        let previous = self
            .resources
            .insert(kvp.key.clone(), kvp.revision.clone());
        let update = match previous {
            Some(revision) if revision == kvp.revision => {
                debug!(key = %kvp.key, "Swallowing event update from datastore because entry is same as cached entry");
                return;
            }
            Some(_) => {
                debug!(key = %kvp.key, "Datastore entry modified, sending syncer update");
                Update::updated(kvp)
            }
            None => {
                debug!(key = %kvp.key, "Cache entry added, sending syncer update");
                Update::new(kvp)
            }
        };
        self.send(SyncerMessage::Updates(vec![update])).await;
    }

    async fn handle_deleted(&mut self, key: Key, revision: Revision) {
        self.mark_as_valid(&key);

        if self.resources.remove(&key).is_some() {
            debug!(key = %key, "Datastore entry deleted, sending syncer update");
            self.send(SyncerMessage::Updates(vec![Update::deleted(key, revision)]))
                .await;
        }
    }

    /// Move a key seen during a resync back from `old_resources`.
    fn mark_as_valid(&mut self, key: &Key) {
        if let Some(revision) = self.old_resources.remove(key) {
            debug!(key = %key, "Marking key as re-processed");
            self.resources.insert(key.clone(), revision);
        }
    }

    // ── Errors ──────────────────────────────────────────────────────

    async fn on_error(&mut self) {
        self.errors = self.errors.saturating_add(1);
        if self.has_synced && self.errors > self.config.error_threshold {
            debug!(
                errors = self.errors,
                threshold = self.config.error_threshold,
                "Exceeded error threshold"
            );
            self.has_synced = false;
            self.send(SyncerMessage::Status(SyncStatus::WaitForDatastore))
                .await;
        }
    }

    async fn on_invariant_violation(&mut self, reason: &str) {
        error!(reason, "Backend violated the watch contract, stopping watcher cache");
        let err = SyncError::InvariantViolation {
            list_root: self.list_root.clone(),
            reason: reason.to_owned(),
        };
        self.send(SyncerMessage::Failure(err)).await;

        if self.has_synced {
            self.has_synced = false;
            self.send(SyncerMessage::Status(SyncStatus::WaitForDatastore))
                .await;
        }
    }

    // ── Output ──────────────────────────────────────────────────────

    async fn teardown(&mut self) {
        self.mark_all_old_as_valid();
        let remaining = std::mem::take(&mut self.resources);
        if remaining.is_empty() {
            return;
        }

        debug!(count = remaining.len(), "Sending deletes for remaining entries");
        let updates = remaining
            .into_keys()
            .map(|key| Update::deleted(key, Revision::default()))
            .collect();
        self.send(SyncerMessage::Updates(updates)).await;
    }

    fn mark_all_old_as_valid(&mut self) {
        let old = std::mem::take(&mut self.old_resources);
        self.resources.extend(old);
    }

    async fn send(&mut self, message: SyncerMessage) {
        if self.results.send(message).await.is_err() {
            debug!("Results channel closed, dropping message");
        }
    }
}

/// Sleep for `duration`. Returns `false` if cancelled first.
async fn sleep_or_cancel(cancel: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}
