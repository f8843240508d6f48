//! In-process datastore.
//!
//! [`MemoryClient`] implements the full [`Client`] contract against a
//! `BTreeMap` guarded by a single async mutex. Every write bumps a global
//! revision and is appended to a bounded change history so watches can
//! resume from an earlier revision. A watch that asks for a revision
//! older than the retained history fails with
//! [`Error::RevisionCompacted`], mirroring how a compacting KV store
//! rejects stale resumes.
//!
//! The client also exposes a few hooks for exercising failure paths:
//! disabling watch support per kind, injecting list/watch failures, and
//! terminating every open watch.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::client::Client;
use crate::error::Error;
use crate::model::{KVPair, KVPairList, Key, ListOptions, ResourceKind, Revision};
use crate::watch::{WatchEvent, WatchHandle, WatchSender, watch_channel};

const DEFAULT_HISTORY_LIMIT: usize = 1024;
const WATCH_CHANNEL_CAPACITY: usize = 256;

// ── Internal state ──────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Change {
    Put { old: Option<KVPair>, new: KVPair },
    Delete { old: KVPair },
}

impl Change {
    fn key(&self) -> &Key {
        match self {
            Self::Put { new, .. } => &new.key,
            Self::Delete { old } => &old.key,
        }
    }

    fn to_event(&self) -> WatchEvent {
        match self.clone() {
            Self::Put { old: None, new } => WatchEvent::Added(new),
            Self::Put { old: Some(old), new } => WatchEvent::Modified {
                old: Some(old),
                new,
            },
            Self::Delete { old } => WatchEvent::Deleted { old: Some(old) },
        }
    }
}

#[derive(Debug)]
struct HistoryEntry {
    revision: u64,
    change: Change,
}

#[derive(Debug)]
struct Watcher {
    options: ListOptions,
    sender: WatchSender,
}

#[derive(Debug)]
struct MemoryState {
    revision: u64,
    items: BTreeMap<Key, KVPair>,
    history: VecDeque<HistoryEntry>,
    history_limit: usize,
    watchers: Vec<Watcher>,
    unwatchable: HashSet<ResourceKind>,
    list_failures: VecDeque<Error>,
    watch_failures: VecDeque<Error>,
}

impl MemoryState {
    fn new(history_limit: usize) -> Self {
        Self {
            revision: 0,
            items: BTreeMap::new(),
            history: VecDeque::new(),
            history_limit,
            watchers: Vec::new(),
            unwatchable: HashSet::new(),
            list_failures: VecDeque::new(),
            watch_failures: VecDeque::new(),
        }
    }

    /// Record a change at the next revision and fan it out to watchers.
    fn commit(&mut self, change: Change) {
        let revision = self.revision;
        let event_key = change.key().clone();

        self.watchers.retain(|w| {
            if w.sender.is_stopped() {
                return false;
            }
            if !w.options.matches(&event_key) {
                return true;
            }
            let delivered = w.sender.try_send(change.to_event());
            if !delivered {
                warn!(
                    list_root = %w.options.default_path_root(),
                    "Watcher fell behind, closing its stream"
                );
            }
            delivered
        });

        self.history.push_back(HistoryEntry { revision, change });
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
    }

    fn write(&mut self, mut kvp: KVPair, mode: WriteMode) -> Result<KVPair, Error> {
        if kvp.value.is_none() {
            return Err(Error::InvalidResource {
                key: kvp.key.to_string(),
                reason: "a value is required".into(),
            });
        }

        let existing = self.items.get(&kvp.key).cloned();
        match (&existing, mode) {
            (Some(_), WriteMode::Create) => {
                return Err(Error::ResourceAlreadyExists {
                    key: kvp.key.to_string(),
                });
            }
            (None, WriteMode::Update) => {
                return Err(Error::ResourceDoesNotExist {
                    key: kvp.key.to_string(),
                });
            }
            (Some(current), WriteMode::Update) => {
                check_revision(&kvp.key, &kvp.revision, &current.revision)?;
            }
            _ => {}
        }

        self.revision += 1;
        kvp.revision = Revision::from(self.revision);
        self.items.insert(kvp.key.clone(), kvp.clone());
        self.commit(Change::Put {
            old: existing,
            new: kvp.clone(),
        });
        Ok(kvp)
    }

    fn remove(&mut self, key: &Key, revision: &Revision) -> Result<KVPair, Error> {
        let current = self
            .items
            .get(key)
            .ok_or_else(|| Error::ResourceDoesNotExist {
                key: key.to_string(),
            })?;
        check_revision(key, revision, &current.revision)?;

        let mut old = self.items.remove(key).ok_or_else(|| Error::ResourceDoesNotExist {
            key: key.to_string(),
        })?;
        self.revision += 1;
        old.revision = Revision::from(self.revision);
        self.commit(Change::Delete { old: old.clone() });
        Ok(old)
    }
}

#[derive(Debug, Clone, Copy)]
enum WriteMode {
    Create,
    Update,
    Apply,
}

fn check_revision(key: &Key, expected: &Revision, actual: &Revision) -> Result<(), Error> {
    if expected.is_empty() || expected == actual {
        return Ok(());
    }
    Err(Error::UpdateConflict {
        key: key.to_string(),
        reason: format!("expected revision {expected}, current revision is {actual}"),
    })
}

fn parse_revision(revision: &Revision) -> Result<Option<u64>, Error> {
    if revision.is_empty() {
        return Ok(None);
    }
    revision
        .as_str()
        .parse()
        .map(Some)
        .map_err(|_| Error::InvalidRevision {
            revision: revision.to_string(),
        })
}

// ── MemoryClient ────────────────────────────────────────────────────

/// In-memory datastore backend.
///
/// Cheaply cloneable; clones share the same state.
#[derive(Debug, Clone)]
pub struct MemoryClient {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryClient {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::with_history_limit(DEFAULT_HISTORY_LIMIT)
    }

    /// Create a datastore that retains at most `limit` changes for
    /// watch resumption.
    pub fn with_history_limit(limit: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::new(limit))),
        }
    }

    /// Current global revision.
    pub async fn revision(&self) -> Revision {
        Revision::from(self.state.lock().await.revision)
    }

    /// Number of entries currently stored.
    pub async fn len(&self) -> usize {
        self.state.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.items.is_empty()
    }

    /// Number of open watches.
    pub async fn watcher_count(&self) -> usize {
        let mut state = self.state.lock().await;
        state.watchers.retain(|w| !w.sender.is_stopped());
        state.watchers.len()
    }

    // ── Failure hooks ──────────────────────────────────────────────

    /// Enable or disable watch support for `kind`.
    pub async fn set_watch_supported(&self, kind: ResourceKind, supported: bool) {
        let mut state = self.state.lock().await;
        if supported {
            state.unwatchable.remove(&kind);
        } else {
            state.unwatchable.insert(kind);
        }
    }

    /// Make the next `list` call fail with `err`. Calls queue up.
    pub async fn inject_list_failure(&self, err: Error) {
        self.state.lock().await.list_failures.push_back(err);
    }

    /// Make the next `watch` call fail with `err`. Calls queue up.
    pub async fn inject_watch_failure(&self, err: Error) {
        self.state.lock().await.watch_failures.push_back(err);
    }

    /// Send a terminated error to every open watch, then close them.
    pub async fn terminate_watches(&self, closed_by_remote: bool) {
        let watchers = std::mem::take(&mut self.state.lock().await.watchers);
        debug!(count = watchers.len(), closed_by_remote, "Terminating watches");
        for w in watchers {
            w.sender.try_send(WatchEvent::Error(Error::WatchTerminated {
                closed_by_remote,
                reason: "terminated by datastore".into(),
            }));
        }
    }

    /// Close every open watch without an error event.
    pub async fn close_watches(&self) {
        self.state.lock().await.watchers.clear();
    }

    /// Drop the retained change history so earlier revisions can no
    /// longer be resumed from.
    pub async fn compact(&self) {
        self.state.lock().await.history.clear();
    }
}

#[async_trait]
impl Client for MemoryClient {
    async fn create(&self, kvp: KVPair) -> Result<KVPair, Error> {
        self.state.lock().await.write(kvp, WriteMode::Create)
    }

    async fn update(&self, kvp: KVPair) -> Result<KVPair, Error> {
        self.state.lock().await.write(kvp, WriteMode::Update)
    }

    async fn apply(&self, kvp: KVPair) -> Result<KVPair, Error> {
        self.state.lock().await.write(kvp, WriteMode::Apply)
    }

    async fn delete(&self, key: &Key, revision: &Revision) -> Result<KVPair, Error> {
        self.state.lock().await.remove(key, revision)
    }

    /// The in-memory store keeps no old versions, so the revision hint is
    /// ignored and the latest value is returned.
    async fn get(&self, key: &Key, _revision: &Revision) -> Result<KVPair, Error> {
        self.state
            .lock()
            .await
            .items
            .get(key)
            .cloned()
            .ok_or_else(|| Error::ResourceDoesNotExist {
                key: key.to_string(),
            })
    }

    async fn list(&self, options: &ListOptions, _revision: &Revision) -> Result<KVPairList, Error> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.list_failures.pop_front() {
            return Err(err);
        }

        let kvps = state
            .items
            .values()
            .filter(|kvp| options.matches(&kvp.key))
            .cloned()
            .collect();
        Ok(KVPairList {
            kvps,
            revision: Revision::from(state.revision),
        })
    }

    async fn watch(
        &self,
        options: &ListOptions,
        revision: &Revision,
    ) -> Result<WatchHandle, Error> {
        let mut state = self.state.lock().await;
        if let Some(err) = state.watch_failures.pop_front() {
            return Err(err);
        }
        if state.unwatchable.contains(&options.kind) {
            return Err(Error::OperationNotSupported {
                operation: "watch",
                identifier: options.default_path_root(),
            });
        }

        let replay: Vec<WatchEvent> = match parse_revision(revision)? {
            Some(from) if from < state.revision => {
                let oldest = state.history.front().map(|h| h.revision);
                if oldest.is_none_or(|oldest| oldest > from + 1) {
                    return Err(Error::RevisionCompacted {
                        revision: revision.to_string(),
                    });
                }
                state
                    .history
                    .iter()
                    .filter(|h| h.revision > from && options.matches(h.change.key()))
                    .map(|h| h.change.to_event())
                    .collect()
            }
            _ => Vec::new(),
        };

        let (sender, handle) = watch_channel(WATCH_CHANNEL_CAPACITY + replay.len());
        for event in replay {
            sender.try_send(event);
        }
        state.watchers.push(Watcher {
            options: options.clone(),
            sender,
        });
        Ok(handle)
    }

    async fn ensure_initialized(&self) -> Result<(), Error> {
        Ok(())
    }

    async fn clean(&self) -> Result<(), Error> {
        let mut state = self.state.lock().await;
        let keys: Vec<Key> = state.items.keys().cloned().collect();
        for key in keys {
            state.remove(&key, &Revision::default())?;
        }
        Ok(())
    }
}
