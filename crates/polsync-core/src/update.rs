// ── Syncer output types ──
//
// What caches send to the dispatcher and what the dispatcher hands to
// downstream callbacks.

use polsync_api::{KVPair, Key, Revision};
use serde::Serialize;
use strum::Display;

use crate::error::SyncError;

/// Kind of transition observed for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    /// The key was not known downstream.
    New,
    /// The key was known downstream at a different revision.
    Updated,
    /// The key was known downstream and is gone.
    Deleted,
}

/// One change delivered downstream.
///
/// A `Deleted` update always carries `kvp.value == None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Update {
    pub update_type: UpdateType,
    #[serde(flatten)]
    pub kvp: KVPair,
}

impl Update {
    pub fn new(kvp: KVPair) -> Self {
        Self {
            update_type: UpdateType::New,
            kvp,
        }
    }

    pub fn updated(kvp: KVPair) -> Self {
        Self {
            update_type: UpdateType::Updated,
            kvp,
        }
    }

    /// Deletion of `key`, tagged with the revision it was deleted at
    /// (empty when unknown).
    pub fn deleted(key: Key, revision: Revision) -> Self {
        Self {
            update_type: UpdateType::Deleted,
            kvp: KVPair {
                key,
                value: None,
                revision,
            },
        }
    }
}

/// Synchronization status, per cache and in aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Display)]
pub enum SyncStatus {
    /// Not connected, or connection lost after having been in sync.
    #[default]
    WaitForDatastore,
    /// Initial data is being loaded.
    Resyncing,
    /// Every watched resource type has completed a full list.
    InSync,
}

/// Message on the channel shared by the caches and the dispatcher.
#[derive(Debug, PartialEq)]
pub enum SyncerMessage {
    Updates(Vec<Update>),
    Status(SyncStatus),
    Failure(SyncError),
}
