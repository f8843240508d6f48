// ── Backend client contract ──
//
// Every datastore driver (distributed KV store, orchestrator API
// server, in-memory) implements this trait. The syncer only relies on
// `list` and `watch`; the single-object operations complete the CRUD
// surface used by the rest of the control plane.

use async_trait::async_trait;

use crate::error::Error;
use crate::model::{KVPair, KVPairList, Key, ListOptions, Revision};
use crate::watch::WatchHandle;

/// A datastore backend.
#[async_trait]
pub trait Client: Send + Sync {
    /// Create a new entry. Fails with `ResourceAlreadyExists` if the key
    /// is present.
    async fn create(&self, kvp: KVPair) -> Result<KVPair, Error>;

    /// Replace an existing entry. A non-empty `kvp.revision` must match
    /// the stored revision.
    async fn update(&self, kvp: KVPair) -> Result<KVPair, Error>;

    /// Create or replace an entry unconditionally.
    async fn apply(&self, kvp: KVPair) -> Result<KVPair, Error>;

    /// Remove an entry, returning its last value. A non-empty `revision`
    /// must match the stored revision.
    async fn delete(&self, key: &Key, revision: &Revision) -> Result<KVPair, Error>;

    async fn get(&self, key: &Key, revision: &Revision) -> Result<KVPair, Error>;

    /// List every entry selected by `options`. The returned revision is
    /// the point to resume watching from.
    async fn list(&self, options: &ListOptions, revision: &Revision) -> Result<KVPairList, Error>;

    /// Watch entries selected by `options` for changes after `revision`.
    /// An empty revision watches from the current state onwards.
    ///
    /// Backends that cannot watch a resource type return
    /// [`Error::OperationNotSupported`].
    async fn watch(&self, options: &ListOptions, revision: &Revision)
    -> Result<WatchHandle, Error>;

    /// Make sure any datastore-side structure the driver needs exists.
    async fn ensure_initialized(&self) -> Result<(), Error>;

    /// Remove every entry managed by this driver.
    async fn clean(&self) -> Result<(), Error>;
}
