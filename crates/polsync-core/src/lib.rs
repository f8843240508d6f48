//! Watch-resync-cache engine for polsync.
//!
//! - **[`WatcherSyncer`]** — Runs one watcher cache per [`ResourceType`]
//!   and a dispatcher that merges their output into a single ordered
//!   [`SyncerCallbacks`] stream with an aggregate [`SyncStatus`].
//!
//! - **Watcher cache** — Per-type list/watch/resync loop. Keeps the
//!   revision last sent for every key and emits New/Updated/Deleted only
//!   on real transitions. Recovers from watch termination, backs off on
//!   list failures, polls types that cannot be watched, and reports
//!   `WaitForDatastore` when errors pile up.
//!
//! - **[`SyncerMirror`]** — Callback sink holding the mirrored state in a
//!   `DashMap`, with `watch`-channel snapshots for reactive readers.
//!
//! - **[`felix`]** — The resource set a Felix-style agent watches.

pub mod callbacks;
pub mod config;
pub mod error;
pub mod felix;
pub mod mirror;
pub mod processor;
pub mod syncer;
pub mod update;

mod watcher_cache;

// ── Primary re-exports ──────────────────────────────────────────────
pub use callbacks::{ChannelCallbacks, SyncerCallbacks, SyncerEvent};
pub use config::{DatastoreConfig, DatastoreType, EtcdConfig, KubeConfig, SyncerConfig};
pub use error::SyncError;
pub use mirror::{MirrorStream, SyncerMirror};
pub use processor::{ResourceType, UpdateProcessor};
pub use syncer::WatcherSyncer;
pub use update::{SyncStatus, SyncerMessage, Update, UpdateType};
