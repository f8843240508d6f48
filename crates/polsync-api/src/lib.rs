//! Datastore contract consumed by the polsync watcher syncer.
//!
//! - **[`Client`]** — Async backend trait: `list` and `watch` drive the
//!   syncer, the single-object CRUD operations round out the surface.
//!
//! - **Model** ([`model`]) — [`Key`], [`Revision`], [`KVPair`] and
//!   [`ListOptions`]. Values are opaque JSON; a `None` value marks a
//!   deletion.
//!
//! - **Watch streams** ([`watch`]) — [`WatchHandle`] / [`WatchSender`]
//!   pairs carrying [`WatchEvent`]s from a backend to its consumer.
//!
//! - **[`MemoryClient`]** — Complete in-process backend with revision
//!   history and failure hooks.

pub mod client;
pub mod error;
pub mod memory;
pub mod model;
pub mod watch;

// ── Primary re-exports ──────────────────────────────────────────────
pub use client::Client;
pub use error::Error;
pub use memory::MemoryClient;
pub use model::{KEY_ROOT, KVPair, KVPairList, Key, ListOptions, ResourceKind, Revision};
pub use watch::{WatchEvent, WatchHandle, WatchSender, watch_channel};
