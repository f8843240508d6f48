// ── Update processors and resource types ──
//
// A resource type is the unit a watcher cache is built for: what to
// list and watch, plus an optional processor that turns each backend
// pair into the pairs downstream consumers expect.

use std::fmt;

use polsync_api::{KVPair, ListOptions};

/// Converts backend pairs into downstream pairs.
///
/// A processor is owned by exactly one cache task and is only ever
/// called from it.
pub trait UpdateProcessor: Send {
    /// Called at the start of every full resync, before the list.
    fn on_syncer_starting(&mut self);

    /// Convert one pair. Returning an empty vector drops the pair.
    ///
    /// The input may be a deletion (`value == None`); a processor must
    /// map it to deletions of every pair it previously produced for the
    /// same key.
    fn process(&mut self, kvp: &KVPair) -> Result<Vec<KVPair>, polsync_api::Error>;
}

/// One resource type handled by the syncer.
pub struct ResourceType {
    pub list_options: ListOptions,
    pub update_processor: Option<Box<dyn UpdateProcessor>>,
}

impl ResourceType {
    /// A resource type whose pairs are passed through unchanged.
    pub fn new(list_options: ListOptions) -> Self {
        Self {
            list_options,
            update_processor: None,
        }
    }

    pub fn with_processor(mut self, processor: impl UpdateProcessor + 'static) -> Self {
        self.update_processor = Some(Box::new(processor));
        self
    }
}

impl fmt::Debug for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceType")
            .field("list_options", &self.list_options)
            .field("has_processor", &self.update_processor.is_some())
            .finish()
    }
}
