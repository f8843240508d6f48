//! Watch streams.
//!
//! A backend hands out a [`WatchHandle`] for every successful watch call
//! and keeps the paired [`WatchSender`] to push events into it. Dropping
//! or stopping the handle tells the backend to stop producing; dropping
//! every sender closes the stream, which consumers read as "terminated".

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Error;
use crate::model::KVPair;

/// One change observed on a watched key range.
#[derive(Debug)]
pub enum WatchEvent {
    Added(KVPair),
    Modified {
        old: Option<KVPair>,
        new: KVPair,
    },
    /// `old` is the last value before deletion. Backends must always
    /// supply it; a missing value is a driver bug.
    Deleted {
        old: Option<KVPair>,
    },
    Error(Error),
}

/// Create a connected sender/handle pair with room for `capacity`
/// buffered events.
pub fn watch_channel(capacity: usize) -> (WatchSender, WatchHandle) {
    let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
    let stop = CancellationToken::new();
    (
        WatchSender {
            events: events_tx,
            stop: stop.clone(),
        },
        WatchHandle {
            events: events_rx,
            stop,
        },
    )
}

// ── WatchHandle ─────────────────────────────────────────────────────

/// Consumer side of a watch.
pub struct WatchHandle {
    events: mpsc::Receiver<WatchEvent>,
    stop: CancellationToken,
}

impl WatchHandle {
    /// Wait for the next event. `None` means the stream has terminated.
    pub async fn next(&mut self) -> Option<WatchEvent> {
        if self.stop.is_cancelled() {
            return None;
        }
        self.events.recv().await
    }

    /// Stop the watch. Further calls to [`next`](Self::next) return `None`.
    pub fn stop(&mut self) {
        self.stop.cancel();
        self.events.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled()
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.stop.cancel();
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchHandle")
            .field("stopped", &self.stop.is_cancelled())
            .finish_non_exhaustive()
    }
}

// ── WatchSender ─────────────────────────────────────────────────────

/// Producer side of a watch, held by the backend.
#[derive(Clone, Debug)]
pub struct WatchSender {
    events: mpsc::Sender<WatchEvent>,
    stop: CancellationToken,
}

impl WatchSender {
    /// Deliver an event, waiting for buffer space. Returns `false` once
    /// the consumer has stopped or dropped the handle.
    pub async fn send(&self, event: WatchEvent) -> bool {
        tokio::select! {
            biased;
            () = self.stop.cancelled() => false,
            res = self.events.send(event) => res.is_ok(),
        }
    }

    /// Deliver an event without waiting. Returns `false` if the buffer is
    /// full or the consumer is gone.
    pub fn try_send(&self, event: WatchEvent) -> bool {
        !self.is_stopped() && self.events.try_send(event).is_ok()
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_cancelled() || self.events.is_closed()
    }
}
