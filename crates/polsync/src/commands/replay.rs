//! `polsync replay`: seed an in-memory datastore and run the Felix syncer
//! over it.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use polsync_api::{Client, KVPair, MemoryClient};
use polsync_core::{
    ChannelCallbacks, SyncError, SyncStatus, SyncerCallbacks, SyncerEvent, SyncerMirror, Update,
    felix,
};

use crate::cli::{GlobalOpts, ReplayArgs};
use crate::config;
use crate::error::CliError;

/// Feeds the mirror and forwards every event to the command loop.
struct ReplayCallbacks {
    mirror: Arc<SyncerMirror>,
    events: ChannelCallbacks,
}

impl SyncerCallbacks for ReplayCallbacks {
    fn on_status_updated(&self, status: SyncStatus) {
        self.mirror.on_status_updated(status);
        self.events.on_status_updated(status);
    }

    fn on_updates(&self, updates: Vec<Update>) {
        self.mirror.on_updates(updates.clone());
        self.events.on_updates(updates);
    }

    fn on_error(&self, err: &SyncError) {
        self.mirror.on_error(err);
        self.events.on_error(err);
    }
}

pub async fn handle(args: ReplayArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let syncer_config = polsync_config::to_syncer_config(&cfg)?;
    let datastore = polsync_config::to_datastore_config(&cfg)?;

    let client = MemoryClient::new();
    for kvp in read_input(&args.file).await? {
        client.apply(kvp).await?;
    }
    info!(
        entries = client.len().await,
        revision = %client.revision().await,
        "Loaded replay input"
    );

    let mirror = Arc::new(SyncerMirror::new());
    let (events, mut rx) = ChannelCallbacks::channel();
    let callbacks = ReplayCallbacks {
        mirror: Arc::clone(&mirror),
        events,
    };

    let mut syncer =
        felix::new(Arc::new(client), &datastore, callbacks).with_config(syncer_config);
    syncer.start();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let result = loop {
        tokio::select! {
            event = rx.recv() => {
                let Some(event) = event else { break Ok(()) };
                match event {
                    SyncerEvent::Updates(updates) => {
                        if let Err(err) = print_updates(&updates) {
                            break Err(err);
                        }
                    }
                    SyncerEvent::Status(status) => {
                        eprintln!("status: {status}");
                        if status == SyncStatus::InSync && !args.follow {
                            break Ok(());
                        }
                    }
                    SyncerEvent::Error(err) => warn!(error = %err, "Syncer reported an error"),
                }
            }
            _ = &mut ctrl_c => {
                info!("Interrupted");
                break Ok(());
            }
        }
    };

    let mirrored = mirror.len();
    syncer.stop();
    syncer.wait().await;
    drop(syncer);

    // Teardown deletes are not part of the replayed state.
    while let Some(event) = rx.recv().await {
        debug!(?event, "Discarding teardown event");
    }

    if result.is_ok() {
        eprintln!("{mirrored} entries mirrored");
    }
    result
}

async fn read_input(path: &Path) -> Result<Vec<KVPair>, CliError> {
    let raw = tokio::fs::read(path)
        .await
        .map_err(|source| CliError::ReadInput {
            path: path.to_path_buf(),
            source,
        })?;
    serde_json::from_slice(&raw).map_err(|source| CliError::InvalidInput {
        path: path.to_path_buf(),
        source,
    })
}

/// One JSON object per line on stdout.
fn print_updates(updates: &[Update]) -> Result<(), CliError> {
    let mut out = std::io::stdout().lock();
    for update in updates {
        serde_json::to_writer(&mut out, update)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}
