#![allow(clippy::unwrap_used)]

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::mpsc;

use polsync_api::{Client, Error, KVPair, Key, ListOptions, MemoryClient, ResourceKind, Revision};
use polsync_core::{
    ChannelCallbacks, DatastoreConfig, ResourceType, SyncStatus, SyncerEvent, SyncerMirror,
    UpdateType, WatcherSyncer, felix,
};

// ── Helpers ─────────────────────────────────────────────────────────

fn kvp(kind: ResourceKind, ns: Option<&str>, name: &str, value: serde_json::Value) -> KVPair {
    KVPair::new(Key::resource(kind, ns, name), value, Revision::default())
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<SyncerEvent>) -> SyncerEvent {
    tokio::time::timeout(Duration::from_secs(120), rx.recv())
        .await
        .expect("timed out waiting for syncer event")
        .expect("callback channel closed")
}

/// Read events until `status` is reported, returning everything before it.
async fn events_until_status(
    rx: &mut mpsc::UnboundedReceiver<SyncerEvent>,
    status: SyncStatus,
) -> Vec<SyncerEvent> {
    let mut seen = Vec::new();
    loop {
        match next_event(rx).await {
            SyncerEvent::Status(s) if s == status => return seen,
            other => seen.push(other),
        }
    }
}

/// Read update batches until `count` updates have arrived.
async fn next_updates(
    rx: &mut mpsc::UnboundedReceiver<SyncerEvent>,
    count: usize,
) -> Vec<(UpdateType, String)> {
    let mut out = Vec::new();
    while out.len() < count {
        match next_event(rx).await {
            SyncerEvent::Updates(batch) => out.extend(
                batch
                    .into_iter()
                    .map(|u| (u.update_type, u.kvp.key.to_string())),
            ),
            other => panic!("expected updates, got {other:?}"),
        }
    }
    out
}

fn single_type(kind: ResourceKind) -> Vec<ResourceType> {
    vec![ResourceType::new(ListOptions::kind(kind))]
}

// ── Status lifecycle ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn status_reaches_in_sync_after_every_cache() {
    let client = MemoryClient::new();
    client
        .apply(kvp(ResourceKind::Node, None, "node-1", json!({ "asn": 64512 })))
        .await
        .unwrap();

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = felix::new(Arc::new(client), &DatastoreConfig::default(), cb);
    syncer.start();

    assert_eq!(
        next_event(&mut rx).await,
        SyncerEvent::Status(SyncStatus::WaitForDatastore)
    );
    assert_eq!(
        next_event(&mut rx).await,
        SyncerEvent::Status(SyncStatus::Resyncing)
    );

    let before = events_until_status(&mut rx, SyncStatus::InSync).await;
    let news: Vec<_> = before
        .iter()
        .filter_map(|e| match e {
            SyncerEvent::Updates(u) => Some(u.len()),
            _ => None,
        })
        .collect();
    assert_eq!(news, vec![1]);
    assert!(
        before
            .iter()
            .all(|e| !matches!(e, SyncerEvent::Status(_))),
        "no intermediate status before InSync: {before:?}"
    );

    syncer.stop();
    syncer.wait().await;
}

// ── Convergence ─────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn mirror_converges_to_datastore_and_empties_on_stop() {
    let client = Arc::new(MemoryClient::new());
    client
        .apply(kvp(ResourceKind::IpPool, None, "default", json!({ "cidr": "10.0.0.0/16" })))
        .await
        .unwrap();
    client
        .apply(kvp(
            ResourceKind::NetworkPolicy,
            Some("prod"),
            "deny-all",
            json!({ "order": 1 }),
        ))
        .await
        .unwrap();

    let mirror = Arc::new(SyncerMirror::new());
    let mut syncer = felix::new(client.clone(), &DatastoreConfig::default(), Arc::clone(&mirror));
    syncer.start();
    mirror.wait_for_status(SyncStatus::InSync).await;
    assert_eq!(mirror.len(), 2);

    // Changes after the initial sync flow through the watches.
    let wep = kvp(
        ResourceKind::WorkloadEndpoint,
        Some("prod"),
        "pod-a",
        json!({ "ip": "10.0.1.5" }),
    );
    client.apply(wep.clone()).await.unwrap();
    client
        .apply(kvp(ResourceKind::IpPool, None, "default", json!({ "cidr": "10.1.0.0/16" })))
        .await
        .unwrap();
    client
        .delete(
            &Key::resource(ResourceKind::NetworkPolicy, Some("prod"), "deny-all"),
            &Revision::default(),
        )
        .await
        .unwrap();

    let mut sub = mirror.subscribe();
    while mirror.len() != 2 || !mirror.contains(&wep.key) {
        sub.changed().await.unwrap();
    }
    let pool = mirror
        .get(&Key::resource(ResourceKind::IpPool, None, "default"))
        .unwrap();
    while mirror
        .get(&Key::resource(ResourceKind::IpPool, None, "default"))
        .unwrap()
        .value
        != Some(json!({ "cidr": "10.1.0.0/16" }))
    {
        sub.changed().await.unwrap();
    }
    assert_eq!(pool.key.as_str(), "/polsync/v3/ippools/default");

    syncer.stop();
    syncer.wait().await;
    assert!(mirror.is_empty());
    assert_eq!(mirror.status(), SyncStatus::InSync);
}

#[tokio::test(start_paused = true)]
async fn replaying_identical_state_emits_nothing_new() {
    let client = Arc::new(MemoryClient::new());
    client
        .apply(kvp(ResourceKind::Profile, None, "kns.prod", json!({})))
        .await
        .unwrap();

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = WatcherSyncer::new(client.clone(), single_type(ResourceKind::Profile), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    // A locally invalidated watch forces a full relist of unchanged data.
    client.terminate_watches(false).await;
    assert!(matches!(next_event(&mut rx).await, SyncerEvent::Error(_)));

    // The next change is the first update after the relist.
    client
        .apply(kvp(ResourceKind::Profile, None, "kns.dev", json!({})))
        .await
        .unwrap();
    assert_eq!(
        next_updates(&mut rx, 1).await,
        vec![(UpdateType::New, "/polsync/v3/profiles/kns.dev".to_owned())]
    );

    syncer.stop();
    syncer.wait().await;
}

// ── Watch recovery ──────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn remote_close_resumes_and_replays_missed_delete() {
    let client = Arc::new(MemoryClient::new());
    for name in ["a", "b"] {
        client
            .apply(kvp(ResourceKind::HostEndpoint, None, name, json!({})))
            .await
            .unwrap();
    }

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer =
        WatcherSyncer::new(client.clone(), single_type(ResourceKind::HostEndpoint), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    // The stream ends without an error; `b` is deleted while no watch is
    // open and is picked up when the watch resumes.
    client.close_watches().await;
    client
        .delete(
            &Key::resource(ResourceKind::HostEndpoint, None, "b"),
            &Revision::default(),
        )
        .await
        .unwrap();
    assert_eq!(
        next_updates(&mut rx, 1).await,
        vec![(
            UpdateType::Deleted,
            "/polsync/v3/hostendpoints/b".to_owned()
        )]
    );

    syncer.stop();
    syncer.wait().await;
}

// ── Resync deletion detection ───────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn compacted_resume_falls_back_to_full_resync() {
    let client = Arc::new(MemoryClient::with_history_limit(1));
    for name in ["a", "b"] {
        client
            .apply(kvp(ResourceKind::Node, None, name, json!({})))
            .await
            .unwrap();
    }

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = WatcherSyncer::new(client.clone(), single_type(ResourceKind::Node), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    // While the watch is down, `b` goes away and `c` appears; the history
    // no longer covers the cache's resume revision.
    client.close_watches().await;
    client
        .delete(&Key::resource(ResourceKind::Node, None, "b"), &Revision::default())
        .await
        .unwrap();
    client
        .apply(kvp(ResourceKind::Node, None, "c", json!({})))
        .await
        .unwrap();
    client.compact().await;

    let mut updates = Vec::new();
    loop {
        match next_event(&mut rx).await {
            SyncerEvent::Updates(batch) => {
                updates.extend(batch.into_iter().map(|u| (u.update_type, u.kvp.key.to_string())));
                if updates.len() == 2 {
                    break;
                }
            }
            SyncerEvent::Error(_) => {}
            SyncerEvent::Status(s) => panic!("unexpected status {s}"),
        }
    }
    updates.sort_by(|a, b| a.1.cmp(&b.1));
    assert_eq!(
        updates,
        vec![
            (UpdateType::Deleted, "/polsync/v3/nodes/b".to_owned()),
            (UpdateType::New, "/polsync/v3/nodes/c".to_owned()),
        ]
    );

    syncer.stop();
    syncer.wait().await;
}

// ── Error storms ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn error_storm_regresses_and_recovers_status() {
    let client = Arc::new(MemoryClient::new());
    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = WatcherSyncer::new(client.clone(), single_type(ResourceKind::Node), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    for _ in 0..15 {
        client
            .inject_list_failure(Error::Unavailable {
                message: "connection refused".into(),
            })
            .await;
    }
    client.terminate_watches(false).await;

    // One forwarded watch error, then exactly one regression.
    let before = events_until_status(&mut rx, SyncStatus::WaitForDatastore).await;
    assert_eq!(before.len(), 1);
    assert!(matches!(before[0], SyncerEvent::Error(_)));

    // Failed relists are not forwarded and nothing changed, so the
    // status goes straight back to InSync.
    let recovery = events_until_status(&mut rx, SyncStatus::InSync).await;
    assert!(recovery.is_empty(), "{recovery:?}");

    syncer.stop();
    syncer.wait().await;
}

// ── Polling fallback ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn unwatchable_kind_is_polled() {
    let client = Arc::new(MemoryClient::new());
    client.set_watch_supported(ResourceKind::IpamBlock, false).await;

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = WatcherSyncer::new(client.clone(), single_type(ResourceKind::IpamBlock), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    let started = tokio::time::Instant::now();
    client
        .apply(kvp(
            ResourceKind::IpamBlock,
            None,
            "10-0-0-0-26",
            json!({ "cidr": "10.0.0.0/26" }),
        ))
        .await
        .unwrap();

    assert_eq!(
        next_updates(&mut rx, 1).await,
        vec![(UpdateType::New, "/polsync/v3/ipamblocks/10-0-0-0-26".to_owned())]
    );
    assert!(started.elapsed() <= Duration::from_secs(5));

    syncer.stop();
    syncer.wait().await;
}

// ── Teardown ────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_emits_terminal_deletes_per_type() {
    let client = Arc::new(MemoryClient::new());
    client
        .apply(kvp(ResourceKind::Node, None, "n2", json!({})))
        .await
        .unwrap();
    client
        .apply(kvp(ResourceKind::Node, None, "n1", json!({})))
        .await
        .unwrap();

    let (cb, mut rx) = ChannelCallbacks::channel();
    let mut syncer = WatcherSyncer::new(client.clone(), single_type(ResourceKind::Node), cb);
    syncer.start();
    events_until_status(&mut rx, SyncStatus::InSync).await;

    syncer.stop();
    syncer.wait().await;

    match next_event(&mut rx).await {
        SyncerEvent::Updates(batch) => {
            let keys: Vec<_> = batch.iter().map(|u| u.kvp.key.to_string()).collect();
            assert_eq!(keys, vec!["/polsync/v3/nodes/n1", "/polsync/v3/nodes/n2"]);
            assert!(batch.iter().all(|u| u.update_type == UpdateType::Deleted));
            assert!(batch.iter().all(|u| u.kvp.value.is_none()));
        }
        other => panic!("expected terminal deletes, got {other:?}"),
    }
    assert_eq!(client.watcher_count().await, 0);
}
