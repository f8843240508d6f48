//! Resource set watched by a Felix-style policy agent.

use std::sync::Arc;

use polsync_api::{Client, ListOptions, ResourceKind};

use crate::callbacks::SyncerCallbacks;
use crate::config::DatastoreConfig;
use crate::processor::ResourceType;
use crate::syncer::WatcherSyncer;

/// Kinds every Felix syncer watches, in start order.
pub const FELIX_KINDS: [ResourceKind; 11] = [
    ResourceKind::ClusterInformation,
    ResourceKind::FelixConfiguration,
    ResourceKind::GlobalNetworkPolicy,
    ResourceKind::GlobalNetworkSet,
    ResourceKind::IpPool,
    ResourceKind::Node,
    ResourceKind::Profile,
    ResourceKind::WorkloadEndpoint,
    ResourceKind::NetworkPolicy,
    ResourceKind::NetworkSet,
    ResourceKind::HostEndpoint,
];

/// Resource types for a Felix syncer against the configured datastore.
///
/// IPAM blocks are included unless pod addresses come from node pod
/// CIDRs. Update processors are left for the caller to attach.
pub fn resource_types(cfg: &DatastoreConfig) -> Vec<ResourceType> {
    let mut types: Vec<ResourceType> = FELIX_KINDS
        .iter()
        .map(|kind| ResourceType::new(ListOptions::kind(*kind)))
        .collect();

    if cfg.uses_ipam_blocks() {
        types.push(ResourceType::new(ListOptions::kind(ResourceKind::IpamBlock)));
    }
    types
}

/// Build a syncer over the Felix resource set.
pub fn new(
    client: Arc<dyn Client>,
    cfg: &DatastoreConfig,
    callbacks: impl SyncerCallbacks + 'static,
) -> WatcherSyncer {
    WatcherSyncer::new(client, resource_types(cfg), callbacks)
}
