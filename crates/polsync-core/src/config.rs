// ── Runtime syncer configuration ──
//
// These types describe how the syncer paces itself and which datastore
// it talks to. They never touch disk: `polsync-config` builds them from
// files and the environment.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use url::Url;

/// Pacing and buffering for the watcher syncer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncerConfig {
    /// Sleep between failed list attempts.
    pub list_retry_interval: Duration,
    /// Sleep between relists for resource types the backend cannot watch.
    pub watch_poll_interval: Duration,
    /// Consecutive errors tolerated before a synced cache reports
    /// `WaitForDatastore`.
    pub error_threshold: u32,
    /// Capacity of the channel shared by every cache and the dispatcher.
    pub results_buffer: usize,
}

impl Default for SyncerConfig {
    fn default() -> Self {
        Self {
            list_retry_interval: Duration::from_secs(1),
            watch_poll_interval: Duration::from_secs(5),
            error_threshold: 15,
            results_buffer: 2000,
        }
    }
}

/// Which kind of backing store holds the resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DatastoreType {
    #[default]
    EtcdV3,
    Kubernetes,
}

/// Connection settings for the distributed KV store.
#[derive(Debug, Clone, Default)]
pub struct EtcdConfig {
    pub endpoints: Vec<Url>,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    /// CA bundle used to verify the endpoints.
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

/// Connection settings for the orchestrator API server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeConfig {
    pub kubeconfig: Option<PathBuf>,
    /// Allocate pod addresses from node pod CIDRs instead of IPAM blocks.
    pub k8s_use_pod_cidr: bool,
}

/// Datastore selection plus per-backend connection settings.
#[derive(Debug, Clone, Default)]
pub struct DatastoreConfig {
    pub datastore_type: DatastoreType,
    pub etcd: EtcdConfig,
    pub kube: KubeConfig,
}

impl DatastoreConfig {
    /// Whether IPAM blocks are managed by the datastore rather than
    /// derived from node pod CIDRs.
    pub fn uses_ipam_blocks(&self) -> bool {
        !self.kube.k8s_use_pod_cidr
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn syncer_defaults() {
        let cfg = SyncerConfig::default();
        assert_eq!(cfg.list_retry_interval, Duration::from_secs(1));
        assert_eq!(cfg.watch_poll_interval, Duration::from_secs(5));
        assert_eq!(cfg.error_threshold, 15);
        assert_eq!(cfg.results_buffer, 2000);
    }

    #[test]
    fn datastore_type_parses_lowercase() {
        assert_eq!(DatastoreType::from_str("etcdv3").unwrap(), DatastoreType::EtcdV3);
        assert_eq!(
            DatastoreType::from_str("kubernetes").unwrap(),
            DatastoreType::Kubernetes
        );
        assert_eq!(DatastoreType::Kubernetes.to_string(), "kubernetes");
    }

    #[test]
    fn pod_cidr_mode_disables_ipam_blocks_for_any_datastore() {
        let mut cfg = DatastoreConfig::default();
        assert!(cfg.uses_ipam_blocks());

        cfg.kube.k8s_use_pod_cidr = true;
        assert!(!cfg.uses_ipam_blocks());

        cfg.datastore_type = DatastoreType::Kubernetes;
        assert!(!cfg.uses_ipam_blocks());
    }
}
