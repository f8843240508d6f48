// ── Datastore model ──
//
// Keys, revisions, and key/value pairs exchanged between a backend
// and the syncer. Values are opaque JSON documents; a `None` value is
// the deletion sentinel.

use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// Root of every key path produced by [`Key::resource`].
pub const KEY_ROOT: &str = "/polsync/v3";

// ── ResourceKind ────────────────────────────────────────────────────

/// Resource types a policy agent watches.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum ResourceKind {
    ClusterInformation,
    FelixConfiguration,
    GlobalNetworkPolicy,
    GlobalNetworkSet,
    #[strum(serialize = "IPPool")]
    #[serde(rename = "IPPool")]
    IpPool,
    Node,
    Profile,
    WorkloadEndpoint,
    NetworkPolicy,
    NetworkSet,
    HostEndpoint,
    #[strum(serialize = "BGPConfiguration")]
    #[serde(rename = "BGPConfiguration")]
    BgpConfiguration,
    #[strum(serialize = "BGPPeer")]
    #[serde(rename = "BGPPeer")]
    BgpPeer,
    #[strum(serialize = "IPAMBlock")]
    #[serde(rename = "IPAMBlock")]
    IpamBlock,
}

impl ResourceKind {
    /// Path segment used for keys of this kind.
    pub fn path_segment(self) -> &'static str {
        match self {
            Self::ClusterInformation => "clusterinformations",
            Self::FelixConfiguration => "felixconfigurations",
            Self::GlobalNetworkPolicy => "globalnetworkpolicies",
            Self::GlobalNetworkSet => "globalnetworksets",
            Self::IpPool => "ippools",
            Self::Node => "nodes",
            Self::Profile => "profiles",
            Self::WorkloadEndpoint => "workloadendpoints",
            Self::NetworkPolicy => "networkpolicies",
            Self::NetworkSet => "networksets",
            Self::HostEndpoint => "hostendpoints",
            Self::BgpConfiguration => "bgpconfigurations",
            Self::BgpPeer => "bgppeers",
            Self::IpamBlock => "ipamblocks",
        }
    }

    /// Whether instances of this kind live inside a namespace.
    pub fn is_namespaced(self) -> bool {
        matches!(
            self,
            Self::WorkloadEndpoint | Self::NetworkPolicy | Self::NetworkSet
        )
    }
}

// ── Key ─────────────────────────────────────────────────────────────

/// Opaque identifier for one resource instance.
///
/// Equality and ordering follow the string form, so two keys are the
/// same resource exactly when their paths are identical.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    /// Canonical key for a named resource of `kind`.
    ///
    /// The namespace is only used for namespaced kinds.
    pub fn resource(kind: ResourceKind, namespace: Option<&str>, name: &str) -> Self {
        match namespace {
            Some(ns) if kind.is_namespaced() => {
                Self(format!("{KEY_ROOT}/{}/{ns}/{name}", kind.path_segment()))
            }
            _ => Self(format!("{KEY_ROOT}/{}/{name}", kind.path_segment())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Revision ────────────────────────────────────────────────────────

/// Backend change token. The empty revision means "none known".
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    pub fn new(rev: impl Into<String>) -> Self {
        Self(rev.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Forget the revision, forcing the next resync to be a full one.
    pub fn clear(&mut self) {
        self.0.clear();
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<u64> for Revision {
    fn from(rev: u64) -> Self {
        Self(rev.to_string())
    }
}

// ── KVPair ──────────────────────────────────────────────────────────

/// A key, its value at some point in time, and the revision of that value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KVPair {
    pub key: Key,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
    #[serde(default)]
    pub revision: Revision,
}

impl KVPair {
    pub fn new(key: impl Into<Key>, value: serde_json::Value, revision: impl Into<Revision>) -> Self {
        Self {
            key: key.into(),
            value: Some(value),
            revision: revision.into(),
        }
    }

    /// A pair with no value, i.e. a deletion of `key`.
    pub fn deleted(key: Key) -> Self {
        Self {
            key,
            value: None,
            revision: Revision::default(),
        }
    }

    pub fn is_deleted(&self) -> bool {
        self.value.is_none()
    }
}

/// Result of a list call: matching pairs plus the revision to resume
/// watching from.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct KVPairList {
    pub kvps: Vec<KVPair>,
    pub revision: Revision,
}

// ── ListOptions ─────────────────────────────────────────────────────

/// Query descriptor selecting keys of one kind, optionally narrowed by
/// namespace and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ListOptions {
    pub kind: ResourceKind,
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

impl ListOptions {
    /// Select every resource of `kind`.
    pub fn kind(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
            name: None,
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// True when these options pin down a single key.
    fn is_exact(&self) -> bool {
        self.name.is_some() && (self.namespace.is_some() || !self.kind.is_namespaced())
    }

    /// The longest key prefix shared by every matching key.
    ///
    /// For an exact selection this is the key itself.
    pub fn default_path_root(&self) -> String {
        if let (true, Some(name)) = (self.is_exact(), self.name.as_deref()) {
            return Key::resource(self.kind, self.namespace.as_deref(), name).0;
        }
        match self.namespace.as_deref() {
            Some(ns) if self.kind.is_namespaced() => {
                format!("{KEY_ROOT}/{}/{ns}/", self.kind.path_segment())
            }
            _ => format!("{KEY_ROOT}/{}/", self.kind.path_segment()),
        }
    }

    /// Whether `key` is selected by these options.
    pub fn matches(&self, key: &Key) -> bool {
        let root = self.default_path_root();
        if self.is_exact() {
            return key.as_str() == root;
        }
        let Some(rest) = key.as_str().strip_prefix(root.as_str()) else {
            return false;
        };
        match self.name.as_deref() {
            Some(name) => rest.rsplit('/').next() == Some(name),
            None => !rest.is_empty(),
        }
    }
}
