//! File and environment configuration for polsync.
//!
//! TOML config, credential resolution (env + keyring + plaintext), and
//! translation to the runtime `polsync_core::SyncerConfig` and
//! `polsync_core::DatastoreConfig`. The core crate never reads files;
//! binaries go through this crate.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use polsync_core::{DatastoreConfig, DatastoreType, EtcdConfig, KubeConfig, SyncerConfig};

const KEYRING_SERVICE: &str = "polsync";
const ENV_PREFIX: &str = "POLSYNC_";
const REDACTED: &str = "********";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no password found for etcd user '{username}'")]
    NoCredentials { username: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub syncer: SyncerSection,

    #[serde(default)]
    pub datastore: DatastoreSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SyncerSection {
    #[serde(default = "default_list_retry_interval_ms")]
    pub list_retry_interval_ms: u64,

    #[serde(default = "default_watch_poll_interval_ms")]
    pub watch_poll_interval_ms: u64,

    #[serde(default = "default_error_threshold")]
    pub error_threshold: u32,

    #[serde(default = "default_results_buffer")]
    pub results_buffer: usize,
}

impl Default for SyncerSection {
    fn default() -> Self {
        Self {
            list_retry_interval_ms: default_list_retry_interval_ms(),
            watch_poll_interval_ms: default_watch_poll_interval_ms(),
            error_threshold: default_error_threshold(),
            results_buffer: default_results_buffer(),
        }
    }
}

fn default_list_retry_interval_ms() -> u64 {
    1000
}
fn default_watch_poll_interval_ms() -> u64 {
    5000
}
fn default_error_threshold() -> u32 {
    15
}
fn default_results_buffer() -> usize {
    2000
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct DatastoreSection {
    /// `etcdv3` or `kubernetes`.
    #[serde(rename = "type", default)]
    pub datastore_type: DatastoreType,

    #[serde(default)]
    pub etcd: EtcdSection,

    #[serde(default)]
    pub kubernetes: KubeSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct EtcdSection {
    #[serde(default = "default_etcd_endpoints")]
    pub endpoints: Vec<String>,

    pub username: Option<String>,

    /// Plaintext password. Keyring or `password_env` take precedence.
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl Default for EtcdSection {
    fn default() -> Self {
        Self {
            endpoints: default_etcd_endpoints(),
            username: None,
            password: None,
            password_env: None,
            ca_cert: None,
            cert: None,
            key: None,
        }
    }
}

fn default_etcd_endpoints() -> Vec<String> {
    vec!["http://127.0.0.1:2379".into()]
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct KubeSection {
    pub kubeconfig: Option<PathBuf>,

    /// Use node pod CIDRs instead of IPAM blocks.
    #[serde(default)]
    pub k8s_use_pod_cidr: bool,
}

impl Config {
    /// Copy of the config with plaintext secrets masked, for display.
    pub fn redacted(&self) -> Self {
        let mut cfg = self.clone();
        if cfg.datastore.etcd.password.is_some() {
            cfg.datastore.etcd.password = Some(REDACTED.into());
        }
        cfg
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "polsync", "polsync").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("polsync");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load the Config from `path` + environment.
///
/// Environment variables use the `POLSYNC_` prefix with `__` between
/// nesting levels, e.g. `POLSYNC_SYNCER__ERROR_THRESHOLD=20`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed(ENV_PREFIX).split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if loading fails.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

/// Resolve the etcd password from the credential chain: the env var
/// named by `password_env`, then the system keyring, then plaintext.
///
/// Returns `None` when no username is configured.
pub fn resolve_etcd_password(etcd: &EtcdSection) -> Result<Option<SecretString>, ConfigError> {
    resolve_password_with(etcd, |name| std::env::var(name).ok(), keyring_password)
}

fn keyring_password(username: &str) -> Option<String> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("etcd/{username}"))
        .ok()?
        .get_password()
        .ok()
}

fn resolve_password_with(
    etcd: &EtcdSection,
    env: impl Fn(&str) -> Option<String>,
    keyring: impl Fn(&str) -> Option<String>,
) -> Result<Option<SecretString>, ConfigError> {
    let Some(username) = etcd.username.as_deref() else {
        return Ok(None);
    };

    // 1. Env var
    if let Some(pw) = etcd.password_env.as_deref().and_then(&env) {
        return Ok(Some(SecretString::from(pw)));
    }

    // 2. Keyring
    if let Some(pw) = keyring(username) {
        return Ok(Some(SecretString::from(pw)));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = etcd.password {
        return Ok(Some(SecretString::from(pw.clone())));
    }

    Err(ConfigError::NoCredentials {
        username: username.into(),
    })
}

// ── Translation to runtime config ───────────────────────────────────

/// Build the syncer's runtime pacing config.
pub fn to_syncer_config(cfg: &Config) -> Result<SyncerConfig, ConfigError> {
    let s = &cfg.syncer;
    if s.list_retry_interval_ms == 0 {
        return Err(validation("syncer.list_retry_interval_ms", "must be greater than 0"));
    }
    if s.watch_poll_interval_ms == 0 {
        return Err(validation("syncer.watch_poll_interval_ms", "must be greater than 0"));
    }
    if s.results_buffer == 0 {
        return Err(validation("syncer.results_buffer", "must be greater than 0"));
    }

    Ok(SyncerConfig {
        list_retry_interval: Duration::from_millis(s.list_retry_interval_ms),
        watch_poll_interval: Duration::from_millis(s.watch_poll_interval_ms),
        error_threshold: s.error_threshold,
        results_buffer: s.results_buffer,
    })
}

/// Build the datastore connection config, resolving credentials.
pub fn to_datastore_config(cfg: &Config) -> Result<DatastoreConfig, ConfigError> {
    let ds = &cfg.datastore;

    let endpoints = ds
        .etcd
        .endpoints
        .iter()
        .map(|e| {
            e.parse::<Url>().map_err(|err| ConfigError::Validation {
                field: "datastore.etcd.endpoints".into(),
                reason: format!("invalid URL '{e}': {err}"),
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    if ds.datastore_type == DatastoreType::EtcdV3 && endpoints.is_empty() {
        return Err(validation(
            "datastore.etcd.endpoints",
            "at least one endpoint is required for the etcdv3 datastore",
        ));
    }

    let password = match ds.datastore_type {
        DatastoreType::EtcdV3 => resolve_etcd_password(&ds.etcd)?,
        DatastoreType::Kubernetes => None,
    };

    Ok(DatastoreConfig {
        datastore_type: ds.datastore_type,
        etcd: EtcdConfig {
            endpoints,
            username: ds.etcd.username.clone(),
            password,
            ca_cert: ds.etcd.ca_cert.clone(),
            cert: ds.etcd.cert.clone(),
            key: ds.etcd.key.clone(),
        },
        kube: KubeConfig {
            kubeconfig: ds.kubernetes.kubeconfig.clone(),
            k8s_use_pod_cidr: ds.kubernetes.k8s_use_pod_cidr,
        },
    })
}

fn validation(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}
