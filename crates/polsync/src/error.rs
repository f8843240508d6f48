//! CLI error types with miette diagnostics.

use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use polsync_config::ConfigError;

pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const CONFIG: i32 = 3;
    pub const DATASTORE: i32 = 4;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Configuration ────────────────────────────────────────────────

    #[error(transparent)]
    #[diagnostic(
        code(polsync::config),
        help("Check the config file (polsync config path) and POLSYNC_* environment variables.")
    )]
    Config(#[from] ConfigError),

    #[error("Config file already exists at {path}")]
    #[diagnostic(code(polsync::config_exists), help("Pass --force to overwrite it."))]
    ConfigExists { path: PathBuf },

    #[error("Failed to render config: {0}")]
    #[diagnostic(code(polsync::config))]
    Render(#[from] toml::ser::Error),

    // ── Replay input ─────────────────────────────────────────────────

    #[error("Could not read {path}")]
    #[diagnostic(code(polsync::replay_file))]
    ReadInput {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid replay file {path}")]
    #[diagnostic(
        code(polsync::replay_json),
        help("Expected a JSON array of objects with \"key\", \"value\" and optional \"revision\".")
    )]
    InvalidInput {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    // ── Datastore ────────────────────────────────────────────────────

    #[error("Datastore error: {0}")]
    #[diagnostic(code(polsync::datastore))]
    Datastore(#[from] polsync_api::Error),

    // ── IO ───────────────────────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Failed to encode update: {0}")]
    #[diagnostic(code(polsync::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(ConfigError::Validation { .. })
            | Self::ConfigExists { .. }
            | Self::InvalidInput { .. }
            | Self::ReadInput { .. } => exit_code::USAGE,
            Self::Config(_) | Self::Render(_) => exit_code::CONFIG,
            Self::Datastore(_) => exit_code::DATASTORE,
            Self::Io(_) | Self::Json(_) => exit_code::GENERAL,
        }
    }
}
