//! Config file selection for the CLI.

use std::path::PathBuf;

use polsync_config::{Config, ConfigError};

use crate::cli::GlobalOpts;

/// The config file in effect: `--config` if given, else the platform path.
pub fn config_path(global: &GlobalOpts) -> PathBuf {
    global
        .config
        .clone()
        .unwrap_or_else(polsync_config::config_path)
}

pub fn load(global: &GlobalOpts) -> Result<Config, ConfigError> {
    polsync_config::load_config_from(&config_path(global))
}
