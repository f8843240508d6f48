//! Config subcommand handlers.

use polsync_config::Config;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::config;
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            println!("{}", config::config_path(global).display());
            Ok(())
        }

        ConfigCommand::Show => {
            let cfg = config::load(global)?;
            print!("{}", toml::to_string_pretty(&cfg.redacted())?);
            Ok(())
        }

        ConfigCommand::Init { force } => {
            let path = config::config_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists { path });
            }
            polsync_config::save_config_to(&Config::default(), &path)?;
            eprintln!("Wrote default config to {}", path.display());
            Ok(())
        }
    }
}
