//! Config command implementation.

use anyhow::{Result, bail};

use crate::cli::ConfigAction;
use crate::config::Config;

pub fn cmd_config(action: ConfigAction, config: &Config) -> Result<()> {
    match action {
        ConfigAction::Path => {
            println!("{}", Config::path().display());
        }
        ConfigAction::Show => {
            print!("{}", toml::to_string_pretty(config)?);
        }
        ConfigAction::Init { force } => {
            let path = Config::path();
            if path.exists() && !force {
                bail!(
                    "Config file already exists at {}. Use --force to overwrite.",
                    path.display()
                );
            }
            Config::with_defaults().save()?;
            println!("Wrote {}", path.display());
        }
    }
    Ok(())
}
