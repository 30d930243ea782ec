//! Command-line interface for Nevermore air filter controllers.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `scan` | Find a controller and print every service and slot |
//! | `watch` | Print live readings until interrupted |
//! | `set fan-override` | Force the fan power, or return control with `off` |
//! | `set servo-position` | Move the vent servo |
//! | `set servo-range` | Set the servo PWM range |
//! | `config` | Manage CLI configuration |
//! | `completions` | Generate shell completions |
//!
//! # Configuration
//!
//! The CLI reads `~/.config/nevermore/config.toml` (or platform equivalent)
//! for a default name prefix, output format and timeouts. Command-line flags
//! override file values.

mod cli;
mod commands;
mod config;
mod format;
mod util;

use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use commands::{WatchArgs, cmd_config, cmd_scan, cmd_set, cmd_watch};
use config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "nevermore", &mut io::stdout());
        return Ok(());
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let output = cli.output.as_ref();

    match cli.command {
        Commands::Scan { request, format } => {
            let format = config.resolve_format(cli.json, format);
            cmd_scan(&request, format, output, cli.quiet, &config).await?;
        }
        Commands::Watch {
            request,
            format,
            interval,
            count,
        } => {
            let format = config.resolve_format(cli.json, format);
            cmd_watch(
                WatchArgs {
                    request: &request,
                    interval,
                    count,
                    format,
                    output,
                    quiet: cli.quiet,
                },
                &config,
            )
            .await?;
        }
        Commands::Set { request, setting } => {
            cmd_set(&request, setting, cli.quiet, &config).await?;
        }
        Commands::Config { action } => {
            cmd_config(action, &config)?;
        }
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    }

    Ok(())
}
