//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Reusable device request arguments
#[derive(Debug, Clone, Args)]
pub struct RequestArgs {
    /// Accept only devices whose name starts with this prefix
    #[arg(short, long, env = "NEVERMORE_NAME")]
    pub name: Option<String>,

    /// Scan timeout in seconds
    #[arg(short = 'T', long)]
    pub timeout: Option<u64>,

    /// Connection timeout in seconds
    #[arg(long)]
    pub connect_timeout: Option<u64>,
}

#[derive(Parser)]
#[command(name = "nevermore")]
#[command(author, version, about = "CLI for Nevermore air filter controllers", long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Output as JSON (shorthand for --format json)
    #[arg(long, global = true)]
    pub json: bool,

    /// Write output to file instead of stdout
    #[arg(short, long, global = true)]
    pub output: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Find a controller, connect and print everything it exposes
    Scan {
        #[command(flatten)]
        request: RequestArgs,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,
    },

    /// Connect to a controller and print readings as they change
    Watch {
        #[command(flatten)]
        request: RequestArgs,

        /// Output format
        #[arg(short, long, value_enum)]
        format: Option<OutputFormat>,

        /// Print interval in seconds
        #[arg(short, long, default_value = "5")]
        interval: u64,

        /// Number of readings to print before exiting (0 for unlimited)
        #[arg(short = 'n', long, default_value = "0")]
        count: u32,
    },

    /// Change a controller setting
    Set {
        #[command(flatten)]
        request: RequestArgs,

        #[command(subcommand)]
        setting: DeviceSetting,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Controller settings
#[derive(Debug, Clone, Subcommand)]
pub enum DeviceSetting {
    /// Force the fan to a power level, or "off" to return control to the controller
    FanOverride {
        /// Power in percent (0-100) or "off"
        #[arg(value_parser = parse_power_override)]
        power: PowerOverride,
    },

    /// Move the vent servo
    ServoPosition {
        /// Position in percent of the servo range (0-100)
        percent: f64,
    },

    /// Set the servo PWM range
    ServoRange {
        /// Start of the range in percent (0-100)
        start: f64,
        /// End of the range in percent (0-100)
        end: f64,
    },
}

/// A fan power override, `None` meaning no override.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerOverride(pub Option<f64>);

fn parse_power_override(s: &str) -> Result<PowerOverride, String> {
    match s.to_lowercase().as_str() {
        "off" | "none" | "auto" => Ok(PowerOverride(None)),
        other => other
            .trim_end_matches('%')
            .parse::<f64>()
            .map(|p| PowerOverride(Some(p)))
            .map_err(|_| format!("expected a percentage or \"off\", got \"{}\"", s)),
    }
}

/// Config subcommands
#[derive(Debug, Clone, Subcommand)]
pub enum ConfigAction {
    /// Show the config file path
    Path,
    /// Show the current configuration
    Show,
    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_is_well_formed() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_power_override() {
        assert_eq!(parse_power_override("off").unwrap(), PowerOverride(None));
        assert_eq!(parse_power_override("OFF").unwrap(), PowerOverride(None));
        assert_eq!(
            parse_power_override("42.5").unwrap(),
            PowerOverride(Some(42.5))
        );
        assert_eq!(
            parse_power_override("60%").unwrap(),
            PowerOverride(Some(60.0))
        );
        assert!(parse_power_override("fast").is_err());
    }

    #[test]
    fn test_parse_set_fan_override() {
        let cli = Cli::try_parse_from(["nevermore", "set", "fan-override", "off"]).unwrap();
        match cli.command {
            Commands::Set {
                setting: DeviceSetting::FanOverride { power },
                ..
            } => assert_eq!(power, PowerOverride(None)),
            _ => panic!("expected set fan-override"),
        }
    }

    #[test]
    fn test_parse_servo_range() {
        let cli = Cli::try_parse_from([
            "nevermore",
            "set",
            "--name",
            "Nevermore Box",
            "servo-range",
            "10",
            "90",
        ])
        .unwrap();
        match cli.command {
            Commands::Set {
                request,
                setting: DeviceSetting::ServoRange { start, end },
            } => {
                assert_eq!(request.name.as_deref(), Some("Nevermore Box"));
                assert_eq!((start, end), (10.0, 90.0));
            }
            _ => panic!("expected set servo-range"),
        }
    }

    #[test]
    fn test_global_flags() {
        let cli = Cli::try_parse_from(["nevermore", "scan", "--json", "-q"]).unwrap();
        assert!(cli.json);
        assert!(cli.quiet);
        assert!(!cli.verbose);
    }
}
