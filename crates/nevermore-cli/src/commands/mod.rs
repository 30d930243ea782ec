//! Command implementations for the CLI.

mod config;
mod scan;
mod set;
mod watch;

pub use config::cmd_config;
pub use scan::cmd_scan;
pub use set::cmd_set;
pub use watch::{WatchArgs, cmd_watch};
