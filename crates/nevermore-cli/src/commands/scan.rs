//! Scan command implementation.

use std::path::PathBuf;

use anyhow::Result;

use crate::cli::{OutputFormat, RequestArgs};
use crate::config::Config;
use crate::format::{format_snapshot_json, format_snapshot_text};
use crate::util::{ctrl_c_token, open_manager, request_connected, write_output};

pub async fn cmd_scan(
    request: &RequestArgs,
    format: OutputFormat,
    output: Option<&PathBuf>,
    quiet: bool,
    config: &Config,
) -> Result<()> {
    let manager = open_manager(config, request).await?;
    let device = request_connected(&manager, ctrl_c_token(), quiet).await?;

    let snapshot = device.snapshot().await;
    let content = match format {
        OutputFormat::Json => format_snapshot_json(&snapshot)?,
        OutputFormat::Text => format_snapshot_text(&snapshot),
    };
    write_output(output, &content)?;

    manager.disconnect_all().await;
    Ok(())
}
