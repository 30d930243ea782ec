//! Utility functions for CLI operations.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use nevermore_core::{
    BtleplugTransport, DeviceConnection, DeviceManager, ManagerConfig, SharedTransport,
};
use tokio_util::sync::CancellationToken;

use crate::cli::RequestArgs;
use crate::config::Config;

/// Cancellation token fired by Ctrl+C.
pub fn ctrl_c_token() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

/// Open the host Bluetooth adapter and build a manager from config and flags.
pub async fn open_manager(config: &Config, args: &RequestArgs) -> Result<DeviceManager> {
    let transport: SharedTransport = Arc::new(
        BtleplugTransport::new()
            .await
            .context("Bluetooth is not available")?,
    );
    let manager_config = ManagerConfig::default()
        .scan_options(config.scan_options(args))
        .connection(config.connection_config(args));
    Ok(DeviceManager::with_config(transport, manager_config))
}

/// Request a device and make sure it ended up connected.
pub async fn request_connected(
    manager: &DeviceManager,
    cancel: CancellationToken,
    quiet: bool,
) -> Result<Arc<DeviceConnection>> {
    if !quiet {
        let prefix = manager
            .config()
            .scan_options
            .name_prefix
            .as_deref()
            .unwrap_or("any name");
        eprintln!("Scanning for {}...", prefix);
    }

    let Some(device) = manager
        .request_device(cancel)
        .await
        .context("Failed to find a device")?
    else {
        bail!("Cancelled");
    };

    if !device.is_connected().await {
        match device.last_error().await {
            Some(error) => bail!("Failed to connect to {}: {}", device.id(), error),
            None => bail!("Failed to connect to {}", device.id()),
        }
    }
    if !quiet {
        eprintln!(
            "Connected to {} ({})",
            device.name().unwrap_or("Unknown"),
            device.id()
        );
    }
    Ok(device)
}

/// Write output to file or stdout.
pub fn write_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write to {}", path.display()))?;
        }
        None => {
            print!("{}", content);
            io::stdout().flush()?;
        }
    }
    Ok(())
}

/// Append output to a file, or write it to stdout.
pub fn append_output(output: Option<&PathBuf>, content: &str) -> Result<()> {
    let Some(path) = output else {
        return write_output(None, content);
    };
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    file.write_all(content.as_bytes())
        .with_context(|| format!("Failed to write to {}", path.display()))?;
    Ok(())
}
