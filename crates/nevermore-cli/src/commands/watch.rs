//! Watch command implementation.
//!
//! Keeps one connection open and prints the cached, notification-driven
//! values on every tick. A dropped link is re-established with exponential
//! backoff.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use nevermore_core::DeviceEvent;
use tracing::{debug, warn};

use crate::cli::{OutputFormat, RequestArgs};
use crate::config::Config;
use crate::format::{format_watch_json, format_watch_line};
use crate::util::{append_output, ctrl_c_token, open_manager, request_connected, write_output};

/// Minimum backoff delay for reconnection attempts
const MIN_BACKOFF_SECS: u64 = 2;
/// Maximum backoff delay for reconnection attempts
const MAX_BACKOFF_SECS: u64 = 300; // 5 minutes

/// Arguments for the watch command.
pub struct WatchArgs<'a> {
    pub request: &'a RequestArgs,
    pub interval: u64,
    pub count: u32,
    pub format: OutputFormat,
    pub output: Option<&'a PathBuf>,
    pub quiet: bool,
}

/// Next backoff delay, doubling up to the cap.
fn next_backoff(current: u64) -> u64 {
    (current * 2).min(MAX_BACKOFF_SECS)
}

pub async fn cmd_watch(args: WatchArgs<'_>, config: &Config) -> Result<()> {
    let WatchArgs {
        request,
        interval,
        count,
        format,
        output,
        quiet,
    } = args;

    let cancel = ctrl_c_token();
    let manager = open_manager(config, request).await?;
    let mut events = manager.events().subscribe();
    let device = request_connected(&manager, cancel.clone(), quiet).await?;

    let mut ticker = tokio::time::interval(Duration::from_secs(interval.max(1)));
    let mut readings_taken: u32 = 0;
    let mut backoff_secs = MIN_BACKOFF_SECS;
    // Start each run with an empty file.
    if output.is_some() {
        write_output(output, "")?;
    }

    loop {
        if count > 0 && readings_taken >= count {
            if !quiet {
                eprintln!("Completed {} readings.", readings_taken);
            }
            break;
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                if !quiet {
                    eprintln!("\nShutting down...");
                }
                break;
            }
            Ok(event) = events.recv() => {
                match &event {
                    DeviceEvent::Disconnected { reason, .. } => {
                        warn!(?reason, "Connection lost");
                    }
                    DeviceEvent::DiscoveryIncomplete { service, missing, .. } => {
                        warn!(%service, ?missing, "Controller does not expose every characteristic");
                    }
                    other => debug!(event = ?other, "Device event"),
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if !device.is_connected().await {
            eprintln!("Connection lost. Reconnecting...");
            match device.connect().await {
                Ok(_) if device.is_connected().await => {
                    backoff_secs = MIN_BACKOFF_SECS;
                }
                Ok(_) => {}
                Err(e) => {
                    eprintln!("Connection failed: {}. Retrying in {}s...", e, backoff_secs);
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(Duration::from_secs(backoff_secs)) => {}
                    }
                    backoff_secs = next_backoff(backoff_secs);
                    continue;
                }
            }
        }

        let snapshot = device.snapshot().await;
        let line = match format {
            OutputFormat::Json => format_watch_json(&snapshot)?,
            OutputFormat::Text => format_watch_line(&snapshot),
        };
        append_output(output, &format!("{}\n", line))?;
        readings_taken += 1;
    }

    manager.disconnect_all().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(next_backoff(MIN_BACKOFF_SECS), 4);
        assert_eq!(next_backoff(200), MAX_BACKOFF_SECS);
        assert_eq!(next_backoff(MAX_BACKOFF_SECS), MAX_BACKOFF_SECS);
    }
}
