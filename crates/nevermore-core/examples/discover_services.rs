//! Connect to the first Nevermore controller in range and print every
//! discovered service with its slots.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use nevermore_core::{BtleplugTransport, DeviceManager, ManagerConfig, ScanOptions, SharedTransport};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let prefix = env::args().nth(1).unwrap_or_else(|| "Nevermore".to_string());
    println!("Scanning for {}...", prefix);

    let transport: SharedTransport = Arc::new(BtleplugTransport::new().await?);
    let config = ManagerConfig::default().scan_options(
        ScanOptions::new()
            .name_prefix(prefix)
            .timeout(Duration::from_secs(20)),
    );
    let manager = DeviceManager::with_config(transport, config);

    let Some(device) = manager.request_device(CancellationToken::new()).await? else {
        println!("Cancelled");
        return Ok(());
    };
    if let Some(error) = device.last_error().await {
        eprintln!("Connect failed: {}", error.message);
        return Ok(());
    }

    println!("\n=== SERVICES AND SLOTS ===\n");
    let snapshot = device.snapshot().await;
    for (kind, service) in &snapshot.services {
        println!("Service: {} ({})", kind, kind.uuid());
        for (name, slot) in &service.slots {
            match slot {
                Some(slot) => println!(
                    "  {:<20} {:?}{}",
                    name,
                    slot.value,
                    if slot.subscribed { " [notify]" } else { "" }
                ),
                None => println!("  {:<20} (not exposed)", name),
            }
        }
    }

    device.disconnect().await?;
    Ok(())
}
