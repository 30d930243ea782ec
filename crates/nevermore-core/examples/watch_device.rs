//! Connect to a controller and print readings as notifications arrive.
//!
//! Stop with Ctrl+C.

use std::sync::Arc;
use std::time::Duration;

use nevermore_core::{BtleplugTransport, DeviceEvent, DeviceManager, SharedTransport};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter("nevermore_core=info")
        .init();

    let transport: SharedTransport = Arc::new(BtleplugTransport::new().await?);
    let manager = DeviceManager::new(transport);
    let mut events = manager.events().subscribe();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        ctrl_c.cancel();
    });

    let Some(device) = manager.request_device(cancel.clone()).await? else {
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(2));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            Ok(event) = events.recv() => match event {
                DeviceEvent::DiscoveryIncomplete { service, missing, .. } => {
                    println!("{} is missing {:?}", service, missing);
                }
                other => println!("event: {:?}", other),
            },
            _ = ticker.tick() => {
                if let Some(env) = device.environmental().await
                    && let Some(data) = env.latest().await
                {
                    println!(
                        "intake {:?} °C / {:?} %RH, exhaust {:?} °C, VOC {:?} -> {:?}",
                        data.temperature_intake,
                        data.humidity_intake,
                        data.temperature_exhaust,
                        data.voc_index_intake,
                        data.voc_index_exhaust,
                    );
                }
                if let Some(fan) = device.fan().await
                    && let Some(fan) = fan.latest().await
                {
                    println!("fan {:?} % at {:?} RPM", fan.power, fan.tachometer);
                }
            }
        }
        if !device.is_connected().await {
            println!("Disconnected, reconnecting...");
            if let Err(e) = device.connect().await {
                eprintln!("Reconnect failed: {}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }

    manager.disconnect_all().await;
    Ok(())
}
