//! Integration tests for nevermore-core
//!
//! The mock-backed tests run everywhere. Tests marked `#[ignore]` need a
//! powered-on Nevermore controller in range and should be run with:
//! `cargo test --package nevermore-core -- --ignored --nocapture`

use std::sync::Arc;
use std::time::Duration;

use nevermore_core::mock::{MockPeripheral, MockTransport};
use nevermore_core::{
    BtleplugTransport, ConnectionConfig, ConnectionState, DeviceEvent, DeviceManager,
    DisconnectReason, Error, ManagerConfig, ScanOptions, ServiceKind, SharedTransport, SlotValue,
    uuids,
};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

/// Default timeout for BLE operations.
const BLE_TIMEOUT: Duration = Duration::from_secs(30);

fn manager_with(mock: &Arc<MockTransport>) -> DeviceManager {
    let transport: SharedTransport = mock.clone();
    DeviceManager::with_config(
        transport,
        ManagerConfig::default().connection(ConnectionConfig::fast()),
    )
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

#[tokio::test]
async fn test_request_connect_and_read() {
    let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore("ctl-1")));
    let manager = manager_with(&mock);
    let mut events = manager.events().subscribe();

    let device = manager
        .request_device(CancellationToken::new())
        .await
        .unwrap()
        .expect("device selected");
    assert_eq!(device.state().await, ConnectionState::Connected);
    assert!(matches!(
        events.recv().await.unwrap(),
        DeviceEvent::Discovered { .. }
    ));
    assert!(matches!(
        events.recv().await.unwrap(),
        DeviceEvent::Connected { .. }
    ));

    let env = device.environmental().await.unwrap();
    let latest = env.latest().await.unwrap();
    assert_eq!(latest.temperature_intake, Some(21.5));
    assert_eq!(latest.temperature_exhaust, Some(28.75));

    let fan = device.fan().await.unwrap();
    let reading = fan.latest().await.unwrap();
    assert_eq!(reading.power, Some(50.0));
    assert_eq!(reading.tachometer, Some(1200.0));
}

#[tokio::test]
async fn test_notifications_update_snapshot() {
    let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore("ctl-1")));
    let manager = manager_with(&mock);
    manager.request_device(CancellationToken::new()).await.unwrap();

    assert!(mock.notify("ctl-1", uuids::FAN_POWER_TACHO_AGGREGATE, vec![200, 0xD0, 0x07]) > 0);
    settle().await;

    let snapshots = manager.snapshots().await;
    assert_eq!(snapshots.len(), 1);
    let fan = snapshots[0].service(ServiceKind::Fan).unwrap();
    let slot = fan.slot("aggregate").unwrap();
    assert!(slot.subscribed);
    match &slot.value {
        Some(SlotValue::FanPowerTacho(reading)) => {
            assert_eq!(reading.power, Some(100.0));
            assert_eq!(reading.tachometer, Some(2000.0));
        }
        other => panic!("unexpected slot value: {other:?}"),
    }
}

#[tokio::test]
async fn test_commands_reach_the_peripheral() {
    let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore("ctl-1")));
    let manager = manager_with(&mock);
    manager.request_device(CancellationToken::new()).await.unwrap();

    manager.set_power_override("ctl-1", Some(75.0)).await.unwrap();
    manager.set_power_override("ctl-1", None).await.unwrap();
    manager.set_servo_position("ctl-1", 25.0).await.unwrap();
    manager.set_servo_range("ctl-1", 0.0, 100.0).await.unwrap();

    let writes = mock.writes("ctl-1");
    assert_eq!(writes[0], (uuids::PERCENTAGE_8, vec![150]));
    assert_eq!(writes[1], (uuids::PERCENTAGE_8, vec![0xFF]));
    assert_eq!(writes[2], (uuids::SERVO_POSITION, 2500u16.to_le_bytes().to_vec()));
    assert_eq!(writes[3].0, uuids::SERVO_RANGE);

    assert!(matches!(
        manager.set_servo_position("unknown", 10.0).await,
        Err(Error::DeviceNotFound(_))
    ));
}

#[tokio::test]
async fn test_link_loss_and_reconnect() {
    let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore("ctl-1")));
    let manager = manager_with(&mock);
    let device = manager
        .request_device(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    let mut events = manager.events().subscribe();

    mock.simulate_disconnect("ctl-1");
    settle().await;

    assert_eq!(device.state().await, ConnectionState::Disconnected);
    assert!(device.services().await.is_empty());
    assert_eq!(mock.active_notifications("ctl-1"), 0);
    assert!(matches!(
        events.recv().await.unwrap(),
        DeviceEvent::Disconnected {
            reason: DisconnectReason::LinkLost,
            ..
        }
    ));

    assert!(manager.connect("ctl-1").await.unwrap());
    assert_eq!(mock.connect_count("ctl-1"), 2);
    assert_eq!(mock.active_notifications("ctl-1"), 3);
}

#[tokio::test]
async fn test_request_cancelled() {
    let mock = Arc::new(MockTransport::new());
    let transport: SharedTransport = mock.clone();
    let manager = DeviceManager::with_config(
        transport,
        ManagerConfig::default().scan_options(ScanOptions::new().timeout_secs(60)),
    );

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        trigger.cancel();
    });

    assert!(manager.request_device(cancel).await.unwrap().is_none());
    assert!(manager.last_error().await.is_none());
    assert_eq!(manager.device_count().await, 0);
}

#[tokio::test]
async fn test_transport_unsupported() {
    let mock = Arc::new(MockTransport::new());
    mock.set_unavailable(true);
    let manager = manager_with(&mock);

    let err = manager
        .request_device(CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::TransportUnsupported));
    assert!(manager.last_error().await.is_some());
}

#[tokio::test]
async fn test_partial_firmware() {
    let peripheral = MockPeripheral::new("ctl-2", "Nevermore Mini").service(
        uuids::FAN_SERVICE,
        vec![nevermore_core::mock::MockCharacteristic::new(
            uuids::FAN_POWER_TACHO_AGGREGATE,
            vec![0, 0, 0],
        )
        .notify()],
    );
    let mock = Arc::new(MockTransport::new().with_device(peripheral));
    let manager = manager_with(&mock);
    let device = manager
        .request_device(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(device.services().await, vec![ServiceKind::Fan]);
    assert!(device.environmental().await.is_none());
    assert!(matches!(
        device.set_power_override(Some(10.0)).await,
        Err(Error::CapabilityMissing { .. })
    ));
    assert!(matches!(
        device.set_servo_position(10.0).await,
        Err(Error::CapabilityMissing { .. })
    ));
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_hardware_request_and_snapshot() {
    let transport: SharedTransport = Arc::new(BtleplugTransport::new().await.unwrap());
    let manager = DeviceManager::new(transport);

    let device = timeout(BLE_TIMEOUT + BLE_TIMEOUT, manager.request_device(CancellationToken::new()))
        .await
        .expect("request timed out")
        .expect("request failed")
        .expect("request cancelled");
    println!("Connected to {} ({:?})", device.id(), device.name());

    let snapshot = device.snapshot().await;
    println!("{snapshot:#?}");
    assert!(snapshot.is_connected());

    device.disconnect().await.unwrap();
}

#[tokio::test]
#[ignore = "requires BLE hardware"]
async fn test_hardware_fan_override_roundtrip() {
    let transport: SharedTransport = Arc::new(BtleplugTransport::new().await.unwrap());
    let manager = DeviceManager::new(transport);
    let device = manager
        .request_device(CancellationToken::new())
        .await
        .unwrap()
        .unwrap();

    let Some(fan) = device.fan().await else {
        println!("Controller has no fan service; skipping");
        return;
    };
    fan.set_power_override(Some(40.0)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    println!("Fan after override: {:?}", fan.latest().await);
    fan.set_power_override(None).await.unwrap();

    manager.disconnect_all().await;
}
