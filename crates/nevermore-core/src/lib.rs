//! Core BLE library for Nevermore air filter controllers.
//!
//! This crate connects to a Nevermore controller over Bluetooth Low Energy,
//! discovers its GATT services and keeps a live, typed view of every
//! characteristic it exposes.
//!
//! # Features
//!
//! - **Device requests**: Scan for a peripheral whose name starts with "Nevermore"
//! - **Service discovery**: Environmental sensing, fan and servo services, with
//!   per-slot tolerance for characteristics the firmware does not expose
//! - **Live values**: Notifications keep each characteristic's cached value current
//! - **Commands**: Fan power override, servo position and servo range
//! - **Multi-device support**: Several controllers behind one [`DeviceManager`]
//! - **Testability**: Everything runs against [`mock::MockTransport`] without hardware
//!
//! # Services
//!
//! | Service | Characteristics |
//! |---------|-----------------|
//! | Environmental sensing | Temperature, humidity, VOC index for intake and exhaust, plus an aggregate |
//! | Fan | Power/tachometer aggregate, power override |
//! | Servo | Position, PWM range |
//! | Others | Recorded as present only |
//!
//! # Quick Start
//!
//! ```no_run
//! use nevermore_core::{BtleplugTransport, DeviceManager, SharedTransport};
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport: SharedTransport = Arc::new(BtleplugTransport::new().await?);
//!     let manager = DeviceManager::new(transport);
//!
//!     // Scan, then connect and discover
//!     let Some(device) = manager.request_device(CancellationToken::new()).await? else {
//!         return Ok(());
//!     };
//!
//!     if let Some(fan) = device.fan().await {
//!         fan.set_power_override(Some(60.0)).await?;
//!     }
//!
//!     let snapshot = device.snapshot().await;
//!     println!("{:#?}", snapshot);
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod characteristic;
pub mod connection;
pub mod error;
pub mod events;
pub mod manager;
pub mod mock;
pub mod scan;
pub mod services;
pub mod transport;

// Core exports
pub use btle::BtleplugTransport;
pub use characteristic::{Access, Characteristic, OperationTimeouts};
pub use connection::{ConnectionConfig, DeviceConnection};
pub use error::{DeviceNotFoundReason, Error, Result};
pub use events::{
    DeviceEvent, DeviceId, DisconnectReason, EventDispatcher, EventReceiver, EventSender,
};
pub use manager::{DeviceManager, ManagerConfig};
pub use scan::ScanOptions;
pub use services::{EnvironmentalSensing, Fan, Service, Servo};
pub use transport::{GattTransport, LinkLost, SharedTransport};

// Re-export from nevermore-types
pub use nevermore_types::uuids;
pub use nevermore_types::{
    ConnectionState, DeviceSnapshot, EnvironmentalData, ErrorKind, FanPowerTacho, OperationError,
    PhysicalValue, ServiceKind, ServiceSnapshot, ServoRange, SlotSnapshot, SlotValue,
};
