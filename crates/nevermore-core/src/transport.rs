//! The GATT transport abstraction.
//!
//! Everything the client needs from a host Bluetooth stack goes through
//! [`GattTransport`]. [`BtleplugTransport`](crate::BtleplugTransport) backs it
//! with btleplug; [`MockTransport`](crate::mock::MockTransport) backs it with
//! an in-memory peripheral for tests.
//!
//! Handles are plain identifiers. A transport resolves them against its own
//! per-device tables, so a handle held after its device disconnected simply
//! fails with [`Error::NotConnected`](crate::Error::NotConnected).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::scan::ScanOptions;

/// A peripheral chosen by a device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    /// Transport-level identifier, stable for the life of the process.
    pub id: String,
    /// Advertised name, if any.
    pub name: Option<String>,
}

/// A live GATT connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHandle {
    /// The connected device.
    pub device_id: String,
    /// Transport-assigned token, new for every connection to the device.
    pub session: u64,
}

/// Published when a GATT connection drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkLost {
    /// The device whose link dropped.
    pub device_id: String,
    /// Session of the [`ServerHandle`] that is gone.
    pub session: u64,
}

impl LinkLost {
    /// Whether this event is about `server`'s connection.
    pub fn is_for(&self, server: &ServerHandle) -> bool {
        self.device_id == server.device_id && self.session == server.session
    }
}

/// A primary service on a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    /// The device exposing the service.
    pub device_id: String,
    /// Service UUID.
    pub uuid: Uuid,
}

/// A discovered characteristic.
///
/// Not `Clone`: each handle is owned by exactly one characteristic wrapper.
#[derive(Debug, PartialEq, Eq)]
pub struct CharacteristicHandle {
    /// The device exposing the characteristic.
    pub device_id: String,
    /// UUID of the owning service.
    pub service: Uuid,
    /// Characteristic UUID.
    pub uuid: Uuid,
    /// Transport-assigned index, unique per device.
    pub index: usize,
}

/// A descriptor of a discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorHandle {
    /// The device exposing the descriptor.
    pub device_id: String,
    /// Index of the owning characteristic.
    pub characteristic: usize,
    /// Descriptor UUID.
    pub uuid: Uuid,
}

/// Value-changed events for one subscribed characteristic.
pub type NotificationStream = BoxStream<'static, Vec<u8>>;

/// Shared, type-erased transport.
pub type SharedTransport = Arc<dyn GattTransport>;

/// Host Bluetooth capability consumed by the client.
#[async_trait]
pub trait GattTransport: Send + Sync {
    /// Scan until a peripheral passes `options`, or `cancel` fires.
    ///
    /// Only services on the `options` allowlist are visible through
    /// [`primary_service`](Self::primary_service) for the returned device.
    ///
    /// Cancellation yields [`Error::UserCancelled`](crate::Error::UserCancelled).
    async fn request_device(
        &self,
        options: &ScanOptions,
        cancel: CancellationToken,
    ) -> Result<DeviceHandle>;

    /// Open a GATT connection.
    async fn connect(&self, device: &DeviceHandle) -> Result<ServerHandle>;

    /// Close a GATT connection. Closing a closed connection succeeds.
    async fn disconnect(&self, server: &ServerHandle) -> Result<()>;

    /// Published whenever a connection drops for any reason, including a
    /// requested [`disconnect`](Self::disconnect).
    fn disconnect_events(&self) -> broadcast::Receiver<LinkLost>;

    /// Look up a primary service. `Ok(None)` when the device lacks it.
    async fn primary_service(
        &self,
        server: &ServerHandle,
        uuid: Uuid,
    ) -> Result<Option<ServiceHandle>>;

    /// Characteristics of a service in discovery order, optionally only
    /// those with a given UUID.
    async fn characteristics(
        &self,
        service: &ServiceHandle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<CharacteristicHandle>>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>>;

    /// Write a characteristic value with response.
    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<()>;

    /// Enable notifications and return the value stream.
    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream>;

    /// Disable notifications.
    async fn stop_notifications(&self, characteristic: &CharacteristicHandle) -> Result<()>;

    /// Descriptors of a characteristic.
    async fn descriptors(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<DescriptorHandle>>;

    /// Read a descriptor value.
    async fn read_descriptor(&self, descriptor: &DescriptorHandle) -> Result<Vec<u8>>;
}

/// Run a transport call under a timeout.
pub(crate) async fn bounded<T>(
    operation: &str,
    duration: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::time::timeout(duration, call)
        .await
        .map_err(|_| Error::timeout(operation, duration))?
}
