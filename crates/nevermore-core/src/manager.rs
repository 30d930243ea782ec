//! Multi-device management.
//!
//! The [`DeviceManager`] is the registry of [`DeviceConnection`]s keyed by
//! device id. Each entry is an independent `Arc`; operations on one device
//! clone its `Arc` and release the registry lock before touching the
//! transport, so devices never wait on each other.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use nevermore_types::{DeviceSnapshot, OperationError};

use crate::connection::{ConnectionConfig, DeviceConnection};
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DeviceId, EventDispatcher};
use crate::scan::ScanOptions;
use crate::transport::SharedTransport;

/// Configuration for the device manager.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Options for device requests.
    pub scan_options: ScanOptions,
    /// Timeouts for every managed connection.
    pub connection: ConnectionConfig,
    /// Connect right after a device request selects a peripheral.
    pub auto_connect: bool,
    /// Event channel capacity.
    pub event_capacity: usize,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            scan_options: ScanOptions::default(),
            connection: ConnectionConfig::default(),
            auto_connect: true,
            event_capacity: 100,
        }
    }
}

impl ManagerConfig {
    /// Set the scan options.
    #[must_use]
    pub fn scan_options(mut self, options: ScanOptions) -> Self {
        self.scan_options = options;
        self
    }

    /// Set the connection config.
    #[must_use]
    pub fn connection(mut self, config: ConnectionConfig) -> Self {
        self.connection = config;
        self
    }

    /// Enable or disable connecting after a device request.
    #[must_use]
    pub fn auto_connect(mut self, enabled: bool) -> Self {
        self.auto_connect = enabled;
        self
    }
}

/// Registry of Nevermore controllers.
pub struct DeviceManager {
    transport: SharedTransport,
    devices: RwLock<HashMap<String, Arc<DeviceConnection>>>,
    events: EventDispatcher,
    last_error: RwLock<Option<OperationError>>,
    config: ManagerConfig,
}

impl std::fmt::Debug for DeviceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceManager {
    /// Create a manager with default configuration.
    pub fn new(transport: SharedTransport) -> Self {
        Self::with_config(transport, ManagerConfig::default())
    }

    /// Create a manager with full configuration.
    pub fn with_config(transport: SharedTransport, config: ManagerConfig) -> Self {
        Self {
            transport,
            devices: RwLock::new(HashMap::new()),
            events: EventDispatcher::new(config.event_capacity),
            last_error: RwLock::new(None),
            config,
        }
    }

    /// Event dispatcher shared by every managed connection.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Manager configuration.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Last registry-level error, such as no Bluetooth on the host.
    pub async fn last_error(&self) -> Option<OperationError> {
        self.last_error.read().await.clone()
    }

    /// Ask the transport for a controller, register it and, with
    /// `auto_connect`, connect to it.
    ///
    /// Returns `Ok(None)` if the request was cancelled. A failed automatic
    /// connect is recorded on the returned connection, not returned here.
    ///
    /// # Errors
    ///
    /// Returns the request error ([`Error::TransportUnsupported`] or
    /// [`Error::DeviceNotFound`]), which is also kept as
    /// [`last_error`](Self::last_error).
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn request_device(
        &self,
        cancel: CancellationToken,
    ) -> Result<Option<Arc<DeviceConnection>>> {
        let handle = match self
            .transport
            .request_device(&self.config.scan_options, cancel)
            .await
        {
            Ok(handle) => handle,
            Err(Error::UserCancelled) => {
                info!("Device request cancelled");
                return Ok(None);
            }
            Err(e) => {
                warn!(error = %e, "Device request failed");
                *self.last_error.write().await = Some(e.to_operation_error());
                return Err(e);
            }
        };
        *self.last_error.write().await = None;
        info!(device_id = %handle.id, name = ?handle.name, "Device selected");
        self.events.send(DeviceEvent::Discovered {
            device: DeviceId {
                id: handle.id.clone(),
                name: handle.name.clone(),
            },
        });

        let device = self.add_device(handle.id, handle.name).await;
        if self.config.auto_connect
            && let Err(e) = device.connect().await
        {
            warn!(device_id = %device.id(), error = %e, "Automatic connect failed");
        }
        Ok(Some(device))
    }

    /// Register a device by id. Registering a known id returns the existing
    /// connection.
    pub async fn add_device(
        &self,
        id: impl Into<String>,
        name: Option<String>,
    ) -> Arc<DeviceConnection> {
        let id = id.into();
        let mut devices = self.devices.write().await;
        if let Some(existing) = devices.get(&id) {
            return Arc::clone(existing);
        }
        let device = DeviceConnection::with_events(
            id.clone(),
            name,
            self.transport.clone(),
            self.config.connection.clone(),
            self.events.clone(),
        );
        devices.insert(id.clone(), Arc::clone(&device));
        info!(device_id = %id, "Added device to manager");
        device
    }

    /// Look up a device.
    pub async fn device(&self, id: &str) -> Option<Arc<DeviceConnection>> {
        self.devices.read().await.get(id).cloned()
    }

    async fn require(&self, id: &str) -> Result<Arc<DeviceConnection>> {
        self.device(id)
            .await
            .ok_or_else(|| Error::device_not_found(id))
    }

    /// Every registered device.
    pub async fn devices(&self) -> Vec<Arc<DeviceConnection>> {
        self.devices.read().await.values().cloned().collect()
    }

    /// Registered devices that are connected.
    pub async fn connected_devices(&self) -> Vec<Arc<DeviceConnection>> {
        let mut connected = Vec::new();
        for device in self.devices().await {
            if device.is_connected().await {
                connected.push(device);
            }
        }
        connected
    }

    /// Number of registered devices.
    pub async fn device_count(&self) -> usize {
        self.devices.read().await.len()
    }

    /// Number of connected devices.
    pub async fn connected_count(&self) -> usize {
        self.connected_devices().await.len()
    }

    /// Connect a registered device. See [`DeviceConnection::connect`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// connect error.
    pub async fn connect(&self, id: &str) -> Result<bool> {
        self.require(id).await?.connect().await
    }

    /// Disconnect a registered device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// disconnect error.
    pub async fn disconnect(&self, id: &str) -> Result<()> {
        self.require(id).await?.disconnect().await
    }

    /// Disconnect, clean up and forget a device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id.
    pub async fn remove_device(&self, id: &str) -> Result<()> {
        let device = self
            .devices
            .write()
            .await
            .remove(id)
            .ok_or_else(|| Error::device_not_found(id))?;
        device.teardown().await;
        info!(device_id = %id, "Removed device from manager");
        Ok(())
    }

    /// Disconnect every device concurrently. Failures are logged.
    pub async fn disconnect_all(&self) {
        let devices = self.devices().await;
        let results = join_all(devices.iter().map(|d| d.disconnect())).await;
        for (device, result) in devices.iter().zip(results) {
            if let Err(e) = result {
                warn!(device_id = %device.id(), error = %e, "Disconnect failed");
            }
        }
    }

    /// Snapshot of every registered device, ordered by id.
    pub async fn snapshots(&self) -> Vec<DeviceSnapshot> {
        let devices = self.devices().await;
        let mut snapshots = join_all(devices.iter().map(|d| d.snapshot())).await;
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Route [`DeviceConnection::set_power_override`] by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// command error.
    pub async fn set_power_override(&self, id: &str, percent: Option<f64>) -> Result<()> {
        self.require(id).await?.set_power_override(percent).await
    }

    /// Route [`DeviceConnection::set_servo_position`] by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// command error.
    pub async fn set_servo_position(&self, id: &str, percent: f64) -> Result<()> {
        self.require(id).await?.set_servo_position(percent).await
    }

    /// Route [`DeviceConnection::set_servo_range`] by id.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DeviceNotFound`] for an unknown id, otherwise the
    /// command error.
    pub async fn set_servo_range(&self, id: &str, start: f64, end: f64) -> Result<()> {
        self.require(id).await?.set_servo_range(start, end).await
    }
}
