//! [`GattTransport`] backed by the host Bluetooth stack through btleplug.
//!
//! # Platform differences
//!
//! - **macOS**: peripherals report an all-zero address, so devices are
//!   identified by the CoreBluetooth UUID. It is stable per Mac but differs
//!   between Macs.
//! - **Linux/Windows**: devices are identified by their MAC address.
//!
//! btleplug keeps a service's characteristics in a sorted set, so several
//! characteristics sharing one UUID come back in a stable order that is not
//! necessarily the peripheral's attribute order.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{
    Central, CentralEvent, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::scan::{SCAN_POLL_INTERVAL, ScanOptions};
use crate::transport::{
    CharacteristicHandle, DescriptorHandle, DeviceHandle, GattTransport, LinkLost,
    NotificationStream, ServerHandle, ServiceHandle,
};

/// Format a peripheral ID without its `PeripheralId(..)` wrapper.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// The address when the platform reports one, otherwise the peripheral ID.
fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if address == "00:00:00:00:00:00" {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

struct PeripheralEntry {
    peripheral: Peripheral,
    connected: bool,
    /// Bumped on every connect.
    session: u64,
    /// Allowlist of the last device request.
    granted: Vec<Uuid>,
    /// Characteristics of the current connection; handle indices point here.
    characteristics: Vec<Characteristic>,
}

type Registry = Arc<RwLock<HashMap<String, PeripheralEntry>>>;

/// Host Bluetooth transport on the first available adapter.
pub struct BtleplugTransport {
    adapter: Adapter,
    devices: Registry,
    disconnects: broadcast::Sender<LinkLost>,
    event_task: JoinHandle<()>,
}

impl std::fmt::Debug for BtleplugTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleplugTransport").finish_non_exhaustive()
    }
}

impl BtleplugTransport {
    /// Open the first Bluetooth adapter and start listening for
    /// disconnects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::TransportUnsupported`] if the host has no Bluetooth
    /// stack or no adapter.
    pub async fn new() -> Result<Self> {
        let adapter = get_adapter().await?;
        let devices: Registry = Arc::new(RwLock::new(HashMap::new()));
        let (disconnects, _) = broadcast::channel(32);

        let mut events = adapter.events().await?;
        let event_task = {
            let devices = Arc::clone(&devices);
            let disconnects = disconnects.clone();
            tokio::spawn(async move {
                while let Some(event) = events.next().await {
                    if let CentralEvent::DeviceDisconnected(peripheral_id) = event {
                        on_disconnected(&devices, &disconnects, &peripheral_id).await;
                    }
                }
                debug!("Adapter event stream ended");
            })
        };

        Ok(Self {
            adapter,
            devices,
            disconnects,
            event_task,
        })
    }

    async fn register(&self, peripheral: Peripheral, options: &ScanOptions) -> Result<DeviceHandle> {
        let properties = peripheral.properties().await?;
        let name = properties.as_ref().and_then(|p| p.local_name.clone());
        let id = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

        self.devices
            .write()
            .await
            .entry(id.clone())
            .or_insert_with(|| PeripheralEntry {
                peripheral,
                connected: false,
                session: 0,
                granted: Vec::new(),
                characteristics: Vec::new(),
            })
            .granted = options.optional_services.clone();
        Ok(DeviceHandle { id, name })
    }

    async fn peripheral(&self, device_id: &str) -> Result<Peripheral> {
        self.devices
            .read()
            .await
            .get(device_id)
            .map(|entry| entry.peripheral.clone())
            .ok_or_else(|| Error::device_not_found(device_id))
    }

    async fn resolve(&self, handle: &CharacteristicHandle) -> Result<(Peripheral, Characteristic)> {
        let devices = self.devices.read().await;
        let entry = devices
            .get(&handle.device_id)
            .ok_or_else(|| Error::device_not_found(&handle.device_id))?;
        if !entry.connected {
            return Err(Error::NotConnected);
        }
        let characteristic = entry
            .characteristics
            .get(handle.index)
            .filter(|c| c.uuid == handle.uuid)
            .cloned()
            .ok_or_else(|| Error::operation_failed("lookup", handle.uuid, "stale handle"))?;
        Ok((entry.peripheral.clone(), characteristic))
    }

    async fn stop_scan(&self) {
        if let Err(e) = self.adapter.stop_scan().await {
            debug!(error = %e, "Failed to stop scan");
        }
    }

    async fn find_match(&self, options: &ScanOptions) -> Result<Option<Peripheral>> {
        for peripheral in self.adapter.peripherals().await? {
            let name = match peripheral.properties().await {
                Ok(Some(properties)) => properties.local_name,
                Ok(None) => None,
                Err(e) => {
                    debug!(error = %e, "Error reading peripheral properties");
                    continue;
                }
            };
            if options.matches(name.as_deref()) {
                info!(name = ?name, "Found matching device");
                return Ok(Some(peripheral));
            }
        }
        Ok(None)
    }
}

impl Drop for BtleplugTransport {
    fn drop(&mut self) {
        self.event_task.abort();
    }
}

async fn on_disconnected(
    devices: &Registry,
    disconnects: &broadcast::Sender<LinkLost>,
    peripheral_id: &PeripheralId,
) {
    let mut devices = devices.write().await;
    let Some((id, entry)) = devices
        .iter_mut()
        .find(|(_, entry)| entry.peripheral.id() == *peripheral_id)
    else {
        return;
    };
    // Already closed by a requested disconnect, or a late event for a link
    // that has since been re-established.
    if !entry.connected || entry.peripheral.is_connected().await.unwrap_or(false) {
        return;
    }
    entry.connected = false;
    entry.characteristics.clear();
    debug!(device_id = %id, session = entry.session, "Adapter reported disconnect");
    let _ = disconnects.send(LinkLost {
        device_id: id.clone(),
        session: entry.session,
    });
}

/// Get the first available Bluetooth adapter.
async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await.map_err(|e| {
        warn!(error = %e, "Bluetooth manager unavailable");
        Error::TransportUnsupported
    })?;
    let adapters = manager.adapters().await.map_err(|e| {
        warn!(error = %e, "Failed to list Bluetooth adapters");
        Error::TransportUnsupported
    })?;
    adapters.into_iter().next().ok_or(Error::TransportUnsupported)
}

#[async_trait]
impl GattTransport for BtleplugTransport {
    async fn request_device(
        &self,
        options: &ScanOptions,
        cancel: CancellationToken,
    ) -> Result<DeviceHandle> {
        info!(prefix = ?options.name_prefix, timeout_secs = options.timeout.as_secs(), "Starting BLE scan...");
        self.adapter.start_scan(ScanFilter::default()).await?;

        let deadline = tokio::time::sleep(options.timeout);
        tokio::pin!(deadline);
        loop {
            match self.find_match(options).await {
                Ok(Some(peripheral)) => {
                    self.stop_scan().await;
                    return self.register(peripheral, options).await;
                }
                Ok(None) => {}
                Err(e) => {
                    self.stop_scan().await;
                    return Err(e);
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.stop_scan().await;
                    return Err(Error::UserCancelled);
                }
                _ = &mut deadline => {
                    self.stop_scan().await;
                    return Err(Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
                        duration: options.timeout,
                    }));
                }
                _ = tokio::time::sleep(SCAN_POLL_INTERVAL) => {}
            }
        }
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<ServerHandle> {
        let peripheral = self.peripheral(&device.id).await?;
        let failed = |e: btleplug::Error| Error::connection_failed(Some(device.id.clone()), e.to_string());

        peripheral.connect().await.map_err(failed)?;
        peripheral.discover_services().await.map_err(failed)?;

        let characteristics: Vec<Characteristic> = peripheral
            .services()
            .into_iter()
            .flat_map(|service| service.characteristics)
            .collect();
        debug!(device_id = %device.id, count = characteristics.len(), "Cached characteristics");

        let mut devices = self.devices.write().await;
        let entry = devices
            .get_mut(&device.id)
            .ok_or_else(|| Error::device_not_found(&device.id))?;
        entry.connected = true;
        entry.session += 1;
        entry.characteristics = characteristics;
        Ok(ServerHandle {
            device_id: device.id.clone(),
            session: entry.session,
        })
    }

    async fn disconnect(&self, server: &ServerHandle) -> Result<()> {
        let (peripheral, lost) = {
            let mut devices = self.devices.write().await;
            let entry = devices
                .get_mut(&server.device_id)
                .ok_or_else(|| Error::device_not_found(&server.device_id))?;
            if entry.session != server.session || !entry.connected {
                return Ok(());
            }
            entry.connected = false;
            entry.characteristics.clear();
            let lost = LinkLost {
                device_id: server.device_id.clone(),
                session: entry.session,
            };
            (entry.peripheral.clone(), lost)
        };
        let result = peripheral.disconnect().await;
        let _ = self.disconnects.send(lost);
        result?;
        Ok(())
    }

    fn disconnect_events(&self) -> broadcast::Receiver<LinkLost> {
        self.disconnects.subscribe()
    }

    async fn primary_service(
        &self,
        server: &ServerHandle,
        uuid: Uuid,
    ) -> Result<Option<ServiceHandle>> {
        let devices = self.devices.read().await;
        let entry = devices
            .get(&server.device_id)
            .ok_or_else(|| Error::device_not_found(&server.device_id))?;
        if !entry.connected {
            return Err(Error::NotConnected);
        }
        let found = entry.granted.contains(&uuid)
            && entry
                .peripheral
                .services()
                .iter()
                .any(|service| service.primary && service.uuid == uuid);
        Ok(found.then(|| ServiceHandle {
            device_id: server.device_id.clone(),
            uuid,
        }))
    }

    async fn characteristics(
        &self,
        service: &ServiceHandle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<CharacteristicHandle>> {
        let devices = self.devices.read().await;
        let entry = devices
            .get(&service.device_id)
            .ok_or_else(|| Error::device_not_found(&service.device_id))?;
        if !entry.connected {
            return Err(Error::NotConnected);
        }
        Ok(entry
            .characteristics
            .iter()
            .enumerate()
            .filter(|(_, c)| c.service_uuid == service.uuid)
            .filter(|(_, c)| uuid.is_none_or(|u| u == c.uuid))
            .map(|(index, c)| CharacteristicHandle {
                device_id: service.device_id.clone(),
                service: service.uuid,
                uuid: c.uuid,
                index,
            })
            .collect())
    }

    async fn read(&self, handle: &CharacteristicHandle) -> Result<Vec<u8>> {
        let (peripheral, characteristic) = self.resolve(handle).await?;
        Ok(peripheral.read(&characteristic).await?)
    }

    async fn write(&self, handle: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        let (peripheral, characteristic) = self.resolve(handle).await?;
        peripheral
            .write(&characteristic, data, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn start_notifications(&self, handle: &CharacteristicHandle) -> Result<NotificationStream> {
        let (peripheral, characteristic) = self.resolve(handle).await?;
        let notifications = peripheral.notifications().await?;
        peripheral.subscribe(&characteristic).await?;

        let uuid = characteristic.uuid;
        Ok(notifications
            .filter_map(move |n| futures::future::ready((n.uuid == uuid).then_some(n.value)))
            .boxed())
    }

    async fn stop_notifications(&self, handle: &CharacteristicHandle) -> Result<()> {
        let (peripheral, characteristic) = self.resolve(handle).await?;
        peripheral.unsubscribe(&characteristic).await?;
        Ok(())
    }

    async fn descriptors(&self, handle: &CharacteristicHandle) -> Result<Vec<DescriptorHandle>> {
        let (_, characteristic) = self.resolve(handle).await?;
        Ok(characteristic
            .descriptors
            .iter()
            .map(|d| DescriptorHandle {
                device_id: handle.device_id.clone(),
                characteristic: handle.index,
                uuid: d.uuid,
            })
            .collect())
    }

    async fn read_descriptor(&self, handle: &DescriptorHandle) -> Result<Vec<u8>> {
        let (peripheral, descriptor) = {
            let devices = self.devices.read().await;
            let entry = devices
                .get(&handle.device_id)
                .ok_or_else(|| Error::device_not_found(&handle.device_id))?;
            if !entry.connected {
                return Err(Error::NotConnected);
            }
            let descriptor = entry
                .characteristics
                .get(handle.characteristic)
                .and_then(|c| c.descriptors.iter().find(|d| d.uuid == handle.uuid))
                .cloned()
                .ok_or_else(|| Error::operation_failed("read descriptor", handle.uuid, "stale handle"))?;
            (entry.peripheral.clone(), descriptor)
        };
        Ok(peripheral.read_descriptor(&descriptor).await?)
    }
}
