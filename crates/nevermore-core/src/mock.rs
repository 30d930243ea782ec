//! In-memory GATT transport for testing.
//!
//! [`MockTransport`] implements [`GattTransport`] over a table of
//! [`MockPeripheral`]s, so connection, discovery and characteristic logic can
//! be exercised without BLE hardware.
//!
//! # Features
//!
//! - **Failure injection**: make connects, discovery, reads, writes or
//!   notification (un)registration fail
//! - **Latency simulation**: delay every transport call
//! - **Notification push**: deliver a payload to live subscriptions
//! - **Unsolicited disconnects**: drop a connection as the radio would
//! - **Inspection**: write log, read count, live notification registrations
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use nevermore_core::mock::{MockPeripheral, MockTransport};
//! use nevermore_core::{DeviceConnection, ConnectionConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore("dev-1")));
//!     let device = DeviceConnection::new(
//!         "dev-1",
//!         Some("Nevermore".to_string()),
//!         mock.clone(),
//!         ConnectionConfig::fast(),
//!     );
//!     assert!(device.connect().await.unwrap());
//!     assert!(device.fan().await.is_some());
//! }
//! ```

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::BufMut;
use futures::StreamExt;
use futures::channel::mpsc::{UnboundedSender, unbounded};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use nevermore_types::uuids;

use crate::error::{DeviceNotFoundReason, Error, Result};
use crate::scan::ScanOptions;
use crate::transport::{
    CharacteristicHandle, DescriptorHandle, DeviceHandle, GattTransport, LinkLost,
    NotificationStream, ServerHandle, ServiceHandle,
};

/// A characteristic exposed by a [`MockPeripheral`].
#[derive(Debug, Clone)]
pub struct MockCharacteristic {
    uuid: Uuid,
    value: Vec<u8>,
    notify: bool,
    description: Option<String>,
}

impl MockCharacteristic {
    /// A readable, writable characteristic holding `value`.
    pub fn new(uuid: Uuid, value: Vec<u8>) -> Self {
        Self {
            uuid,
            value,
            notify: false,
            description: None,
        }
    }

    /// Allow notifications.
    #[must_use]
    pub fn notify(mut self) -> Self {
        self.notify = true;
        self
    }

    /// Attach a user-description descriptor.
    #[must_use]
    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }
}

/// A simulated peripheral.
#[derive(Debug, Clone)]
pub struct MockPeripheral {
    id: String,
    name: Option<String>,
    services: Vec<(Uuid, Vec<MockCharacteristic>)>,
}

impl MockPeripheral {
    /// An empty peripheral.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: Some(name.into()),
            services: Vec::new(),
        }
    }

    /// An empty peripheral that advertises no name.
    pub fn unnamed(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            services: Vec::new(),
        }
    }

    /// Add a primary service.
    #[must_use]
    pub fn service(mut self, uuid: Uuid, characteristics: Vec<MockCharacteristic>) -> Self {
        self.services.push((uuid, characteristics));
        self
    }

    /// A controller with the environmental, fan and servo services fully
    /// populated, plus empty cooler and configuration services.
    ///
    /// Readings: intake 21.50 °C / 45.12 %RH / 101325.0 Pa, exhaust
    /// 28.75 °C, fan at 50 % and 1200 RPM with no override, servo at 50 %
    /// over a 0 to 100 % range.
    pub fn nevermore(id: impl Into<String>) -> Self {
        use nevermore_types::scalar::{HUMIDITY, PRESSURE, TEMPERATURE, VOC_INDEX, VOC_RAW};

        let environmental = nevermore_types::EnvironmentalData {
            temperature_intake: Some(21.5),
            temperature_exhaust: Some(28.75),
            temperature_mcu: Some(45.0),
            humidity_intake: Some(45.12),
            humidity_exhaust: Some(38.0),
            pressure_intake: Some(101_325.0),
            pressure_exhaust: Some(101_300.0),
            voc_index_intake: Some(100.0),
            voc_index_exhaust: Some(37.0),
            voc_raw_intake: Some(31_000.0),
            voc_raw_exhaust: Some(29_500.0),
        };
        let scalar = |uuid, format: nevermore_types::ScalarFormat, value: f64| {
            MockCharacteristic::new(uuid, format.encode(Some(value)))
        };

        let mut range = Vec::with_capacity(4);
        range.put_u16_le(0);
        range.put_u16_le(10_000);

        Self::new(id, uuids::DEVICE_NAME_PREFIX)
            .service(
                uuids::ENVIRONMENTAL_SENSING_SERVICE,
                vec![
                    scalar(uuids::TEMPERATURE, TEMPERATURE, 21.5),
                    scalar(uuids::TEMPERATURE, TEMPERATURE, 28.75),
                    scalar(uuids::TEMPERATURE, TEMPERATURE, 45.0),
                    scalar(uuids::HUMIDITY, HUMIDITY, 45.12),
                    scalar(uuids::HUMIDITY, HUMIDITY, 38.0),
                    scalar(uuids::PRESSURE, PRESSURE, 101_325.0),
                    scalar(uuids::PRESSURE, PRESSURE, 101_300.0),
                    scalar(uuids::VOC_INDEX, VOC_INDEX, 100.0),
                    scalar(uuids::VOC_INDEX, VOC_INDEX, 37.0),
                    scalar(uuids::VOC_RAW, VOC_RAW, 31_000.0),
                    scalar(uuids::VOC_RAW, VOC_RAW, 29_500.0),
                    MockCharacteristic::new(uuids::ENV_AGGREGATE, environmental.to_bytes())
                        .notify(),
                ],
            )
            .service(
                uuids::FAN_SERVICE,
                vec![
                    MockCharacteristic::new(uuids::FAN_POWER_TACHO_AGGREGATE, vec![100, 0xB0, 0x04])
                        .notify(),
                    MockCharacteristic::new(uuids::PERCENTAGE_8, vec![20])
                        .description("Fan Power - Passive"),
                    MockCharacteristic::new(uuids::PERCENTAGE_8, vec![200])
                        .description("Fan Power Override - Kick-start"),
                    MockCharacteristic::new(uuids::PERCENTAGE_8, vec![0xFF])
                        .description("Fan Power Override"),
                    MockCharacteristic::new(uuids::PERCENTAGE_8, vec![160])
                        .description("Fan Power - Automatic"),
                ],
            )
            .service(
                uuids::SERVO_SERVICE,
                vec![
                    MockCharacteristic::new(uuids::SERVO_POSITION, 5000u16.to_le_bytes().to_vec())
                        .notify(),
                    MockCharacteristic::new(uuids::SERVO_RANGE, range),
                ],
            )
            .service(uuids::COOLER_SERVICE, Vec::new())
            .service(uuids::CONFIGURATION_SERVICE, Vec::new())
    }
}

struct CharacteristicEntry {
    service: Uuid,
    spec: MockCharacteristic,
    subscriber: Option<UnboundedSender<Vec<u8>>>,
}

struct DeviceEntry {
    id: String,
    name: Option<String>,
    services: Vec<Uuid>,
    characteristics: Vec<CharacteristicEntry>,
    connected: bool,
    connect_count: u32,
    writes: Vec<(Uuid, Vec<u8>)>,
    /// Allowlist of the last device request; `None` grants every service.
    granted: Option<Vec<Uuid>>,
}

impl DeviceEntry {
    /// The connection's session; each connect starts a new one.
    fn session(&self) -> u64 {
        u64::from(self.connect_count)
    }

    fn drop_link(&mut self) {
        self.connected = false;
        for c in &mut self.characteristics {
            c.subscriber = None;
        }
    }

    /// Drop a live link, returning the event announcing it.
    fn lose_link(&mut self) -> Option<LinkLost> {
        if !self.connected {
            return None;
        }
        self.drop_link();
        Some(LinkLost {
            device_id: self.id.clone(),
            session: self.session(),
        })
    }
}

impl From<MockPeripheral> for DeviceEntry {
    fn from(p: MockPeripheral) -> Self {
        let mut services = Vec::new();
        let mut characteristics = Vec::new();
        for (service, chars) in p.services {
            services.push(service);
            characteristics.extend(chars.into_iter().map(|spec| CharacteristicEntry {
                service,
                spec,
                subscriber: None,
            }));
        }
        Self {
            id: p.id,
            name: p.name,
            services,
            characteristics,
            connected: false,
            connect_count: 0,
            writes: Vec::new(),
            granted: None,
        }
    }
}

/// An in-memory GATT transport.
pub struct MockTransport {
    devices: Mutex<Vec<DeviceEntry>>,
    disconnects: broadcast::Sender<LinkLost>,
    unavailable: AtomicBool,
    fail_connect: AtomicBool,
    fail_discovery: AtomicBool,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_subscribe: AtomicBool,
    fail_unsubscribe: AtomicBool,
    latency_ms: AtomicU64,
    read_count: AtomicU32,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("devices", &self.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// An empty transport.
    pub fn new() -> Self {
        let (disconnects, _) = broadcast::channel(16);
        Self {
            devices: Mutex::new(Vec::new()),
            disconnects,
            unavailable: AtomicBool::new(false),
            fail_connect: AtomicBool::new(false),
            fail_discovery: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_subscribe: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            read_count: AtomicU32::new(0),
        }
    }

    /// Add a peripheral.
    #[must_use]
    pub fn with_device(self, peripheral: MockPeripheral) -> Self {
        self.add_device(peripheral);
        self
    }

    /// Add a peripheral to a shared transport.
    pub fn add_device(&self, peripheral: MockPeripheral) {
        self.lock().push(peripheral.into());
    }

    fn lock(&self) -> MutexGuard<'_, Vec<DeviceEntry>> {
        self.devices.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_device_entry<R>(
        &self,
        device_id: &str,
        f: impl FnOnce(&mut DeviceEntry) -> Result<R>,
    ) -> Result<R> {
        let mut devices = self.lock();
        let entry = devices
            .iter_mut()
            .find(|d| d.id == device_id)
            .ok_or_else(|| Error::device_not_found(device_id))?;
        f(entry)
    }

    fn with_connected<R>(
        &self,
        device_id: &str,
        f: impl FnOnce(&mut DeviceEntry) -> Result<R>,
    ) -> Result<R> {
        self.with_device_entry(device_id, |entry| {
            if !entry.connected {
                return Err(Error::NotConnected);
            }
            f(entry)
        })
    }

    fn characteristic<'a>(
        entry: &'a mut DeviceEntry,
        handle: &CharacteristicHandle,
    ) -> Result<&'a mut CharacteristicEntry> {
        entry
            .characteristics
            .get_mut(handle.index)
            .filter(|c| c.spec.uuid == handle.uuid)
            .ok_or_else(|| Error::operation_failed("lookup", handle.uuid, "stale handle"))
    }

    async fn delay(&self) {
        let ms = self.latency_ms.load(Ordering::Relaxed);
        if ms > 0 {
            tokio::time::sleep(Duration::from_millis(ms)).await;
        }
    }

    /// Report no Bluetooth capability from device requests.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Fail every connect.
    pub fn fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::Relaxed);
    }

    /// Fail every primary service lookup.
    pub fn fail_discovery(&self, fail: bool) {
        self.fail_discovery.store(fail, Ordering::Relaxed);
    }

    /// Fail every characteristic and descriptor read.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::Relaxed);
    }

    /// Fail every write.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Fail every notification registration.
    pub fn fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::Relaxed);
    }

    /// Fail every notification deregistration.
    pub fn fail_unsubscribe(&self, fail: bool) {
        self.fail_unsubscribe.store(fail, Ordering::Relaxed);
    }

    /// Delay every transport call.
    pub fn set_latency(&self, latency: Duration) {
        let ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self.latency_ms.store(ms, Ordering::Relaxed);
    }

    /// Number of successful characteristic reads.
    pub fn read_count(&self) -> u32 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Replace the stored value of the `nth` characteristic with `uuid`.
    pub fn set_value(&self, device_id: &str, uuid: Uuid, nth: usize, value: Vec<u8>) {
        let mut devices = self.lock();
        if let Some(c) = devices
            .iter_mut()
            .filter(|d| d.id == device_id)
            .flat_map(|d| d.characteristics.iter_mut())
            .filter(|c| c.spec.uuid == uuid)
            .nth(nth)
        {
            c.spec.value = value;
        }
    }

    /// Push a notification to every live subscription on `uuid`.
    ///
    /// Returns how many subscriptions received it.
    pub fn notify(&self, device_id: &str, uuid: Uuid, value: Vec<u8>) -> usize {
        let mut devices = self.lock();
        let mut delivered = 0;
        for c in devices
            .iter_mut()
            .filter(|d| d.id == device_id)
            .flat_map(|d| d.characteristics.iter_mut())
            .filter(|c| c.spec.uuid == uuid)
        {
            if let Some(tx) = &c.subscriber
                && tx.unbounded_send(value.clone()).is_ok()
            {
                c.spec.value = value.clone();
                delivered += 1;
            }
        }
        delivered
    }

    /// Drop the connection as if the peripheral went out of range.
    pub fn simulate_disconnect(&self, device_id: &str) {
        let dropped = self
            .with_device_entry(device_id, |entry| Ok(entry.lose_link()))
            .ok()
            .flatten();
        if let Some(lost) = dropped {
            let _ = self.disconnects.send(lost);
        }
    }

    /// Whether `device_id` is connected.
    pub fn is_connected(&self, device_id: &str) -> bool {
        self.with_device_entry(device_id, |entry| Ok(entry.connected))
            .unwrap_or(false)
    }

    /// How many times `device_id` has been connected.
    pub fn connect_count(&self, device_id: &str) -> u32 {
        self.with_device_entry(device_id, |entry| Ok(entry.connect_count))
            .unwrap_or(0)
    }

    /// Live notification registrations on `device_id`.
    pub fn active_notifications(&self, device_id: &str) -> usize {
        self.with_device_entry(device_id, |entry| {
            Ok(entry
                .characteristics
                .iter()
                .filter(|c| c.subscriber.is_some())
                .count())
        })
        .unwrap_or(0)
    }

    /// Every successful write on `device_id`, in order.
    pub fn writes(&self, device_id: &str) -> Vec<(Uuid, Vec<u8>)> {
        self.with_device_entry(device_id, |entry| Ok(entry.writes.clone()))
            .unwrap_or_default()
    }
}

#[async_trait]
impl GattTransport for MockTransport {
    async fn request_device(
        &self,
        options: &ScanOptions,
        cancel: CancellationToken,
    ) -> Result<DeviceHandle> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(Error::TransportUnsupported);
        }
        self.delay().await;
        let found = self
            .lock()
            .iter_mut()
            .find(|d| options.matches(d.name.as_deref()))
            .map(|d| {
                d.granted = Some(options.optional_services.clone());
                DeviceHandle {
                    id: d.id.clone(),
                    name: d.name.clone(),
                }
            });
        if let Some(device) = found {
            return Ok(device);
        }
        tokio::select! {
            _ = cancel.cancelled() => Err(Error::UserCancelled),
            _ = tokio::time::sleep(options.timeout) => Err(Error::DeviceNotFound(
                DeviceNotFoundReason::ScanTimeout { duration: options.timeout },
            )),
        }
    }

    async fn connect(&self, device: &DeviceHandle) -> Result<ServerHandle> {
        self.delay().await;
        let fail = self.fail_connect.load(Ordering::Relaxed);
        self.with_device_entry(&device.id, |entry| {
            if fail {
                return Err(Error::connection_failed(
                    Some(entry.id.clone()),
                    "simulated connection failure",
                ));
            }
            entry.connected = true;
            entry.connect_count += 1;
            Ok(ServerHandle {
                device_id: entry.id.clone(),
                session: entry.session(),
            })
        })
    }

    async fn disconnect(&self, server: &ServerHandle) -> Result<()> {
        self.delay().await;
        let dropped = self.with_device_entry(&server.device_id, |entry| {
            if entry.session() != server.session {
                return Ok(None);
            }
            Ok(entry.lose_link())
        })?;
        if let Some(lost) = dropped {
            let _ = self.disconnects.send(lost);
        }
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
        self.delay().await;
        let fail = self.fail_discovery.load(Ordering::Relaxed);
        self.with_connected(&server.device_id, |entry| {
            if fail {
                return Err(Error::operation_failed(
                    "discover",
                    uuid,
                    "simulated discovery failure",
                ));
            }
            let granted = entry
                .granted
                .as_ref()
                .is_none_or(|granted| granted.contains(&uuid));
            Ok((granted && entry.services.contains(&uuid)).then(|| ServiceHandle {
                device_id: entry.id.clone(),
                uuid,
            }))
        })
    }

    async fn characteristics(
        &self,
        service: &ServiceHandle,
        uuid: Option<Uuid>,
    ) -> Result<Vec<CharacteristicHandle>> {
        self.delay().await;
        self.with_connected(&service.device_id, |entry| {
            Ok(entry
                .characteristics
                .iter()
                .enumerate()
                .filter(|(_, c)| c.service == service.uuid)
                .filter(|(_, c)| uuid.is_none_or(|u| u == c.spec.uuid))
                .map(|(index, c)| CharacteristicHandle {
                    device_id: entry.id.clone(),
                    service: service.uuid,
                    uuid: c.spec.uuid,
                    index,
                })
                .collect())
        })
    }

    async fn read(&self, characteristic: &CharacteristicHandle) -> Result<Vec<u8>> {
        self.delay().await;
        let fail = self.fail_reads.load(Ordering::Relaxed);
        let value = self.with_connected(&characteristic.device_id, |entry| {
            if fail {
                return Err(Error::operation_failed(
                    "read",
                    characteristic.uuid,
                    "simulated read failure",
                ));
            }
            Ok(Self::characteristic(entry, characteristic)?.spec.value.clone())
        })?;
        self.read_count.fetch_add(1, Ordering::Relaxed);
        Ok(value)
    }

    async fn write(&self, characteristic: &CharacteristicHandle, data: &[u8]) -> Result<()> {
        self.delay().await;
        let fail = self.fail_writes.load(Ordering::Relaxed);
        self.with_connected(&characteristic.device_id, |entry| {
            if fail {
                return Err(Error::operation_failed(
                    "write",
                    characteristic.uuid,
                    "simulated write failure",
                ));
            }
            Self::characteristic(entry, characteristic)?.spec.value = data.to_vec();
            entry.writes.push((characteristic.uuid, data.to_vec()));
            Ok(())
        })
    }

    async fn start_notifications(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<NotificationStream> {
        self.delay().await;
        let fail = self.fail_subscribe.load(Ordering::Relaxed);
        self.with_connected(&characteristic.device_id, |entry| {
            let c = Self::characteristic(entry, characteristic)?;
            if fail || !c.spec.notify {
                return Err(Error::operation_failed(
                    "subscribe",
                    characteristic.uuid,
                    "notifications not available",
                ));
            }
            let (tx, rx) = unbounded();
            c.subscriber = Some(tx);
            Ok(rx.boxed())
        })
    }

    async fn stop_notifications(&self, characteristic: &CharacteristicHandle) -> Result<()> {
        self.delay().await;
        let fail = self.fail_unsubscribe.load(Ordering::Relaxed);
        self.with_connected(&characteristic.device_id, |entry| {
            if fail {
                return Err(Error::operation_failed(
                    "unsubscribe",
                    characteristic.uuid,
                    "simulated unsubscribe failure",
                ));
            }
            Self::characteristic(entry, characteristic)?.subscriber = None;
            Ok(())
        })
    }

    async fn descriptors(
        &self,
        characteristic: &CharacteristicHandle,
    ) -> Result<Vec<DescriptorHandle>> {
        self.delay().await;
        self.with_connected(&characteristic.device_id, |entry| {
            let c = Self::characteristic(entry, characteristic)?;
            Ok(c.spec
                .description
                .as_ref()
                .map(|_| DescriptorHandle {
                    device_id: characteristic.device_id.clone(),
                    characteristic: characteristic.index,
                    uuid: uuids::USER_DESCRIPTION,
                })
                .into_iter()
                .collect())
        })
    }

    async fn read_descriptor(&self, descriptor: &DescriptorHandle) -> Result<Vec<u8>> {
        self.delay().await;
        let fail = self.fail_reads.load(Ordering::Relaxed);
        self.with_connected(&descriptor.device_id, |entry| {
            if fail {
                return Err(Error::operation_failed(
                    "read descriptor",
                    descriptor.uuid,
                    "simulated read failure",
                ));
            }
            entry
                .characteristics
                .get(descriptor.characteristic)
                .and_then(|c| c.spec.description.clone())
                .map(String::into_bytes)
                .ok_or_else(|| {
                    Error::operation_failed("read descriptor", descriptor.uuid, "stale handle")
                })
        })
    }
}
