//! Per-device connection lifecycle.
//!
//! A [`DeviceConnection`] moves between [`ConnectionState::Disconnected`],
//! [`ConnectionState::Connecting`] and [`ConnectionState::Connected`]. A
//! successful connect runs discovery for every [`ServiceKind`]; any
//! disconnect, requested or not, tears the discovered services down while
//! the connection's identity survives so it can be connected again.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use nevermore_types::{ConnectionState, DeviceSnapshot, OperationError, ServiceKind};

use crate::characteristic::OperationTimeouts;
use crate::error::{Error, Result};
use crate::events::{DeviceEvent, DeviceId, DisconnectReason, EventDispatcher};
use crate::services::{DiscoveryContext, EnvironmentalSensing, Fan, Service, Servo};
use crate::transport::{DeviceHandle, LinkLost, ServerHandle, SharedTransport, bounded};

/// Default timeout for establishing a GATT connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default timeout for each primary service lookup.
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for characteristic and descriptor reads.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for writes and notification (un)registration.
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeouts applied to every transport call a connection makes.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use nevermore_core::ConnectionConfig;
///
/// let config = ConnectionConfig::default()
///     .connection_timeout(Duration::from_secs(20))
///     .read_timeout(Duration::from_secs(15));
/// assert_eq!(config.write_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for establishing the GATT connection.
    pub connection_timeout: Duration,
    /// Timeout for each primary service lookup.
    pub discovery_timeout: Duration,
    /// Timeout for reads, including characteristic enumeration.
    pub read_timeout: Duration,
    /// Timeout for writes and notification (un)registration.
    pub write_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Longer timeouts for weak signals, thick walls or an enclosure in the
    /// way.
    pub fn challenging_environment() -> Self {
        Self {
            connection_timeout: Duration::from_secs(25),
            discovery_timeout: Duration::from_secs(15),
            read_timeout: Duration::from_secs(15),
            write_timeout: Duration::from_secs(15),
        }
    }

    /// Shorter timeouts for a controller that is nearby.
    pub fn fast() -> Self {
        Self {
            connection_timeout: Duration::from_secs(8),
            discovery_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
            write_timeout: Duration::from_secs(5),
        }
    }

    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the service discovery timeout.
    #[must_use]
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Per-characteristic operation timeouts.
    pub fn timeouts(&self) -> OperationTimeouts {
        OperationTimeouts {
            read: self.read_timeout,
            write: self.write_timeout,
        }
    }
}

#[derive(Default)]
struct Link {
    state: ConnectionState,
    last_error: Option<OperationError>,
    server: Option<ServerHandle>,
    services: BTreeMap<ServiceKind, Service>,
    /// Bumped on every connect attempt and every disconnect, so a discovery
    /// pass can tell that the link it started on is gone.
    generation: u64,
}

/// One Nevermore controller and its discovered services.
///
/// Share it as `Arc<DeviceConnection>`; [`connect`](Self::connect) needs the
/// `Arc` to watch for unsolicited disconnects.
///
/// Call [`disconnect`](Self::disconnect) before dropping a connected device
/// so notification registrations are released on the peripheral.
pub struct DeviceConnection {
    device: DeviceHandle,
    transport: SharedTransport,
    config: ConnectionConfig,
    events: EventDispatcher,
    link: RwLock<Link>,
    watcher: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for DeviceConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceConnection")
            .field("id", &self.device.id)
            .field("name", &self.device.name)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeviceConnection {
    /// Create a disconnected connection with its own event dispatcher.
    pub fn new(
        id: impl Into<String>,
        name: Option<String>,
        transport: SharedTransport,
        config: ConnectionConfig,
    ) -> Arc<Self> {
        Self::with_events(id, name, transport, config, EventDispatcher::default())
    }

    /// Create a disconnected connection that publishes to `events`.
    pub fn with_events(
        id: impl Into<String>,
        name: Option<String>,
        transport: SharedTransport,
        config: ConnectionConfig,
        events: EventDispatcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            device: DeviceHandle {
                id: id.into(),
                name,
            },
            transport,
            config,
            events,
            link: RwLock::new(Link::default()),
            watcher: Mutex::new(None),
        })
    }

    /// Transport-level identifier.
    pub fn id(&self) -> &str {
        &self.device.id
    }

    /// Advertised name, if any.
    pub fn name(&self) -> Option<&str> {
        self.device.name.as_deref()
    }

    /// Connection configuration.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Event dispatcher this connection publishes to.
    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    fn event_id(&self) -> DeviceId {
        DeviceId {
            id: self.device.id.clone(),
            name: self.device.name.clone(),
        }
    }

    /// Current connection state.
    pub async fn state(&self) -> ConnectionState {
        self.link.read().await.state
    }

    /// Whether the device is connected.
    pub async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    /// Last connection-level error. Cleared by the next connect attempt.
    pub async fn last_error(&self) -> Option<OperationError> {
        self.link.read().await.last_error.clone()
    }

    /// The discovered service of `kind`, if present.
    pub async fn service(&self, kind: ServiceKind) -> Option<Service> {
        self.link.read().await.services.get(&kind).cloned()
    }

    /// Kinds found by the last discovery pass.
    pub async fn services(&self) -> Vec<ServiceKind> {
        self.link.read().await.services.keys().copied().collect()
    }

    /// The Environmental Sensing service, if discovered.
    pub async fn environmental(&self) -> Option<Arc<EnvironmentalSensing>> {
        match self.service(ServiceKind::EnvironmentalSensing).await {
            Some(Service::Environmental(s)) => Some(s),
            _ => None,
        }
    }

    /// The Fan service, if discovered.
    pub async fn fan(&self) -> Option<Arc<Fan>> {
        match self.service(ServiceKind::Fan).await {
            Some(Service::Fan(s)) => Some(s),
            _ => None,
        }
    }

    /// The Servo service, if discovered.
    pub async fn servo(&self) -> Option<Arc<Servo>> {
        match self.service(ServiceKind::Servo).await {
            Some(Service::Servo(s)) => Some(s),
            _ => None,
        }
    }

    /// Connect and discover every service.
    ///
    /// Returns the connected status. While a connect is already in flight
    /// this returns `Ok(false)` immediately; while connected it returns
    /// `Ok(true)` without touching the transport. A service that cannot be
    /// discovered is left absent and does not fail the connect.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the GATT connection could not be
    /// established; it is also recorded in [`last_error`](Self::last_error)
    /// and the state returns to disconnected.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %self.device.id))]
    pub async fn connect(self: &Arc<Self>) -> Result<bool> {
        let generation = {
            let mut link = self.link.write().await;
            match link.state {
                ConnectionState::Connecting => return Ok(false),
                ConnectionState::Connected => return Ok(true),
                ConnectionState::Disconnected => {}
            }
            link.state = ConnectionState::Connecting;
            link.last_error = None;
            link.generation += 1;
            link.generation
        };
        // Subscribe before connecting so no drop goes unseen.
        self.ensure_watcher();

        info!("Connecting to device...");
        let server = match bounded(
            "connect",
            self.config.connection_timeout,
            self.transport.connect(&self.device),
        )
        .await
        {
            Ok(server) => server,
            Err(e) => {
                let err = self.connect_error(e);
                self.connect_failed(generation, &err).await;
                return Err(err);
            }
        };

        {
            let mut link = self.link.write().await;
            if link.generation != generation {
                drop(link);
                debug!("Disconnected while connecting; closing the new link");
                let _ = self.transport.disconnect(&server).await;
                return Ok(false);
            }
            link.state = ConnectionState::Connected;
            link.server = Some(server.clone());
        }
        info!("Connected, discovering services...");

        if !self.discover(&server, generation).await {
            return Ok(false);
        }

        let services = self.services().await;
        info!(services = services.len(), "Discovery complete");
        self.events.send(DeviceEvent::Connected {
            device: self.event_id(),
            services,
        });
        Ok(true)
    }

    fn connect_error(&self, err: Error) -> Error {
        match err {
            Error::Bluetooth(e) => Error::connection_failed(Some(self.device.id.clone()), e.to_string()),
            other => other,
        }
    }

    async fn connect_failed(&self, generation: u64, err: &Error) {
        warn!(error = %err, "Connection failed");
        let recorded = err.to_operation_error();
        {
            let mut link = self.link.write().await;
            if link.generation == generation {
                link.state = ConnectionState::Disconnected;
                link.server = None;
            }
            link.last_error = Some(recorded.clone());
        }
        self.events.send(DeviceEvent::ConnectFailed {
            device: self.event_id(),
            error: recorded,
        });
    }

    /// Probe every service kind. Returns `false` if the link went away
    /// part-way; services built for the dead link are torn down.
    async fn discover(&self, server: &ServerHandle, generation: u64) -> bool {
        let ctx = DiscoveryContext {
            transport: self.transport.clone(),
            timeouts: self.config.timeouts(),
        };

        for kind in ServiceKind::ALL {
            let handle = match bounded(
                "discover service",
                self.config.discovery_timeout,
                self.transport.primary_service(server, kind.uuid()),
            )
            .await
            {
                Ok(Some(handle)) => handle,
                Ok(None) => {
                    debug!(service = %kind, "Service not present");
                    continue;
                }
                Err(e) => {
                    warn!(service = %kind, error = %e, "Service lookup failed");
                    continue;
                }
            };

            let service = Service::discover(kind, &ctx, &handle).await;
            let missing = service.missing();

            {
                let mut link = self.link.write().await;
                if link.generation != generation {
                    drop(link);
                    service.teardown().await;
                    debug!(service = %kind, "Discarding service discovered on a dropped link");
                    return false;
                }
                link.services.insert(kind, service);
            }

            if !missing.is_empty() {
                let err = Error::DiscoveryIncomplete {
                    service: kind.to_string(),
                    missing: missing.iter().map(|s| s.to_string()).collect(),
                };
                warn!(error = %err, "Service discovered with missing characteristics");
                self.events.send(DeviceEvent::DiscoveryIncomplete {
                    device: self.event_id(),
                    service: kind,
                    missing: missing.into_iter().map(String::from).collect(),
                });
            }
        }
        true
    }

    /// Tear down every service and close the GATT connection.
    ///
    /// Subscriptions are released before the connection is closed.
    /// Disconnecting a disconnected device succeeds.
    ///
    /// # Errors
    ///
    /// Returns the transport error if closing the connection failed. The
    /// local state is cleared regardless.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %self.device.id))]
    pub async fn disconnect(&self) -> Result<()> {
        self.close(DisconnectReason::UserRequested).await
    }

    /// Disconnect and stop watching for link events. Used when the device is
    /// removed for good.
    #[tracing::instrument(level = "info", skip_all, fields(device_id = %self.device.id))]
    pub async fn teardown(&self) {
        if let Err(e) = self.close(DisconnectReason::Removed).await {
            warn!(error = %e, "Disconnect during teardown failed");
        }
        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
        }
    }

    async fn close(&self, reason: DisconnectReason) -> Result<()> {
        let Some(server) = self.release(reason, None).await else {
            return Ok(());
        };
        info!("Disconnecting from device...");
        bounded(
            "disconnect",
            self.config.write_timeout,
            self.transport.disconnect(&server),
        )
        .await
    }

    /// Clear all discovered state and move to disconnected. Returns the
    /// server handle that was live, if any; `None` also when already
    /// disconnected, in which case nothing happens.
    ///
    /// With `lost`, only the link of that session is released; an event for
    /// an earlier session, such as the echo of a requested disconnect,
    /// leaves a newer link alone.
    async fn release(
        &self,
        reason: DisconnectReason,
        lost: Option<&LinkLost>,
    ) -> Option<ServerHandle> {
        let (server, services) = {
            let mut link = self.link.write().await;
            if link.state == ConnectionState::Disconnected {
                return None;
            }
            if let Some(lost) = lost
                && !link.server.as_ref().is_some_and(|server| lost.is_for(server))
            {
                return None;
            }
            link.state = ConnectionState::Disconnected;
            link.generation += 1;
            (link.server.take(), std::mem::take(&mut link.services))
        };

        for service in services.values() {
            service.teardown().await;
        }
        info!(device_id = %self.device.id, ?reason, "Device disconnected");
        self.events.send(DeviceEvent::Disconnected {
            device: self.event_id(),
            reason,
        });
        server
    }

    async fn handle_link_lost(&self, lost: &LinkLost) {
        if self.release(DisconnectReason::LinkLost, Some(lost)).await.is_some() {
            warn!(device_id = %self.device.id, "Connection lost");
        } else {
            debug!(session = lost.session, "Ignoring disconnect of an earlier session");
        }
    }

    fn lock_watcher(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_watcher(self: &Arc<Self>) {
        let mut watcher = self.lock_watcher();
        if watcher.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let mut events = self.transport.disconnect_events();
        let weak: Weak<Self> = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(lost) => {
                        let Some(connection) = weak.upgrade() else {
                            break;
                        };
                        if lost.device_id == connection.device.id {
                            connection.handle_link_lost(&lost).await;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Disconnect events lagged");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));
    }

    /// Point-in-time view of the device and every discovered slot.
    pub async fn snapshot(&self) -> DeviceSnapshot {
        let (state, error, services) = {
            let link = self.link.read().await;
            (
                link.state,
                link.last_error.clone(),
                link.services.values().cloned().collect::<Vec<_>>(),
            )
        };
        let mut snapshots = BTreeMap::new();
        for service in services {
            snapshots.insert(service.kind(), service.snapshot().await);
        }
        DeviceSnapshot {
            id: self.device.id.clone(),
            name: self.device.name.clone(),
            state,
            error,
            services: snapshots,
        }
    }

    /// Force the fan to `percent`, or release the override with `None`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the fan service or its
    /// override was not discovered, otherwise as
    /// [`Fan::set_power_override`].
    pub async fn set_power_override(&self, percent: Option<f64>) -> Result<()> {
        let fan = self
            .fan()
            .await
            .ok_or_else(|| Error::capability_missing("fan service"))?;
        fan.set_power_override(percent).await
    }

    /// Move the servo to `percent` of its range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the servo was not discovered,
    /// otherwise as [`Servo::set_position`].
    pub async fn set_servo_position(&self, percent: f64) -> Result<()> {
        let servo = self
            .servo()
            .await
            .ok_or_else(|| Error::capability_missing("servo service"))?;
        servo.set_position(percent).await
    }

    /// Set the servo PWM range.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CapabilityMissing`] if the servo was not discovered,
    /// otherwise as [`Servo::set_range`].
    pub async fn set_servo_range(&self, start: f64, end: f64) -> Result<()> {
        let servo = self
            .servo()
            .await
            .ok_or_else(|| Error::capability_missing("servo service"))?;
        servo.set_range(start, end).await
    }
}

impl Drop for DeviceConnection {
    fn drop(&mut self) {
        if let Some(watcher) = self.lock_watcher().take() {
            watcher.abort();
        }
        if self
            .link
            .try_read()
            .is_ok_and(|link| link.state != ConnectionState::Disconnected)
        {
            warn!(
                device_id = %self.device.id,
                "DeviceConnection dropped while connected; call disconnect() first"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCharacteristic, MockPeripheral, MockTransport};
    use crate::transport::GattTransport;
    use nevermore_types::{ErrorKind, uuids};

    const ID: &str = "AA:BB:CC:DD:EE:01";

    fn setup() -> (Arc<MockTransport>, Arc<DeviceConnection>) {
        let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore(ID)));
        let device = DeviceConnection::new(
            ID,
            Some("Nevermore".into()),
            mock.clone(),
            ConnectionConfig::fast(),
        );
        (mock, device)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[test]
    fn test_config_presets() {
        let fast = ConnectionConfig::fast();
        let slow = ConnectionConfig::challenging_environment();
        assert!(fast.connection_timeout < ConnectionConfig::default().connection_timeout);
        assert!(slow.connection_timeout > ConnectionConfig::default().connection_timeout);

        let config = ConnectionConfig::new().write_timeout(Duration::from_secs(3));
        assert_eq!(config.timeouts().write, Duration::from_secs(3));
        assert_eq!(config.timeouts().read, DEFAULT_READ_TIMEOUT);
    }

    #[tokio::test]
    async fn test_connect_discovers_services() {
        let (_, device) = setup();
        assert_eq!(device.state().await, ConnectionState::Disconnected);

        assert!(device.connect().await.unwrap());
        assert!(device.is_connected().await);
        assert!(device.environmental().await.is_some());
        assert!(device.fan().await.is_some());
        assert!(device.servo().await.is_some());
        assert!(matches!(
            device.service(ServiceKind::Cooler).await,
            Some(Service::Present(ServiceKind::Cooler))
        ));
        assert!(device.service(ServiceKind::NeoPixel).await.is_none());
        assert_eq!(device.services().await.len(), 5);
    }

    #[tokio::test]
    async fn test_connect_when_connected_is_noop() {
        let (mock, device) = setup();
        assert!(device.connect().await.unwrap());
        assert!(device.connect().await.unwrap());
        assert_eq!(mock.connect_count(ID), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_records_error() {
        let (mock, device) = setup();
        mock.fail_connect(true);
        let mut events = device.events().subscribe();

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, Error::ConnectionFailed { .. }));
        assert_eq!(device.state().await, ConnectionState::Disconnected);
        assert_eq!(
            device.last_error().await.map(|e| e.kind),
            Some(ErrorKind::ConnectionFailed)
        );
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::ConnectFailed { .. }
        ));

        mock.fail_connect(false);
        assert!(device.connect().await.unwrap());
        assert!(device.last_error().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_timeout() {
        let (mock, device) = setup();
        mock.set_latency(Duration::from_secs(30));

        let err = device.connect().await.unwrap_err();
        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(device.state().await, ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_discovery_failure_does_not_fail_connect() {
        let (mock, device) = setup();
        mock.fail_discovery(true);

        assert!(device.connect().await.unwrap());
        assert!(device.is_connected().await);
        assert!(device.services().await.is_empty());
        assert!(matches!(
            device.set_servo_position(50.0).await,
            Err(Error::CapabilityMissing { .. })
        ));
    }

    #[tokio::test]
    async fn test_link_loss_clears_state_and_reconnects() {
        let (mock, device) = setup();
        device.connect().await.unwrap();
        assert_eq!(mock.active_notifications(ID), 3);

        mock.simulate_disconnect(ID);
        settle().await;

        assert_eq!(device.state().await, ConnectionState::Disconnected);
        assert_eq!(device.id(), ID);
        assert!(device.fan().await.is_none());
        assert!(device.snapshot().await.services.is_empty());

        assert!(device.connect().await.unwrap());
        assert_eq!(mock.connect_count(ID), 2);
        assert!(device.fan().await.is_some());
        assert_eq!(mock.active_notifications(ID), 3);
    }

    #[tokio::test]
    async fn test_reconnect_right_after_disconnect() {
        for latency in [Duration::ZERO, Duration::from_millis(1)] {
            let (mock, device) = setup();
            mock.set_latency(latency);
            assert!(device.connect().await.unwrap());

            device.disconnect().await.unwrap();
            assert!(device.connect().await.unwrap(), "latency {latency:?}");
            settle().await;

            assert_eq!(device.state().await, ConnectionState::Connected);
            assert!(device.fan().await.is_some());
            assert!(mock.is_connected(ID));
            assert_eq!(mock.active_notifications(ID), 3);

            // A drop of the new link is still noticed.
            mock.simulate_disconnect(ID);
            settle().await;
            assert_eq!(device.state().await, ConnectionState::Disconnected);
        }
    }

    #[tokio::test]
    async fn test_stale_server_handle_does_not_close_new_link() {
        let mock = Arc::new(MockTransport::new().with_device(MockPeripheral::nevermore(ID)));
        let handle = DeviceHandle {
            id: ID.into(),
            name: None,
        };
        let old = mock.connect(&handle).await.unwrap();
        mock.disconnect(&old).await.unwrap();
        let new = mock.connect(&handle).await.unwrap();
        assert_ne!(old.session, new.session);

        mock.disconnect(&old).await.unwrap();
        assert!(mock.is_connected(ID));
    }

    #[tokio::test]
    async fn test_subscribe_failure_is_local_to_slot() {
        let (mock, device) = setup();
        mock.fail_subscribe(true);

        assert!(device.connect().await.unwrap());
        assert!(device.is_connected().await);
        assert_eq!(mock.active_notifications(ID), 0);

        let snapshot = device.snapshot().await;
        let aggregate = snapshot
            .service(ServiceKind::Fan)
            .and_then(|fan| fan.slot("aggregate"))
            .unwrap();
        assert!(!aggregate.subscribed);
        assert!(aggregate.value.is_some());
        assert_eq!(
            aggregate.error.as_ref().map(|e| e.kind),
            Some(ErrorKind::OperationFailed)
        );

        let environmental = snapshot.service(ServiceKind::EnvironmentalSensing).unwrap();
        let intake = environmental.slot("temperature_intake").unwrap();
        assert!(intake.value.is_some());
        assert!(intake.error.is_none());
        let override_slot = snapshot
            .service(ServiceKind::Fan)
            .and_then(|fan| fan.slot("power_override"))
            .unwrap();
        assert!(override_slot.value.is_some());
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_disconnect_releases_subscriptions_first() {
        let (mock, device) = setup();
        device.connect().await.unwrap();
        let fan = device.fan().await.unwrap();
        let mut events = device.events().subscribe();

        device.disconnect().await.unwrap();
        assert_eq!(mock.active_notifications(ID), 0);
        assert!(!mock.is_connected(ID));
        assert!(!fan.aggregate.as_ref().unwrap().is_subscribed().await);
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Disconnected {
                reason: DisconnectReason::UserRequested,
                ..
            }
        ));

        settle().await;
        // The transport's own disconnect event must not produce a second one.
        assert!(events.try_recv().is_err());
        device.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn test_discovery_incomplete_event() {
        let mock = Arc::new(MockTransport::new().with_device(
            MockPeripheral::new(ID, "Nevermore").service(
                uuids::FAN_SERVICE,
                vec![
                    MockCharacteristic::new(uuids::FAN_POWER_TACHO_AGGREGATE, vec![0, 0, 0])
                        .notify(),
                ],
            ),
        ));
        let device = DeviceConnection::new(ID, None, mock.clone(), ConnectionConfig::fast());
        let mut events = device.events().subscribe();

        assert!(device.connect().await.unwrap());
        match events.recv().await.unwrap() {
            DeviceEvent::DiscoveryIncomplete {
                service, missing, ..
            } => {
                assert_eq!(service, ServiceKind::Fan);
                assert_eq!(missing, vec!["power_override".to_string()]);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(matches!(
            events.recv().await.unwrap(),
            DeviceEvent::Connected { .. }
        ));
    }

    #[tokio::test]
    async fn test_commands_route_to_services() {
        let (mock, device) = setup();
        assert!(matches!(
            device.set_power_override(Some(50.0)).await,
            Err(Error::CapabilityMissing { .. })
        ));
        device.connect().await.unwrap();

        device.set_servo_position(120.0).await.unwrap();
        device.set_power_override(Some(50.0)).await.unwrap();
        device.set_servo_range(0.0, 80.0).await.unwrap();

        let writes = mock.writes(ID);
        assert_eq!(writes[0], (uuids::SERVO_POSITION, vec![0x10, 0x27]));
        assert_eq!(writes[1], (uuids::PERCENTAGE_8, vec![100]));
        assert_eq!(writes[2].0, uuids::SERVO_RANGE);
    }

    #[tokio::test]
    async fn test_snapshot() {
        let (_, device) = setup();
        let snapshot = device.snapshot().await;
        assert!(!snapshot.is_connected());
        assert!(snapshot.services.is_empty());

        device.connect().await.unwrap();
        let snapshot = device.snapshot().await;
        assert!(snapshot.is_connected());
        assert_eq!(snapshot.name.as_deref(), Some("Nevermore"));
        let fan = snapshot.service(ServiceKind::Fan).unwrap();
        assert!(fan.slot("aggregate").unwrap().subscribed);
        assert_eq!(
            snapshot
                .service(ServiceKind::EnvironmentalSensing)
                .unwrap()
                .slots
                .len(),
            12
        );
        assert!(
            snapshot
                .service(ServiceKind::Cooler)
                .unwrap()
                .slots
                .is_empty()
        );
        device.disconnect().await.unwrap();
    }
}
