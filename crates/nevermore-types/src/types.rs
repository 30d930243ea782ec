//! Shared data types for Nevermore controllers.
//!
//! These are the plain records the GATT client hands to its callers: which
//! services a controller exposes, the connection state, and point-in-time
//! snapshots of every characteristic slot.

use core::fmt;
use std::collections::BTreeMap;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::aggregate::{EnvironmentalData, FanAggregate, FanPowerTacho, ServoRange, ThermalLimit};
use crate::scalar::PhysicalValue;
use crate::uuid as uuids;

/// Primary services probed on every connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ServiceKind {
    /// Standard Environmental Sensing service.
    EnvironmentalSensing,
    /// Fan control and telemetry.
    Fan,
    /// Fan automatic-control policy.
    FanPolicy,
    /// Addressable LED strip.
    NeoPixel,
    /// On-board display.
    Display,
    /// Photocatalytic oxidation stage.
    Photocatalytic,
    /// Cooler thermal limits.
    Cooler,
    /// Servo actuator.
    Servo,
    /// Controller configuration.
    Configuration,
}

impl ServiceKind {
    /// Every kind, in probe order.
    pub const ALL: [ServiceKind; 9] = [
        ServiceKind::EnvironmentalSensing,
        ServiceKind::Fan,
        ServiceKind::FanPolicy,
        ServiceKind::NeoPixel,
        ServiceKind::Display,
        ServiceKind::Photocatalytic,
        ServiceKind::Cooler,
        ServiceKind::Servo,
        ServiceKind::Configuration,
    ];

    /// GATT service UUID for this kind.
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        match self {
            ServiceKind::EnvironmentalSensing => uuids::ENVIRONMENTAL_SENSING_SERVICE,
            ServiceKind::Fan => uuids::FAN_SERVICE,
            ServiceKind::FanPolicy => uuids::FAN_POLICY_SERVICE,
            ServiceKind::NeoPixel => uuids::NEOPIXEL_SERVICE,
            ServiceKind::Display => uuids::DISPLAY_SERVICE,
            ServiceKind::Photocatalytic => uuids::PHOTOCATALYTIC_SERVICE,
            ServiceKind::Cooler => uuids::COOLER_SERVICE,
            ServiceKind::Servo => uuids::SERVO_SERVICE,
            ServiceKind::Configuration => uuids::CONFIGURATION_SERVICE,
        }
    }

    /// Look up the kind for a service UUID.
    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.uuid() == uuid)
    }

    /// Human-readable service name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            ServiceKind::EnvironmentalSensing => "Environmental Sensing",
            ServiceKind::Fan => "Fan",
            ServiceKind::FanPolicy => "Fan Policy",
            ServiceKind::NeoPixel => "NeoPixel",
            ServiceKind::Display => "Display",
            ServiceKind::Photocatalytic => "Photocatalytic",
            ServiceKind::Cooler => "Cooler",
            ServiceKind::Servo => "Servo",
            ServiceKind::Configuration => "Configuration",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Connection state of one device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum ConnectionState {
    /// Not connected. Initial state, and the state after any disconnect.
    #[default]
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Connected and discovered.
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

/// Coarse classification of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[non_exhaustive]
pub enum ErrorKind {
    /// The host has no usable Bluetooth capability.
    TransportUnsupported,
    /// The user aborted a device request.
    UserCancelled,
    /// The GATT connection could not be established.
    ConnectionFailed,
    /// One or more expected characteristics were not found.
    DiscoveryIncomplete,
    /// A payload did not match its layout.
    MalformedPayload,
    /// A read, write or subscribe failed at the transport.
    OperationFailed,
    /// The requested characteristic was never discovered.
    CapabilityMissing,
    /// A transport call did not complete in time.
    Timeout,
    /// The device is not connected.
    NotConnected,
    /// No device matched.
    DeviceNotFound,
    /// A caller-supplied value was rejected.
    InvalidValue,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::TransportUnsupported => "transport unsupported",
            ErrorKind::UserCancelled => "user cancelled",
            ErrorKind::ConnectionFailed => "connection failed",
            ErrorKind::DiscoveryIncomplete => "discovery incomplete",
            ErrorKind::MalformedPayload => "malformed payload",
            ErrorKind::OperationFailed => "operation failed",
            ErrorKind::CapabilityMissing => "capability missing",
            ErrorKind::Timeout => "timeout",
            ErrorKind::NotConnected => "not connected",
            ErrorKind::DeviceNotFound => "device not found",
            ErrorKind::InvalidValue => "invalid value",
        };
        f.write_str(s)
    }
}

/// An error recorded on a characteristic or connection.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct OperationError {
    /// Error classification.
    pub kind: ErrorKind,
    /// Display text of the underlying error.
    pub message: String,
}

impl OperationError {
    /// Create a new recorded error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// The decoded value held by a characteristic slot.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "type", content = "value", rename_all = "snake_case"))]
pub enum SlotValue {
    /// A single scalar quantity.
    Scalar(PhysicalValue),
    /// Environmental aggregate.
    Environmental(EnvironmentalData),
    /// Fan power and tachometer.
    FanPowerTacho(FanPowerTacho),
    /// Full fan aggregate.
    FanAggregate(FanAggregate),
    /// Cooler thermal limit.
    ThermalLimit(ThermalLimit),
    /// Servo PWM range.
    ServoRange(ServoRange),
}

impl From<PhysicalValue> for SlotValue {
    fn from(value: PhysicalValue) -> Self {
        SlotValue::Scalar(value)
    }
}

impl From<EnvironmentalData> for SlotValue {
    fn from(value: EnvironmentalData) -> Self {
        SlotValue::Environmental(value)
    }
}

impl From<FanPowerTacho> for SlotValue {
    fn from(value: FanPowerTacho) -> Self {
        SlotValue::FanPowerTacho(value)
    }
}

impl From<FanAggregate> for SlotValue {
    fn from(value: FanAggregate) -> Self {
        SlotValue::FanAggregate(value)
    }
}

impl From<ThermalLimit> for SlotValue {
    fn from(value: ThermalLimit) -> Self {
        SlotValue::ThermalLimit(value)
    }
}

impl From<ServoRange> for SlotValue {
    fn from(value: ServoRange) -> Self {
        SlotValue::ServoRange(value)
    }
}

/// Point-in-time view of one discovered characteristic.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SlotSnapshot {
    /// Last value read, written or notified.
    pub value: Option<SlotValue>,
    /// When `value` last changed.
    #[cfg_attr(
        feature = "serde",
        serde(default, with = "time::serde::rfc3339::option")
    )]
    pub last_update: Option<OffsetDateTime>,
    /// Last recorded operation error.
    pub error: Option<OperationError>,
    /// Whether a notification subscription is live.
    pub subscribed: bool,
}

/// Point-in-time view of one service.
///
/// Every slot the service knows about has an entry; `None` means the
/// peripheral did not expose that characteristic.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServiceSnapshot {
    /// Which service this is.
    pub kind: ServiceKind,
    /// Slots keyed by name.
    pub slots: BTreeMap<String, Option<SlotSnapshot>>,
}

impl ServiceSnapshot {
    /// Create an empty snapshot for `kind`.
    pub fn new(kind: ServiceKind) -> Self {
        Self {
            kind,
            slots: BTreeMap::new(),
        }
    }

    /// Look up a slot by name. `None` if absent or unknown.
    pub fn slot(&self, name: &str) -> Option<&SlotSnapshot> {
        self.slots.get(name).and_then(Option::as_ref)
    }

    /// Names of slots the peripheral did not expose.
    pub fn missing(&self) -> Vec<&str> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.is_none())
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Point-in-time view of one device.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DeviceSnapshot {
    /// Transport-level device identifier.
    pub id: String,
    /// Advertised name, if any.
    pub name: Option<String>,
    /// Connection state.
    pub state: ConnectionState,
    /// Last connection-level error.
    pub error: Option<OperationError>,
    /// Services found by the last discovery pass, keyed by kind.
    pub services: BTreeMap<ServiceKind, ServiceSnapshot>,
}

impl DeviceSnapshot {
    /// Whether the device is connected.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Snapshot of one service, if it was discovered.
    pub fn service(&self, kind: ServiceKind) -> Option<&ServiceSnapshot> {
        self.services.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_kind_uuid_roundtrip() {
        for kind in ServiceKind::ALL {
            assert_eq!(ServiceKind::from_uuid(kind.uuid()), Some(kind));
        }
        assert_eq!(ServiceKind::from_uuid(uuids::DEVICE_INFO_SERVICE), None);
    }

    #[test]
    fn test_service_kinds_are_in_allowlist() {
        for kind in ServiceKind::ALL {
            assert!(uuids::OPTIONAL_SERVICES.contains(&kind.uuid()), "{kind}");
        }
    }

    #[test]
    fn test_connection_state_default() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }

    #[test]
    fn test_slot_value_from() {
        assert_eq!(SlotValue::from(Some(21.5)), SlotValue::Scalar(Some(21.5)));
        let range = ServoRange {
            start: Some(0.0),
            end: Some(100.0),
        };
        assert_eq!(SlotValue::from(range), SlotValue::ServoRange(range));
    }

    #[test]
    fn test_service_snapshot_missing() {
        let mut snapshot = ServiceSnapshot::new(ServiceKind::Fan);
        snapshot.slots.insert("aggregate".into(), Some(SlotSnapshot::default()));
        snapshot.slots.insert("power_override".into(), None);

        assert_eq!(snapshot.missing(), vec!["power_override"]);
        assert!(snapshot.slot("aggregate").is_some());
        assert!(snapshot.slot("power_override").is_none());
        assert!(snapshot.slot("nonexistent").is_none());
    }

    #[test]
    fn test_operation_error_display() {
        let err = OperationError::new(ErrorKind::OperationFailed, "GATT read failed");
        assert_eq!(err.to_string(), "operation failed: GATT read failed");
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_snapshot_serialization() {
        let mut services = BTreeMap::new();
        let mut servo = ServiceSnapshot::new(ServiceKind::Servo);
        servo.slots.insert(
            "position".into(),
            Some(SlotSnapshot {
                value: Some(SlotValue::Scalar(Some(50.0))),
                last_update: Some(OffsetDateTime::UNIX_EPOCH),
                error: None,
                subscribed: true,
            }),
        );
        services.insert(ServiceKind::Servo, servo);
        let snapshot = DeviceSnapshot {
            id: "AA:BB:CC:DD:EE:FF".into(),
            name: Some("Nevermore".into()),
            state: ConnectionState::Connected,
            error: None,
            services,
        };

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(json.contains("\"state\":\"connected\""));
        assert!(json.contains("\"last_update\":\"1970-01-01T00:00:00Z\""));
        assert!(json.contains("\"servo\":{\"kind\":\"servo\""));
        assert!(json.contains("\"type\":\"scalar\",\"value\":50.0"));
    }

    #[cfg(feature = "serde")]
    #[test]
    fn test_error_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&ErrorKind::CapabilityMissing).unwrap(),
            "\"capability_missing\""
        );
    }
}
