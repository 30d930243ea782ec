//! Error types for nevermore-core.
//!
//! This module defines every error that can occur while talking to a
//! Nevermore controller over Bluetooth Low Energy.
//!
//! # Propagation
//!
//! Not every error reaches the caller. The table below lists where each
//! variant ends up.
//!
//! | Error | Surfaces as | Notes |
//! |-------|-------------|-------|
//! | [`Error::TransportUnsupported`] | Registry `last_error` | Host has no adapter |
//! | [`Error::UserCancelled`] | `Ok(None)` from a device request | Never displayed |
//! | [`Error::ConnectionFailed`] | Connection `last_error`, state back to disconnected | |
//! | [`Error::DiscoveryIncomplete`] | `warn!` log and a [`DeviceEvent`](crate::DeviceEvent) | Connect still succeeds |
//! | [`Error::MalformedPayload`] | Characteristic `last_error` | Value left unchanged |
//! | [`Error::OperationFailed`] | Characteristic `last_error` | Siblings unaffected |
//! | [`Error::CapabilityMissing`] | Returned to the caller | Precondition failure |
//! | [`Error::Timeout`] | Same place as the operation it bounded | |
//!
//! No operation is retried automatically. Retry is a caller decision.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use nevermore_types::{ErrorKind, OperationError, ParseError};

/// Errors that can occur when communicating with Nevermore controllers.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The host has no usable Bluetooth capability.
    #[error("Bluetooth is not available on this host")]
    TransportUnsupported,

    /// The user aborted the device request.
    #[error("Device request cancelled by user")]
    UserCancelled,

    /// The GATT connection could not be established.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// The device identifier that failed to connect.
        device_id: Option<String>,
        /// Why the connection failed.
        reason: String,
    },

    /// Expected characteristics were absent after discovery.
    #[error("Discovery incomplete for {service}: missing {}", .missing.join(", "))]
    DiscoveryIncomplete {
        /// The service that was being discovered.
        service: String,
        /// Names of the slots left empty.
        missing: Vec<String>,
    },

    /// A payload did not match its declared layout.
    #[error(transparent)]
    MalformedPayload(#[from] ParseError),

    /// A read, write or subscribe failed at the transport.
    #[error("{operation} failed on characteristic {uuid}: {reason}")]
    OperationFailed {
        /// The operation that failed.
        operation: &'static str,
        /// The characteristic UUID.
        uuid: Uuid,
        /// The reason for the failure.
        reason: String,
    },

    /// The caller used a characteristic that was never discovered.
    #[error("Capability missing: {capability}")]
    CapabilityMissing {
        /// What the caller tried to use.
        capability: String,
    },

    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// Operation attempted while not connected to the device.
    #[error("Not connected to device")]
    NotConnected,

    /// Device not found during scan or lookup.
    #[error("Device not found: {0}")]
    DeviceNotFound(DeviceNotFoundReason),

    /// A caller-supplied value was rejected.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Reason why a device was not found.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DeviceNotFoundReason {
    /// Device with the given identifier is not registered.
    NotFound {
        /// The identifier that was looked up.
        identifier: String,
    },
    /// Scan timed out before a matching device appeared.
    ScanTimeout {
        /// How long the scan ran.
        duration: Duration,
    },
}

impl std::fmt::Display for DeviceNotFoundReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { identifier } => write!(f, "device '{}' not found", identifier),
            Self::ScanTimeout { duration } => write!(f, "scan timed out after {:?}", duration),
        }
    }
}

impl Error {
    /// Create a device not found error for a specific identifier.
    pub fn device_not_found(identifier: impl Into<String>) -> Self {
        Self::DeviceNotFound(DeviceNotFoundReason::NotFound {
            identifier: identifier.into(),
        })
    }

    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a connection failure.
    pub fn connection_failed(device_id: Option<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            device_id,
            reason: reason.into(),
        }
    }

    /// Create an operation failure for a characteristic.
    pub fn operation_failed(operation: &'static str, uuid: Uuid, reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            operation,
            uuid,
            reason: reason.into(),
        }
    }

    /// Create a capability-missing error.
    pub fn capability_missing(capability: impl Into<String>) -> Self {
        Self::CapabilityMissing {
            capability: capability.into(),
        }
    }

    /// Coarse classification of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::TransportUnsupported => ErrorKind::TransportUnsupported,
            Error::UserCancelled => ErrorKind::UserCancelled,
            Error::ConnectionFailed { .. } => ErrorKind::ConnectionFailed,
            Error::DiscoveryIncomplete { .. } => ErrorKind::DiscoveryIncomplete,
            Error::MalformedPayload(_) => ErrorKind::MalformedPayload,
            Error::OperationFailed { .. } | Error::Bluetooth(_) => ErrorKind::OperationFailed,
            Error::CapabilityMissing { .. } => ErrorKind::CapabilityMissing,
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::NotConnected => ErrorKind::NotConnected,
            Error::DeviceNotFound(_) => ErrorKind::DeviceNotFound,
            Error::InvalidValue(_) => ErrorKind::InvalidValue,
        }
    }

    /// Record this error for a snapshot.
    pub fn to_operation_error(&self) -> OperationError {
        OperationError::new(self.kind(), self.to_string())
    }
}

impl From<&Error> for OperationError {
    fn from(err: &Error) -> Self {
        err.to_operation_error()
    }
}

/// Result type alias using nevermore-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::device_not_found("Nevermore 1");
        assert!(err.to_string().contains("Nevermore 1"));

        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::timeout("read", Duration::from_secs(10));
        assert!(err.to_string().contains("read"));
        assert!(err.to_string().contains("10s"));

        let err = Error::capability_missing("fan power override");
        assert_eq!(err.to_string(), "Capability missing: fan power override");
    }

    #[test]
    fn test_discovery_incomplete_lists_slots() {
        let err = Error::DiscoveryIncomplete {
            service: "Fan".into(),
            missing: vec!["power_override".into(), "aggregate".into()],
        };
        assert_eq!(
            err.to_string(),
            "Discovery incomplete for Fan: missing power_override, aggregate"
        );
    }

    #[test]
    fn test_operation_failed_names_uuid() {
        let err = Error::operation_failed(
            "write",
            nevermore_types::uuids::SERVO_POSITION,
            "GATT error",
        );
        let msg = err.to_string();
        assert!(msg.starts_with("write failed"));
        assert!(msg.contains(&nevermore_types::uuids::SERVO_POSITION.to_string()));
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = ParseError::MalformedPayload {
            layout: "servo range",
            expected: 4,
            actual: 3,
        };
        let err: Error = parse.clone().into();
        assert!(matches!(err, Error::MalformedPayload(ref p) if *p == parse));
        assert_eq!(err.kind(), ErrorKind::MalformedPayload);
        assert_eq!(err.to_string(), parse.to_string());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(Error::UserCancelled.kind(), ErrorKind::UserCancelled);
        assert_eq!(
            Error::TransportUnsupported.kind(),
            ErrorKind::TransportUnsupported
        );
        assert_eq!(
            Error::connection_failed(None, "refused").kind(),
            ErrorKind::ConnectionFailed
        );
        assert_eq!(
            Error::InvalidValue("NaN".into()).kind(),
            ErrorKind::InvalidValue
        );
    }

    #[test]
    fn test_to_operation_error() {
        let err = Error::timeout("subscribe", Duration::from_millis(500));
        let recorded = err.to_operation_error();
        assert_eq!(recorded.kind, ErrorKind::Timeout);
        assert_eq!(recorded.message, err.to_string());
    }

    #[test]
    fn test_device_not_found_reasons() {
        let err = Error::DeviceNotFound(DeviceNotFoundReason::ScanTimeout {
            duration: Duration::from_secs(30),
        });
        assert!(err.to_string().contains("30s"));

        let err = Error::device_not_found("AA:BB");
        assert!(err.to_string().contains("device 'AA:BB' not found"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        let err: Error = btleplug::Error::DeviceNotFound.into();
        assert!(matches!(err, Error::Bluetooth(_)));
        assert_eq!(err.kind(), ErrorKind::OperationFailed);
    }
}
