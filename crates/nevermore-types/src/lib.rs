//! Platform-agnostic codecs and types for Nevermore air filter controllers.
//!
//! This crate holds everything about a Nevermore controller that does not
//! need a Bluetooth stack: the BLE SIG scalar codec, the fixed-layout
//! aggregate codecs, the GATT UUIDs, and the snapshot records the GATT client
//! (`nevermore-core`) hands to its callers.
//!
//! # Features
//!
//! - Scalar codec with "value is not known" sentinels
//! - Exact-length aggregate decoders for multi-field notifications
//! - Service and characteristic UUID constants
//! - Serde support for every data type (`serde` feature, on by default)
//!
//! # Example
//!
//! ```
//! use nevermore_types::{EnvironmentalData, ParseError};
//!
//! let err = EnvironmentalData::from_bytes(&[0u8; 4]).unwrap_err();
//! assert!(matches!(err, ParseError::MalformedPayload { expected: 26, .. }));
//! ```

pub mod aggregate;
pub mod error;
pub mod scalar;
pub mod types;
pub mod uuid;

pub use aggregate::{
    AggregateField, AggregateLayout, EnvironmentalData, FanAggregate, FanPowerTacho, ServoRange,
    ThermalLimit,
};
pub use error::{ParseError, ParseResult};
pub use scalar::{PhysicalValue, ScalarFormat};
pub use types::{
    ConnectionState, DeviceSnapshot, ErrorKind, OperationError, ServiceKind, ServiceSnapshot,
    SlotSnapshot, SlotValue,
};
pub use uuid as uuids;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = ParseError::MalformedPayload {
            layout: "fan power/tachometer aggregate",
            expected: 3,
            actual: 2,
        };
        assert_eq!(
            err.to_string(),
            "Malformed fan power/tachometer aggregate payload: expected 3 bytes, got 2"
        );

        let err = ParseError::InvalidData("test message".to_string());
        assert_eq!(err.to_string(), "Invalid data: test message");
    }

    #[test]
    fn test_aggregate_error_names_layout() {
        let err = FanPowerTacho::from_bytes(&[0x01]).unwrap_err();
        assert!(err.to_string().contains("fan power/tachometer"));
    }

    #[test]
    fn test_reexports() {
        assert_eq!(uuids::DEVICE_NAME_PREFIX, "Nevermore");
        assert_eq!(ServiceKind::ALL.len(), 9);
        assert_eq!(scalar::TEMPERATURE.width, 2);
    }
}
