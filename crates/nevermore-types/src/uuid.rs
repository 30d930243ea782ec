//! Bluetooth UUIDs for Nevermore controllers.
//!
//! This module contains the UUIDs needed to talk to a Nevermore filter
//! controller over Bluetooth Low Energy: the standard SIG services and
//! characteristics it reuses, and the vendor-specific ones it adds.
//!
//! The 16-bit SIG assignments are the standard values. The 128-bit
//! Nevermore service and characteristic UUIDs under the `4f2b7e10-...` base
//! are placeholders: they keep the vendor constants distinct and are what
//! the mock peripheral in `nevermore-core` exposes, but they are not the
//! firmware's values. Replace them with the firmware's table before talking
//! to a real controller over btleplug.

use uuid::{Uuid, uuid};

/// Advertised name prefix used when requesting a device.
pub const DEVICE_NAME_PREFIX: &str = "Nevermore";

// --- Standard BLE Service UUIDs ---

/// Environmental Sensing service (0x181A).
pub const ENVIRONMENTAL_SENSING_SERVICE: Uuid = uuid!("0000181a-0000-1000-8000-00805f9b34fb");

/// Device Information service (0x180A).
pub const DEVICE_INFO_SERVICE: Uuid = uuid!("0000180a-0000-1000-8000-00805f9b34fb");

// --- Nevermore Service UUIDs ---

/// Fan control and telemetry service.
pub const FAN_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d01");

/// Fan automatic-control policy service.
pub const FAN_POLICY_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d02");

/// Addressable LED strip service.
pub const NEOPIXEL_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d03");

/// On-board display service.
pub const DISPLAY_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d04");

/// Photocatalytic oxidation stage service.
pub const PHOTOCATALYTIC_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d05");

/// Cooler (thermal limit) service.
pub const COOLER_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d06");

/// Servo actuator (exhaust flap) service.
pub const SERVO_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d07");

/// Controller configuration service.
pub const CONFIGURATION_SERVICE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8d08");

// --- Standard Characteristic UUIDs ---

/// Temperature (0x2A6E), sint16, 0.01 °C.
pub const TEMPERATURE: Uuid = uuid!("00002a6e-0000-1000-8000-00805f9b34fb");

/// Humidity (0x2A6F), uint16, 0.01 %RH.
pub const HUMIDITY: Uuid = uuid!("00002a6f-0000-1000-8000-00805f9b34fb");

/// Pressure (0x2A6D), uint32, 0.1 Pa.
pub const PRESSURE: Uuid = uuid!("00002a6d-0000-1000-8000-00805f9b34fb");

/// Percentage 8 (0x2B04), uint8, 0.5 %.
pub const PERCENTAGE_8: Uuid = uuid!("00002b04-0000-1000-8000-00805f9b34fb");

// --- Nevermore Characteristic UUIDs ---

/// VOC index (Sensirion gas index, 0-500).
pub const VOC_INDEX: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e01");

/// Raw VOC sensor ticks.
pub const VOC_RAW: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e02");

/// Environmental aggregate (26 bytes, notify).
pub const ENV_AGGREGATE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e03");

/// Fan power and tachometer aggregate (3 bytes, notify).
pub const FAN_POWER_TACHO_AGGREGATE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e04");

/// Servo actuator position (Percentage16, notify + write).
pub const SERVO_POSITION: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e05");

/// Servo PWM range (two Percentage16 values, read + write).
pub const SERVO_RANGE: Uuid = uuid!("4f2b7e10-3c5a-4d8e-9f61-0b7a2c4e8e06");

// --- Descriptor UUIDs ---

/// Characteristic User Description descriptor (0x2901).
pub const USER_DESCRIPTION: Uuid = uuid!("00002901-0000-1000-8000-00805f9b34fb");

/// Services named in a device request so the host grants access to them.
pub const OPTIONAL_SERVICES: [Uuid; 10] = [
    ENVIRONMENTAL_SENSING_SERVICE,
    DEVICE_INFO_SERVICE,
    FAN_SERVICE,
    FAN_POLICY_SERVICE,
    NEOPIXEL_SERVICE,
    DISPLAY_SERVICE,
    PHOTOCATALYTIC_SERVICE,
    COOLER_SERVICE,
    SERVO_SERVICE,
    CONFIGURATION_SERVICE,
];
