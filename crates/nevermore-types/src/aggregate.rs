//! Fixed-layout multi-field payloads.
//!
//! An aggregate characteristic packs several scalar fields into one payload
//! so a single notification carries a whole snapshot. Each layout is an
//! ordered list of `(offset, format)` pairs; the payload must be exactly as
//! long as the sum of the field widths.

use bytes::BufMut;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};
use crate::scalar::{
    HUMIDITY, PERCENTAGE_8, PERCENTAGE_16, PRESSURE, PhysicalValue, RPM, ScalarFormat,
    TEMPERATURE, VOC_INDEX, VOC_RAW,
};

/// One field of an [`AggregateLayout`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateField {
    /// Field name.
    pub name: &'static str,
    /// Byte offset within the payload.
    pub offset: usize,
    /// Wire format of the field.
    pub format: ScalarFormat,
}

const fn field(name: &'static str, offset: usize, format: ScalarFormat) -> AggregateField {
    AggregateField {
        name,
        offset,
        format,
    }
}

/// Ordered description of a multi-field payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateLayout {
    /// Layout name, used in error messages.
    pub name: &'static str,
    /// Fields in payload order.
    pub fields: &'static [AggregateField],
}

impl AggregateLayout {
    /// Total payload width in bytes.
    pub fn width(&self) -> usize {
        self.fields.iter().map(|f| f.format.width).sum()
    }

    /// Decode every field of `data`.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] unless `data` is exactly
    /// [`width`](Self::width) bytes long. Nothing is decoded in that case.
    pub fn decode(&self, data: &[u8]) -> ParseResult<Vec<PhysicalValue>> {
        let expected = self.width();
        if data.len() != expected {
            return Err(ParseError::MalformedPayload {
                layout: self.name,
                expected,
                actual: data.len(),
            });
        }
        Ok(self
            .fields
            .iter()
            .map(|f| {
                let mut buf = &data[f.offset..f.offset + f.format.width];
                f.format.decode_from(&mut buf)
            })
            .collect())
    }

    /// Encode one value per field into a payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InvalidData`] if `values` does not hold exactly
    /// one entry per field.
    pub fn encode(&self, values: &[PhysicalValue]) -> ParseResult<Vec<u8>> {
        if values.len() != self.fields.len() {
            return Err(ParseError::InvalidData(format!(
                "{} layout has {} fields, got {} values",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }
        let mut out = vec![0u8; self.width()];
        for (f, value) in self.fields.iter().zip(values) {
            let mut slot = &mut out[f.offset..f.offset + f.format.width];
            f.format.encode_into(*value, &mut slot);
        }
        Ok(out)
    }
}

/// Environmental aggregate: three temperatures and two each of humidity,
/// pressure, VOC index and raw VOC.
pub const ENVIRONMENTAL_LAYOUT: AggregateLayout = AggregateLayout {
    name: "environmental aggregate",
    fields: &[
        field("temperature_intake", 0, TEMPERATURE),
        field("temperature_exhaust", 2, TEMPERATURE),
        field("temperature_mcu", 4, TEMPERATURE),
        field("humidity_intake", 6, HUMIDITY),
        field("humidity_exhaust", 8, HUMIDITY),
        field("pressure_intake", 10, PRESSURE),
        field("pressure_exhaust", 14, PRESSURE),
        field("voc_index_intake", 18, VOC_INDEX),
        field("voc_index_exhaust", 20, VOC_INDEX),
        field("voc_raw_intake", 22, VOC_RAW),
        field("voc_raw_exhaust", 24, VOC_RAW),
    ],
};

/// Fan power and tachometer aggregate.
pub const FAN_POWER_TACHO_LAYOUT: AggregateLayout = AggregateLayout {
    name: "fan power/tachometer aggregate",
    fields: &[field("power", 0, PERCENTAGE_8), field("tachometer", 1, RPM)],
};

/// Full fan service aggregate.
pub const FAN_AGGREGATE_LAYOUT: AggregateLayout = AggregateLayout {
    name: "fan aggregate",
    fields: &[
        field("power", 0, PERCENTAGE_8),
        field("power_override", 1, PERCENTAGE_8),
        field("power_passive", 2, PERCENTAGE_8),
        field("power_automatic", 3, PERCENTAGE_8),
        field("power_coefficient", 4, PERCENTAGE_8),
        field("tachometer", 5, RPM),
    ],
};

/// Cooler thermal limit settings.
pub const THERMAL_LIMIT_LAYOUT: AggregateLayout = AggregateLayout {
    name: "thermal limit",
    fields: &[
        field("lower", 0, TEMPERATURE),
        field("upper", 2, TEMPERATURE),
        field("scaler", 4, PERCENTAGE_16),
    ],
};

/// Servo PWM range.
pub const SERVO_RANGE_LAYOUT: AggregateLayout = AggregateLayout {
    name: "servo range",
    fields: &[field("start", 0, PERCENTAGE_16), field("end", 2, PERCENTAGE_16)],
};

/// Decoded environmental aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnvironmentalData {
    /// Intake air temperature in °C.
    pub temperature_intake: PhysicalValue,
    /// Exhaust air temperature in °C.
    pub temperature_exhaust: PhysicalValue,
    /// Controller MCU temperature in °C.
    pub temperature_mcu: PhysicalValue,
    /// Intake relative humidity in %.
    pub humidity_intake: PhysicalValue,
    /// Exhaust relative humidity in %.
    pub humidity_exhaust: PhysicalValue,
    /// Intake pressure in Pa.
    pub pressure_intake: PhysicalValue,
    /// Exhaust pressure in Pa.
    pub pressure_exhaust: PhysicalValue,
    /// Intake VOC index.
    pub voc_index_intake: PhysicalValue,
    /// Exhaust VOC index.
    pub voc_index_exhaust: PhysicalValue,
    /// Intake raw VOC ticks.
    pub voc_raw_intake: PhysicalValue,
    /// Exhaust raw VOC ticks.
    pub voc_raw_exhaust: PhysicalValue,
}

impl EnvironmentalData {
    /// Payload width in bytes.
    pub const WIDTH: usize = 26;

    /// Parse an environmental aggregate payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`Self::WIDTH`] bytes long.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let v = ENVIRONMENTAL_LAYOUT.decode(data)?;
        Ok(Self {
            temperature_intake: v[0],
            temperature_exhaust: v[1],
            temperature_mcu: v[2],
            humidity_intake: v[3],
            humidity_exhaust: v[4],
            pressure_intake: v[5],
            pressure_exhaust: v[6],
            voc_index_intake: v[7],
            voc_index_exhaust: v[8],
            voc_raw_intake: v[9],
            voc_raw_exhaust: v[10],
        })
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        for (f, value) in ENVIRONMENTAL_LAYOUT.fields.iter().zip([
            self.temperature_intake,
            self.temperature_exhaust,
            self.temperature_mcu,
            self.humidity_intake,
            self.humidity_exhaust,
            self.pressure_intake,
            self.pressure_exhaust,
            self.voc_index_intake,
            self.voc_index_exhaust,
            self.voc_raw_intake,
            self.voc_raw_exhaust,
        ]) {
            f.format.encode_into(value, &mut out);
        }
        out
    }
}

/// Decoded fan power and tachometer aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FanPowerTacho {
    /// Current fan power in %.
    pub power: PhysicalValue,
    /// Fan speed in RPM.
    pub tachometer: PhysicalValue,
}

impl FanPowerTacho {
    /// Payload width in bytes.
    pub const WIDTH: usize = 3;

    /// Parse a fan power/tachometer payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`Self::WIDTH`] bytes long.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let v = FAN_POWER_TACHO_LAYOUT.decode(data)?;
        Ok(Self {
            power: v[0],
            tachometer: v[1],
        })
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        PERCENTAGE_8.encode_into(self.power, &mut out);
        RPM.encode_into(self.tachometer, &mut out);
        out
    }
}

/// Decoded full fan aggregate.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FanAggregate {
    /// Current fan power in %.
    pub power: PhysicalValue,
    /// Manual override power in %, `None` when no override is set.
    pub power_override: PhysicalValue,
    /// Passive (idle) power in %.
    pub power_passive: PhysicalValue,
    /// Power requested by the automatic policy in %.
    pub power_automatic: PhysicalValue,
    /// Thermal scaling coefficient in %.
    pub power_coefficient: PhysicalValue,
    /// Fan speed in RPM.
    pub tachometer: PhysicalValue,
}

impl FanAggregate {
    /// Payload width in bytes.
    pub const WIDTH: usize = 7;

    /// Parse a full fan aggregate payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`Self::WIDTH`] bytes long.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let v = FAN_AGGREGATE_LAYOUT.decode(data)?;
        Ok(Self {
            power: v[0],
            power_override: v[1],
            power_passive: v[2],
            power_automatic: v[3],
            power_coefficient: v[4],
            tachometer: v[5],
        })
    }
}

/// Cooler thermal limit settings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ThermalLimit {
    /// Temperature at which cooling starts, in °C.
    pub lower: PhysicalValue,
    /// Temperature at which cooling is at full power, in °C.
    pub upper: PhysicalValue,
    /// Fan power scaler in %.
    pub scaler: PhysicalValue,
}

impl ThermalLimit {
    /// Payload width in bytes.
    pub const WIDTH: usize = 6;

    /// Parse a thermal limit payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`Self::WIDTH`] bytes long.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let v = THERMAL_LIMIT_LAYOUT.decode(data)?;
        Ok(Self {
            lower: v[0],
            upper: v[1],
            scaler: v[2],
        })
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        TEMPERATURE.encode_into(self.lower, &mut out);
        TEMPERATURE.encode_into(self.upper, &mut out);
        PERCENTAGE_16.encode_into(self.scaler, &mut out);
        out
    }
}

/// Servo PWM range as start and end percentages.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ServoRange {
    /// Start of the PWM range in %.
    pub start: PhysicalValue,
    /// End of the PWM range in %.
    pub end: PhysicalValue,
}

impl ServoRange {
    /// Payload width in bytes.
    pub const WIDTH: usize = 4;

    /// Parse a servo range payload.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`Self::WIDTH`] bytes long.
    pub fn from_bytes(data: &[u8]) -> ParseResult<Self> {
        let v = SERVO_RANGE_LAYOUT.decode(data)?;
        Ok(Self {
            start: v[0],
            end: v[1],
        })
    }

    /// Serialize into the wire layout.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(Self::WIDTH);
        out.put_slice(&PERCENTAGE_16.encode(self.start));
        out.put_slice(&PERCENTAGE_16.encode(self.end));
        out
    }
}
