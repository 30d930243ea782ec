//! BLE SIG scalar value codec.
//!
//! Every physical quantity a Nevermore controller exposes is an integer
//! "raw code" stored little-endian in 1 to 4 bytes, scaled by
//! `multiplier × 10^decimal_exponent × 2^binary_exponent`. One raw code per
//! format is reserved as the "value is not known" sentinel, which decodes to
//! `None` rather than a number.
//!
//! # Example
//!
//! ```
//! use nevermore_types::scalar::{PERCENTAGE_8, TEMPERATURE};
//!
//! assert_eq!(TEMPERATURE.decode(&2500i16.to_le_bytes()).unwrap(), Some(25.0));
//! assert_eq!(TEMPERATURE.decode(&[0xFF, 0x7F]).unwrap(), None);
//! assert_eq!(PERCENTAGE_8.encode(Some(100.0)), vec![200]);
//! ```

use bytes::{Buf, BufMut};

use crate::error::{ParseError, ParseResult};

/// A decoded measurement: `None` when the peripheral reports "not known".
///
/// Decoded values are never NaN.
pub type PhysicalValue = Option<f64>;

/// Static description of one scalar quantity's wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScalarFormat {
    /// Format name, used in error messages.
    pub name: &'static str,
    /// Unit of the decoded value.
    pub unit: &'static str,
    /// Width on the wire in bytes (1 to 4).
    pub width: usize,
    /// Whether the raw code is two's complement.
    pub signed: bool,
    /// Integer multiplier M.
    pub multiplier: i32,
    /// Decimal exponent d.
    pub decimal_exponent: i32,
    /// Binary exponent b.
    pub binary_exponent: i32,
    /// Raw bit pattern meaning "value is not known".
    pub sentinel: u32,
}

impl ScalarFormat {
    const fn new(
        name: &'static str,
        unit: &'static str,
        width: usize,
        signed: bool,
        decimal_exponent: i32,
        binary_exponent: i32,
        sentinel: u32,
    ) -> Self {
        Self {
            name,
            unit,
            width,
            signed,
            multiplier: 1,
            decimal_exponent,
            binary_exponent,
            sentinel,
        }
    }

    /// Returns the same format with a different "not known" sentinel.
    ///
    /// Some characteristics declare their own sentinel (for example a
    /// timeout that uses `0` to mean "disabled").
    #[must_use]
    pub const fn with_sentinel(mut self, sentinel: u32) -> Self {
        self.sentinel = sentinel;
        self
    }

    /// The value of one raw code step, `M × 10^d × 2^b`.
    pub fn resolution(&self) -> f64 {
        self.scale(1)
    }

    /// Decode exactly `width` bytes into a physical value.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::MalformedPayload`] if `data` is not exactly
    /// [`width`](Self::width) bytes long.
    pub fn decode(&self, data: &[u8]) -> ParseResult<PhysicalValue> {
        if data.len() != self.width {
            return Err(ParseError::MalformedPayload {
                layout: self.name,
                expected: self.width,
                actual: data.len(),
            });
        }
        let mut buf = data;
        Ok(self.decode_from(&mut buf))
    }

    /// Decode one value from the front of `buf`, advancing it by `width`.
    ///
    /// The caller must ensure at least `width` bytes remain.
    pub fn decode_from(&self, buf: &mut impl Buf) -> PhysicalValue {
        let bits = buf.get_uint_le(self.width) as u32;
        // Sentinel comparison happens on the raw bit pattern, before scaling.
        if bits == self.sentinel {
            return None;
        }
        Some(self.scale(self.sign_extend(bits)))
    }

    /// Encode a physical value into exactly `width` bytes.
    pub fn encode(&self, value: PhysicalValue) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.width);
        self.encode_into(value, &mut out);
        out
    }

    /// Append the encoding of `value` to `buf`.
    pub fn encode_into(&self, value: PhysicalValue, buf: &mut impl BufMut) {
        buf.put_uint_le(u64::from(self.raw_code(value)), self.width);
    }

    /// The raw bit pattern that `value` encodes to.
    ///
    /// `None` and NaN map to the sentinel. Other values are rounded to the
    /// nearest raw code and saturated to the representable range, which
    /// excludes the sentinel so a real measurement never reads back as
    /// "not known".
    pub fn raw_code(&self, value: PhysicalValue) -> u32 {
        let Some(value) = value.filter(|v| !v.is_nan()) else {
            return self.sentinel;
        };
        let (min, max) = self.raw_range();
        let raw = self.unscale(value).round();
        let raw = if raw <= min as f64 {
            min
        } else if raw >= max as f64 {
            max
        } else {
            raw as i64
        };
        (raw as u64 & self.mask()) as u32
    }

    fn mask(&self) -> u64 {
        (1u64 << (8 * self.width)) - 1
    }

    fn sign_extend(&self, bits: u32) -> i64 {
        if self.signed {
            let shift = 64 - 8 * self.width as u32;
            (i64::from(bits) << shift) >> shift
        } else {
            i64::from(bits)
        }
    }

    /// Inclusive raw code range, minus the sentinel when it sits at an edge.
    fn raw_range(&self) -> (i64, i64) {
        let bits = 8 * self.width as u32;
        let (mut min, mut max) = if self.signed {
            (-(1i64 << (bits - 1)), (1i64 << (bits - 1)) - 1)
        } else {
            (0, (1i64 << bits) - 1)
        };
        let sentinel = self.sign_extend(self.sentinel);
        if sentinel == max {
            max -= 1;
        } else if sentinel == min {
            min += 1;
        }
        (min, max)
    }

    fn scale(&self, raw: i64) -> f64 {
        let mut value = raw as f64 * f64::from(self.multiplier);
        if self.binary_exponent != 0 {
            value *= 2f64.powi(self.binary_exponent);
        }
        // Divide for negative exponents: 2500 / 100 is exact, 2500 * 0.01 is not.
        if self.decimal_exponent >= 0 {
            value * 10f64.powi(self.decimal_exponent)
        } else {
            value / 10f64.powi(-self.decimal_exponent)
        }
    }

    fn unscale(&self, value: f64) -> f64 {
        let mut raw = if self.decimal_exponent >= 0 {
            value / 10f64.powi(self.decimal_exponent)
        } else {
            value * 10f64.powi(-self.decimal_exponent)
        };
        if self.binary_exponent != 0 {
            raw /= 2f64.powi(self.binary_exponent);
        }
        raw / f64::from(self.multiplier)
    }
}

/// Temperature: sint16, 0.01 °C.
pub const TEMPERATURE: ScalarFormat =
    ScalarFormat::new("temperature", "°C", 2, true, -2, 0, 0x7FFF);

/// Relative humidity: uint16, 0.01 %RH.
pub const HUMIDITY: ScalarFormat = ScalarFormat::new("humidity", "%RH", 2, false, -2, 0, 0xFFFF);

/// Pressure: uint32, 0.1 Pa.
pub const PRESSURE: ScalarFormat =
    ScalarFormat::new("pressure", "Pa", 4, false, -1, 0, 0xFFFF_FFFF);

/// Percentage8: uint8, 0.5 %.
pub const PERCENTAGE_8: ScalarFormat =
    ScalarFormat::new("percentage8", "%", 1, false, 0, -1, 0xFF);

/// Percentage16 with 10^-2 resolution: uint16, 0.01 %.
pub const PERCENTAGE_16: ScalarFormat =
    ScalarFormat::new("percentage16", "%", 2, false, -2, 0, 0xFFFF);

/// Sensirion VOC index: uint16, unitless.
pub const VOC_INDEX: ScalarFormat = ScalarFormat::new("voc_index", "", 2, false, 0, 0, 0xFFFF);

/// Raw VOC sensor ticks: uint16.
pub const VOC_RAW: ScalarFormat = ScalarFormat::new("voc_raw", "", 2, false, 0, 0, 0xFFFF);

/// Fan speed: uint16, revolutions per minute.
pub const RPM: ScalarFormat = ScalarFormat::new("rpm", "RPM", 2, false, 0, 0, 0xFFFF);

/// Time in whole seconds: uint16.
pub const TIME_SECOND_16: ScalarFormat =
    ScalarFormat::new("time_second16", "s", 2, false, 0, 0, 0xFFFF);

/// Time in milliseconds: uint24, reported in seconds.
pub const TIME_MILLI_24: ScalarFormat =
    ScalarFormat::new("time_milli24", "s", 3, false, -3, 0, 0xFF_FFFF);

/// Event count: uint16.
pub const COUNT_16: ScalarFormat = ScalarFormat::new("count16", "", 2, false, 0, 0, 0xFFFF);

/// Every scalar format the controller uses.
pub const ALL_FORMATS: [ScalarFormat; 11] = [
    TEMPERATURE,
    HUMIDITY,
    PRESSURE,
    PERCENTAGE_8,
    PERCENTAGE_16,
    VOC_INDEX,
    VOC_RAW,
    RPM,
    TIME_SECOND_16,
    TIME_MILLI_24,
    COUNT_16,
];
