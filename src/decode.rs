//! Characteristic value decoding.
//!
//! [`decode`] turns raw notification/read bytes plus characteristic
//! metadata into a display string. The fallback chain runs in strict
//! precedence order; the same bytes can satisfy several rules and the
//! outcome depends on evaluation order:
//!
//! 1. exactly one declared presentation format (uint32-LE or UTF-8 text;
//!    any other declared format is reported as unsupported);
//! 2. no declared format and an empty payload;
//! 3. the standard Heart Rate Measurement layout;
//! 4. the standard Battery Level layout;
//! 5. application-specific result payloads (i32-LE);
//! 6. UTF-8 text, else an uppercase hex dump.
//!
//! Decoding never fails: every malformed input degrades to a readable
//! string, so a bad payload can never abort the session.

use bytes::Buf;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::ble::gatt::{CharacteristicInfo, PresentationFormat};
use crate::ble::registry::Role;
use crate::ble::uuids::{is_result_characteristic, BATTERY_LEVEL_UUID, HEART_RATE_MEASUREMENT_UUID};

/// Where a decoded value came from.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ValueSource {
    /// One of the monitor roles.
    Role(Role),
    /// An explorer characteristic, identified by raw UUID.
    Characteristic(Uuid),
}

/// A decoded value, produced per notification or read.
///
/// Transient: handed to subscribers for display and not retained.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DecodedValue {
    /// Origin of the value.
    pub source: ValueSource,
    /// Formatted display string.
    pub text: String,
    /// When the value was decoded.
    pub timestamp: DateTime<Utc>,
}

impl DecodedValue {
    /// Build a value stamped with the current time.
    pub fn now(source: ValueSource, text: String) -> Self {
        Self {
            source,
            text,
            timestamp: Utc::now(),
        }
    }
}

/// Decode raw bytes into a display string.
///
/// Pure function; see the module docs for the precedence chain.
pub fn decode(data: &[u8], characteristic: &CharacteristicInfo) -> String {
    // Rule 1: a single declared presentation format wins over everything.
    if let Some(format) = characteristic.sole_format() {
        return decode_declared(data, format);
    }

    // Rule 2: nothing declared and nothing received.
    if data.is_empty() {
        return "<empty data>".to_string();
    }

    // Rule 3: standard Heart Rate Measurement.
    if characteristic.uuid == HEART_RATE_MEASUREMENT_UUID {
        return decode_heart_rate(data);
    }

    // Rule 4: standard Battery Level.
    if characteristic.uuid == BATTERY_LEVEL_UUID {
        return format!("Battery Level: {}%", data[0]);
    }

    // Rule 5: application-specific result payloads.
    if is_result_characteristic(&characteristic.uuid) {
        if data.len() >= 4 {
            let mut buf = &data[..4];
            return buf.get_i32_le().to_string();
        }
        return unknown_format(data);
    }

    // Rule 6: UTF-8, else hex dump.
    match std::str::from_utf8(data) {
        Ok(text) => text.to_string(),
        Err(_) => unknown_format(data),
    }
}

/// Decode according to a declared presentation format.
fn decode_declared(data: &[u8], format: &PresentationFormat) -> String {
    if format.is_uint32() {
        if data.len() >= 4 {
            let mut buf = &data[..4];
            return buf.get_u32_le().to_string();
        }
        // Declared u32 but too few bytes; degrade rather than invent them.
        return unknown_format(data);
    }

    if format.is_utf8() {
        return match std::str::from_utf8(data) {
            Ok(text) => text.to_string(),
            Err(_) => unknown_format(data),
        };
    }

    format!("Unsupported format: 0x{:02X}", format.format)
}

/// Decode the standard Heart Rate Measurement layout: byte 0 is a flags
/// field whose bit 0 selects a 16-bit little-endian value at offset 1,
/// else an 8-bit value at offset 1.
fn decode_heart_rate(data: &[u8]) -> String {
    let flags = data[0];

    if flags & 0x01 != 0 {
        if data.len() >= 3 {
            let mut buf = &data[1..3];
            return buf.get_u16_le().to_string();
        }
    } else if data.len() >= 2 {
        return data[1].to_string();
    }

    // Flags promised a value the payload does not contain.
    unknown_format(data)
}

/// Uppercase hexadecimal dump with the unknown-format prefix.
fn unknown_format(data: &[u8]) -> String {
    let mut out = String::with_capacity("Unknown format: ".len() + data.len() * 2);
    out.push_str("Unknown format: ");
    for byte in data {
        out.push_str(&format!("{:02X}", byte));
    }
    out
}
