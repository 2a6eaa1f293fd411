//! BLE Service and Characteristic UUIDs.
//!
//! Contains all UUID constants used for RigMon peripheral communication,
//! plus the static table mapping characteristic UUIDs to monitor roles.

use uuid::Uuid;

use crate::ble::registry::Role;

// RigMon Telemetry Service (Custom)
/// RigMon Telemetry Service UUID.
pub const TELEMETRY_SERVICE_UUID: Uuid = Uuid::from_u128(0xc8e1a001_30c4_4ff2_b1b5_0f4d5a7e6f10);
/// Speed characteristic UUID (Notify).
pub const SPEED_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xc8e1a002_30c4_4ff2_b1b5_0f4d5a7e6f10);
/// Temperature characteristic UUID (Notify).
pub const TEMP_CHARACTERISTIC_UUID: Uuid = Uuid::from_u128(0xc8e1a003_30c4_4ff2_b1b5_0f4d5a7e6f10);
/// Runtime characteristic UUID (Notify).
pub const RUNTIME_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xc8e1a004_30c4_4ff2_b1b5_0f4d5a7e6f10);

// RigMon calculation results (Custom)
/// Operation-result characteristic UUID (little-endian i32 payload).
pub const RESULT_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xc8e1a010_30c4_4ff2_b1b5_0f4d5a7e6f10);
/// Self-test-result characteristic UUID (little-endian i32 payload).
pub const SELF_TEST_RESULT_UUID: Uuid = Uuid::from_u128(0xc8e1a011_30c4_4ff2_b1b5_0f4d5a7e6f10);

// Standard BLE (16-bit, Bluetooth base UUID)
/// Heart Rate Measurement characteristic UUID.
pub const HEART_RATE_MEASUREMENT_UUID: Uuid =
    Uuid::from_u128(0x0000_2a37_0000_1000_8000_00805f9b34fb);
/// Battery Level characteristic UUID.
pub const BATTERY_LEVEL_UUID: Uuid = Uuid::from_u128(0x0000_2a19_0000_1000_8000_00805f9b34fb);
/// Client Characteristic Configuration descriptor UUID.
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x0000_2902_0000_1000_8000_00805f9b34fb);
/// Characteristic Presentation Format descriptor UUID.
pub const PRESENTATION_FORMAT_UUID: Uuid =
    Uuid::from_u128(0x0000_2904_0000_1000_8000_00805f9b34fb);

/// Check if a characteristic UUID carries an application-specific
/// little-endian i32 result payload.
pub fn is_result_characteristic(uuid: &Uuid) -> bool {
    *uuid == RESULT_CHARACTERISTIC_UUID || *uuid == SELF_TEST_RESULT_UUID
}

/// Classify a characteristic UUID into a monitor role.
///
/// Exact match against the static role table; everything else is
/// [`Role::Unclassified`].
pub fn role_for_uuid(uuid: &Uuid) -> Role {
    if *uuid == SPEED_CHARACTERISTIC_UUID {
        Role::Speed
    } else if *uuid == TEMP_CHARACTERISTIC_UUID {
        Role::Temp
    } else if *uuid == RUNTIME_CHARACTERISTIC_UUID {
        Role::Runtime
    } else {
        Role::Unclassified
    }
}
