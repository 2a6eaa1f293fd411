// Allow holding locks across await points - we use parking_lot which is designed for this
#![allow(clippy::await_holding_lock)]
// Allow unusual byte groupings for UUIDs which have standard format
#![allow(clippy::unusual_byte_groupings)]

//! # rigmon-ble
//!
//! A cross-platform Rust library for monitoring RigMon telemetry
//! peripherals via Bluetooth Low Energy.
//!
//! A RigMon peripheral exposes one custom telemetry service with three
//! notifying characteristics — speed, temperature, and runtime — and this
//! crate manages the GATT client session against it: connect, service
//! resolution, characteristic classification, subscription bookkeeping,
//! notification decoding, and safe teardown. A generic explorer path
//! covers arbitrary services and characteristics on the same device.
//!
//! ## Features
//!
//! - **Session management**: one entry point from device identifier to a
//!   monitoring session, with cleanup-first reconnects and idempotent
//!   teardown
//! - **Role classification**: discovered characteristics are matched
//!   against the static speed/temp/runtime table
//! - **Streaming**: per-role notify/indicate subscriptions with
//!   register-before-enable ordering
//! - **Value decoding**: presentation-format, heart-rate, battery-level,
//!   and result-payload rules with UTF-8 and hex-dump fallbacks
//! - **Explorer**: enumerate, read, write, and watch any characteristic
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use rigmon_ble::{BtleCentral, MonitorSession, Role};
//!
//! #[tokio::main]
//! async fn main() -> rigmon_ble::Result<()> {
//!     let central = Arc::new(BtleCentral::new().await?);
//!     let session = MonitorSession::new(central);
//!
//!     // The identifier comes from an external device picker.
//!     if session.start("rigmon-bench-01").await {
//!         tokio::time::sleep(std::time::Duration::from_secs(5)).await;
//!         println!("{}", session.display(Role::Speed));
//!         println!("{}", session.display(Role::Temp));
//!         println!("{}", session.display(Role::Runtime));
//!     }
//!
//!     session.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Platform Notes
//!
//! ### macOS
//! Requires Bluetooth permission. Add `NSBluetoothAlwaysUsageDescription`
//! to your Info.plist for bundled apps.
//!
//! ### Linux
//! Requires BlueZ. User may need to be in the `bluetooth` group.
//!
//! ### Windows
//! Requires Windows 10 or later with Bluetooth LE support.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serialization/deserialization for data types

// Public modules
pub mod ble;
pub mod decode;
pub mod error;
pub mod session;
pub mod status;

// Re-exports for convenience
pub use error::{Error, Result};
pub use session::{CallbackHandle, MonitorSession};

// Re-export commonly used types from submodules
pub use ble::btle::{BtleCentral, BtlePeripheral};
pub use ble::connection::{SessionState, StateEvent};
pub use ble::gatt::{
    CccdValue, CharacteristicInfo, DeviceTarget, GattCentral, GattPeripheral, Ops,
    PresentationFormat, RawNotification, ServiceHandle,
};
pub use ble::registry::Role;
pub use decode::{decode, DecodedValue, ValueSource};
pub use status::{DisplayFields, Severity, StatusEvent, StatusLog, NO_DATA};
