//! BLE communication module.
//!
//! GATT transport seam, btleplug backend, and the session components:
//! connection lifecycle, service resolution, characteristic registry, and
//! notification subscription.

pub mod btle;
pub mod connection;
pub mod gatt;
pub mod registry;
pub mod resolver;
pub mod subscriber;
pub mod uuids;

pub use btle::{BtleCentral, BtlePeripheral};
pub use connection::{ConnectionManager, SessionState, StateEvent};
pub use gatt::{
    CccdValue, CharacteristicInfo, DeviceTarget, GattCentral, GattPeripheral, Ops,
    PresentationFormat, RawNotification, ServiceHandle,
};
pub use registry::{CharacteristicRegistry, Role};
pub use resolver::{Resolution, ServiceResolver};
pub use subscriber::{NotificationSubscriber, Owner};
pub use uuids::*;
