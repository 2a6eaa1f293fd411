//! Error types for the rigmon-ble crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// No device matched the requested address or identifier, or the
    /// connect call itself failed.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The address or identifier that was searched for.
        identifier: String,
    },

    /// Operation requires a connection but no device is connected.
    #[error("Not connected")]
    NotConnected,

    /// The target service was not present on the device.
    ///
    /// Triggers the one-time fallback enumeration of all services;
    /// not fatal to the session.
    #[error("Service not found: {uuid}")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// The platform stack refused access to an attribute.
    #[error("Access denied: {context}")]
    AccessDenied {
        /// Description of the refused operation.
        context: String,
    },

    /// Characteristic discovery failed for a service.
    ///
    /// Aborts subscription for that service without terminating the session.
    #[error("Characteristic discovery failed for service {service}")]
    CharacteristicDiscoveryFailed {
        /// The UUID of the service whose characteristics could not be listed.
        service: String,
    },

    /// A client-characteristic-configuration write failed.
    ///
    /// Logged and non-fatal; the session continues with the remaining
    /// characteristics.
    #[error("Descriptor write failed for {uuid}: {reason}")]
    DescriptorWriteFailed {
        /// The UUID of the characteristic whose CCCD write failed.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Reading a characteristic value failed.
    #[error("Read failed for {uuid}: {reason}")]
    ReadFailed {
        /// The UUID of the characteristic.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// Writing a characteristic value failed.
    #[error("Write failed for {uuid}: {reason}")]
    WriteFailed {
        /// The UUID of the characteristic.
        uuid: String,
        /// Description of the failure.
        reason: String,
    },

    /// The characteristic supports neither notify nor indicate, or the
    /// requested operation is outside its supported-operations set.
    #[error("Unsupported operation on {uuid}: {operation}")]
    UnsupportedOperation {
        /// The UUID of the characteristic.
        uuid: String,
        /// The operation that is not supported.
        operation: String,
    },

    /// The peripheral dropped the link on its own.
    ///
    /// Treated as already-cleaned-up rather than as a failure: handles are
    /// invalid and a subsequent `disconnect()` is a no-op.
    #[error("Unexpected disconnect")]
    UnexpectedDisconnect,

    /// A GATT request/response exchange did not complete in time.
    #[error("Operation timed out: {operation}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
