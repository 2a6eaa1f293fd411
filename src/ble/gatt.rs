//! GATT transport seam and attribute data model.
//!
//! Session logic talks to the radio exclusively through the
//! [`GattPeripheral`] and [`GattCentral`] traits so it can be exercised
//! against a scripted peripheral in tests. The production implementation
//! over btleplug lives in [`crate::ble::btle`].

use async_trait::async_trait;
use futures::stream::BoxStream;
use uuid::Uuid;

use crate::error::Result;

/// Target of a connect attempt: a numeric radio address or a platform
/// device identifier string.
///
/// The two connect entry points are two parameterizations of the same
/// operation, so they share one variant type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DeviceTarget {
    /// 48-bit public/random device address, widened to u64.
    Address(u64),
    /// Platform-assigned device identifier (UUID string on macOS, path on
    /// Linux, ID string on Windows).
    Id(String),
}

impl std::fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Address(addr) => write!(f, "{:012X}", addr),
            Self::Id(id) => write!(f, "{}", id),
        }
    }
}

impl From<u64> for DeviceTarget {
    fn from(addr: u64) -> Self {
        Self::Address(addr)
    }
}

impl From<&str> for DeviceTarget {
    fn from(id: &str) -> Self {
        Self::Id(id.to_string())
    }
}

/// Supported-operations bitset for a characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Ops(u8);

impl Ops {
    /// Read is supported.
    pub const READ: Ops = Ops(0x01);
    /// Write with response is supported.
    pub const WRITE: Ops = Ops(0x02);
    /// Write without response is supported.
    pub const WRITE_WITHOUT_RESPONSE: Ops = Ops(0x04);
    /// Notify is supported.
    pub const NOTIFY: Ops = Ops(0x08);
    /// Indicate is supported.
    pub const INDICATE: Ops = Ops(0x10);

    /// Empty bitset.
    pub const fn empty() -> Self {
        Ops(0)
    }

    /// Union of two bitsets.
    pub const fn union(self, other: Ops) -> Ops {
        Ops(self.0 | other.0)
    }

    /// Check whether all operations in `other` are supported.
    pub const fn contains(self, other: Ops) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for Ops {
    type Output = Ops;

    fn bitor(self, rhs: Ops) -> Ops {
        self.union(rhs)
    }
}

/// Declared presentation format for a characteristic value.
///
/// Wraps the format octet of the Characteristic Presentation Format
/// descriptor. Only `uint32` and `utf8s` are decodable; any other declared
/// format is surfaced as unsupported by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PresentationFormat {
    /// The format octet from the descriptor.
    pub format: u8,
}

impl PresentationFormat {
    /// Format octet for an unsigned 32-bit integer.
    pub const UINT32: u8 = 0x08;
    /// Format octet for a UTF-8 string.
    pub const UTF8S: u8 = 0x19;

    /// Parse from a raw Characteristic Presentation Format descriptor value.
    ///
    /// Returns `None` for an empty descriptor.
    pub fn parse(raw: &[u8]) -> Option<Self> {
        raw.first().map(|&format| Self { format })
    }

    /// Whether the declared type is a little-endian u32.
    pub fn is_uint32(&self) -> bool {
        self.format == Self::UINT32
    }

    /// Whether the declared type is UTF-8 text.
    pub fn is_utf8(&self) -> bool {
        self.format == Self::UTF8S
    }
}

/// Client Characteristic Configuration value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CccdValue {
    /// Streaming disabled.
    #[default]
    None,
    /// Notifications enabled.
    Notify,
    /// Indications enabled.
    Indicate,
}

impl CccdValue {
    /// Wire encoding of the descriptor value (little-endian u16).
    pub fn as_bytes(&self) -> [u8; 2] {
        match self {
            Self::None => [0x00, 0x00],
            Self::Notify => [0x01, 0x00],
            Self::Indicate => [0x02, 0x00],
        }
    }
}

impl std::fmt::Display for CccdValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Notify => write!(f, "Notify"),
            Self::Indicate => write!(f, "Indicate"),
        }
    }
}

/// Handle to a service on a connected device.
///
/// A read-only view derived from the owning device handle; it becomes
/// invalid when that handle is released.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ServiceHandle {
    /// The service UUID.
    pub uuid: Uuid,
}

/// Descriptor of a discovered characteristic.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CharacteristicInfo {
    /// The characteristic UUID.
    pub uuid: Uuid,
    /// UUID of the containing service.
    pub service_uuid: Uuid,
    /// Supported operations.
    pub ops: Ops,
    /// Declared presentation formats, in descriptor order. Usually empty or
    /// a single entry; more than one means an aggregate value.
    pub formats: Vec<PresentationFormat>,
}

impl CharacteristicInfo {
    /// The single declared presentation format, if exactly one is declared.
    pub fn sole_format(&self) -> Option<&PresentationFormat> {
        match self.formats.as_slice() {
            [format] => Some(format),
            _ => None,
        }
    }
}

/// A notification or indication delivered by the platform stack.
#[derive(Debug, Clone)]
pub struct RawNotification {
    /// UUID of the originating characteristic.
    pub uuid: Uuid,
    /// The notified value.
    pub data: Vec<u8>,
}

/// Request/response surface of a connected peripheral.
///
/// Every method suspends the caller until the peripheral's radio response
/// arrives (or the backend's timeout fires); the notification stream is a
/// second, independent event source interleaved arbitrarily with these
/// calls.
#[async_trait]
pub trait GattPeripheral: Send + Sync + 'static {
    /// Open the link.
    async fn connect(&self) -> Result<()>;

    /// Close the link. Must succeed when the peripheral is already gone.
    async fn disconnect(&self) -> Result<()>;

    /// Run platform service discovery. Peripheral state is authoritative;
    /// implementations must not serve a cached result from a prior session.
    async fn discover_services(&self) -> Result<()>;

    /// Services found by the most recent discovery.
    async fn services(&self) -> Result<Vec<ServiceHandle>>;

    /// Characteristics of one service, with declared presentation formats
    /// resolved.
    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<CharacteristicInfo>>;

    /// Read a characteristic value.
    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>>;

    /// Write a characteristic value.
    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        with_response: bool,
    ) -> Result<()>;

    /// Write the client-characteristic-configuration for a characteristic.
    async fn write_cccd(&self, characteristic: &CharacteristicInfo, value: CccdValue)
        -> Result<()>;

    /// The notification event stream for this peripheral.
    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>>;

    /// Human-readable device name for the status sink.
    fn display_name(&self) -> String;
}

/// Produces a peripheral handle for a connect target.
///
/// Device discovery is assumed to have already happened; `locate` only
/// resolves an identifier the caller obtained elsewhere.
#[async_trait]
pub trait GattCentral<P: GattPeripheral>: Send + Sync {
    /// Resolve a target to a peripheral handle, or `DeviceNotFound`.
    async fn locate(&self, target: &DeviceTarget) -> Result<P>;
}
