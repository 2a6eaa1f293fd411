//! btleplug-backed implementation of the GATT transport seam.
//!
//! Wraps `btleplug::platform::{Adapter, Peripheral}` behind
//! [`GattCentral`]/[`GattPeripheral`]. Every request/response call is
//! wrapped in an explicit timeout; the platform offers none of its own and
//! a peripheral that never answers would otherwise suspend the session
//! indefinitely.

use async_trait::async_trait;
use btleplug::api::{
    BDAddr, Central as _, CharPropFlags, Manager as _, Peripheral as _, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::stream::{BoxStream, StreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::ble::gatt::{
    CccdValue, CharacteristicInfo, DeviceTarget, GattCentral, GattPeripheral, Ops,
    PresentationFormat, RawNotification, ServiceHandle,
};
use crate::ble::uuids::PRESENTATION_FORMAT_UUID;
use crate::error::{Error, Result};

/// Upper bound on any single request/response exchange.
const OP_TIMEOUT: Duration = Duration::from_secs(10);

/// Convert a backend failure into a crate error kind.
fn map_btle_err(e: btleplug::Error, context: &str) -> Error {
    match e {
        btleplug::Error::PermissionDenied => Error::AccessDenied {
            context: context.to_string(),
        },
        btleplug::Error::NotConnected => Error::UnexpectedDisconnect,
        other => Error::Bluetooth(other),
    }
}

/// Await a backend call under the operation timeout.
async fn with_timeout<T, F>(operation: &str, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, btleplug::Error>>,
{
    match tokio::time::timeout(OP_TIMEOUT, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(map_btle_err(e, operation)),
        Err(_) => Err(Error::Timeout {
            operation: operation.to_string(),
        }),
    }
}

fn ops_from_flags(flags: CharPropFlags) -> Ops {
    let mut ops = Ops::empty();
    if flags.contains(CharPropFlags::READ) {
        ops = ops | Ops::READ;
    }
    if flags.contains(CharPropFlags::WRITE) {
        ops = ops | Ops::WRITE;
    }
    if flags.contains(CharPropFlags::WRITE_WITHOUT_RESPONSE) {
        ops = ops | Ops::WRITE_WITHOUT_RESPONSE;
    }
    if flags.contains(CharPropFlags::NOTIFY) {
        ops = ops | Ops::NOTIFY;
    }
    if flags.contains(CharPropFlags::INDICATE) {
        ops = ops | Ops::INDICATE;
    }
    ops
}

fn addr_to_u64(addr: BDAddr) -> u64 {
    addr.into_inner()
        .iter()
        .fold(0u64, |acc, b| (acc << 8) | u64::from(*b))
}

/// Adapter-level target resolution. No scanning happens here: the caller
/// supplies an identifier produced by an earlier discovery, and the
/// adapter's known-peripheral set is consulted directly.
pub struct BtleCentral {
    adapter: Adapter,
}

impl BtleCentral {
    /// Create a central over the first available Bluetooth adapter.
    ///
    /// # Errors
    ///
    /// Returns an error if Bluetooth is not available.
    pub async fn new() -> Result<Self> {
        let manager = Manager::new()
            .await
            .map_err(|_e| Error::BluetoothUnavailable)?;

        let adapters = manager.adapters().await.map_err(Error::Bluetooth)?;

        let adapter = adapters
            .into_iter()
            .next()
            .ok_or(Error::BluetoothUnavailable)?;

        info!(
            "Using Bluetooth adapter: {:?}",
            adapter.adapter_info().await.ok()
        );

        Ok(Self { adapter })
    }

    /// Create a central over a specific adapter.
    pub fn with_adapter(adapter: Adapter) -> Self {
        Self { adapter }
    }

    async fn matches(&self, peripheral: &Peripheral, target: &DeviceTarget) -> bool {
        match target {
            DeviceTarget::Address(addr) => match peripheral.properties().await {
                Ok(Some(props)) => addr_to_u64(props.address) == *addr,
                _ => false,
            },
            DeviceTarget::Id(id) => {
                if peripheral.id().to_string() == *id {
                    return true;
                }
                matches!(
                    peripheral.properties().await,
                    Ok(Some(props)) if props.local_name.as_deref() == Some(id.as_str())
                )
            }
        }
    }
}

#[async_trait]
impl GattCentral<BtlePeripheral> for BtleCentral {
    async fn locate(&self, target: &DeviceTarget) -> Result<BtlePeripheral> {
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(Error::Bluetooth)?;

        for peripheral in peripherals {
            if self.matches(&peripheral, target).await {
                let name = peripheral
                    .properties()
                    .await
                    .ok()
                    .flatten()
                    .and_then(|p| p.local_name)
                    .unwrap_or_else(|| peripheral.id().to_string());

                debug!("Located {} for target {}", name, target);
                return Ok(BtlePeripheral { peripheral, name });
            }
        }

        Err(Error::DeviceNotFound {
            identifier: target.to_string(),
        })
    }
}

/// A btleplug peripheral with its cached display name.
#[derive(Clone)]
pub struct BtlePeripheral {
    peripheral: Peripheral,
    name: String,
}

impl BtlePeripheral {
    fn find_characteristic(&self, uuid: &Uuid) -> Result<btleplug::api::Characteristic> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == *uuid)
            .ok_or_else(|| Error::Internal(format!("characteristic {} not discovered", uuid)))
    }
}

#[async_trait]
impl GattPeripheral for BtlePeripheral {
    async fn connect(&self) -> Result<()> {
        with_timeout("connect", self.peripheral.connect()).await
    }

    async fn disconnect(&self) -> Result<()> {
        match with_timeout("disconnect", self.peripheral.disconnect()).await {
            Ok(()) | Err(Error::UnexpectedDisconnect) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn discover_services(&self) -> Result<()> {
        with_timeout("service discovery", self.peripheral.discover_services()).await
    }

    async fn services(&self) -> Result<Vec<ServiceHandle>> {
        Ok(self
            .peripheral
            .services()
            .into_iter()
            .map(|s| ServiceHandle { uuid: s.uuid })
            .collect())
    }

    async fn characteristics(&self, service: &ServiceHandle) -> Result<Vec<CharacteristicInfo>> {
        let found = self
            .peripheral
            .services()
            .into_iter()
            .find(|s| s.uuid == service.uuid)
            .ok_or_else(|| Error::ServiceNotFound {
                uuid: service.uuid.to_string(),
            })?;

        let mut out = Vec::with_capacity(found.characteristics.len());

        for characteristic in found.characteristics {
            let mut formats = Vec::new();

            for descriptor in &characteristic.descriptors {
                if descriptor.uuid != PRESENTATION_FORMAT_UUID {
                    continue;
                }
                match with_timeout(
                    "presentation format read",
                    self.peripheral.read_descriptor(descriptor),
                )
                .await
                {
                    Ok(raw) => {
                        if let Some(format) = PresentationFormat::parse(&raw) {
                            formats.push(format);
                        }
                    }
                    Err(e) => {
                        // A characteristic without readable format metadata
                        // still decodes via the UUID rules.
                        warn!(
                            "Presentation format read failed for {}: {}",
                            characteristic.uuid, e
                        );
                    }
                }
            }

            trace!(
                "Characteristic {} props {:?} formats {}",
                characteristic.uuid,
                characteristic.properties,
                formats.len()
            );

            out.push(CharacteristicInfo {
                uuid: characteristic.uuid,
                service_uuid: service.uuid,
                ops: ops_from_flags(characteristic.properties),
                formats,
            });
        }

        Ok(out)
    }

    async fn read(&self, characteristic: &CharacteristicInfo) -> Result<Vec<u8>> {
        let target = self.find_characteristic(&characteristic.uuid)?;
        with_timeout("read", self.peripheral.read(&target))
            .await
            .map_err(|e| match e {
                Error::AccessDenied { .. } | Error::Timeout { .. } => e,
                other => Error::ReadFailed {
                    uuid: characteristic.uuid.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    async fn write(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
        with_response: bool,
    ) -> Result<()> {
        let target = self.find_characteristic(&characteristic.uuid)?;
        let write_type = if with_response {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };

        with_timeout("write", self.peripheral.write(&target, data, write_type))
            .await
            .map_err(|e| match e {
                Error::AccessDenied { .. } | Error::Timeout { .. } => e,
                other => Error::WriteFailed {
                    uuid: characteristic.uuid.to_string(),
                    reason: other.to_string(),
                },
            })
    }

    async fn write_cccd(
        &self,
        characteristic: &CharacteristicInfo,
        value: CccdValue,
    ) -> Result<()> {
        let target = self.find_characteristic(&characteristic.uuid)?;

        // The platform stack performs the actual CCCD write; notify vs.
        // indicate was already selected from the supported-operations set.
        match value {
            CccdValue::None => {
                with_timeout("cccd disable", self.peripheral.unsubscribe(&target)).await
            }
            CccdValue::Notify | CccdValue::Indicate => {
                with_timeout("cccd enable", self.peripheral.subscribe(&target)).await
            }
        }
    }

    async fn notifications(&self) -> Result<BoxStream<'static, RawNotification>> {
        let stream = self
            .peripheral
            .notifications()
            .await
            .map_err(Error::Bluetooth)?;

        Ok(stream
            .map(|n| RawNotification {
                uuid: n.uuid,
                data: n.value,
            })
            .boxed())
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }
}
