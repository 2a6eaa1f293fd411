//! Target service resolution.
//!
//! Finds the telemetry service on a connected device. Peripheral state is
//! authoritative: every resolve re-runs platform service discovery, never a
//! local cache, because services and their characteristics can change
//! between sessions. When the target service is absent the resolver falls
//! back to enumerating all services for the explorer path instead of
//! failing outright; the fallback runs at most once per connect attempt.

use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ble::gatt::{GattPeripheral, ServiceHandle};
use crate::error::{Error, Result};

/// Outcome of a resolve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The target service was found.
    Target(ServiceHandle),
    /// The target was absent; all services are enumerated for the explorer.
    Fallback(Vec<ServiceHandle>),
}

/// Resolves the target service on a connected device.
#[derive(Default)]
pub struct ServiceResolver {
    /// Set once the fallback enumeration has run for the current connect
    /// attempt.
    fallback_used: AtomicBool,
}

impl ServiceResolver {
    /// Create a new resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-arm the fallback. Called at the start of every connect attempt.
    pub fn reset(&self) {
        self.fallback_used.store(false, Ordering::SeqCst);
    }

    /// Resolve `service_uuid` on the peripheral.
    ///
    /// Returns [`Resolution::Fallback`] with the full service list the
    /// first time the target is missing; a repeat miss within the same
    /// connect attempt yields [`Error::ServiceNotFound`].
    pub async fn resolve<P: GattPeripheral>(
        &self,
        peripheral: &P,
        service_uuid: Uuid,
    ) -> Result<Resolution> {
        // Fresh discovery on every call; the peripheral is the only source
        // of truth for what it currently exposes.
        peripheral.discover_services().await?;
        let services = peripheral.services().await?;

        debug!("Discovered {} services", services.len());

        if let Some(service) = services.iter().find(|s| s.uuid == service_uuid) {
            info!("Resolved target service {}", service_uuid);
            return Ok(Resolution::Target(service.clone()));
        }

        if self.fallback_used.swap(true, Ordering::SeqCst) {
            warn!(
                "Service {} still absent after fallback enumeration",
                service_uuid
            );
            return Err(Error::ServiceNotFound {
                uuid: service_uuid.to_string(),
            });
        }

        info!(
            "Service {} not found; enumerating all {} services for the explorer",
            service_uuid,
            services.len()
        );
        Ok(Resolution::Fallback(services))
    }
}
