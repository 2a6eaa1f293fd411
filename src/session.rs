//! Monitor session: the single consuming surface over one peripheral.
//!
//! Sequences connect → service resolution → characteristic discovery →
//! per-role subscription, owns cleanup ordering, and exposes the explorer
//! operations for arbitrary services/characteristics. No failure leaves
//! this module as a raw backend error: everything is converted to a crate
//! error kind, reported to the status sink, and answered with best-effort
//! cleanup.
//!
//! Reentrancy is the caller's job: the consuming surface disables its own
//! trigger while a connect or teardown is in flight.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::connection::{ConnectionManager, SessionState, StateEvent};
use crate::ble::gatt::{CharacteristicInfo, DeviceTarget, GattCentral, GattPeripheral, Ops, ServiceHandle};
use crate::ble::registry::{CharacteristicRegistry, Role};
use crate::ble::resolver::{Resolution, ServiceResolver};
use crate::ble::subscriber::{NotificationSubscriber, Owner};
use crate::ble::uuids::TELEMETRY_SERVICE_UUID;
use crate::decode::{decode, DecodedValue, ValueSource};
use crate::error::{Error, Result};
use crate::status::{DisplayFields, StatusEvent, StatusLog};

/// Callback handle for unregistering callbacks.
pub struct CallbackHandle {
    id: u64,
    unregister_fn: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl CallbackHandle {
    /// Create a new callback handle.
    pub(crate) fn new(id: u64, unregister_fn: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            id,
            unregister_fn: Some(Box::new(unregister_fn)),
        }
    }

    /// Unregister this callback.
    pub fn unregister(mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }

    /// Get the callback ID.
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for CallbackHandle {
    fn drop(&mut self) {
        if let Some(f) = self.unregister_fn.take() {
            f();
        }
    }
}

/// GATT client session manager for one RigMon peripheral.
pub struct MonitorSession<P: GattPeripheral> {
    connection: ConnectionManager<P>,
    resolver: ServiceResolver,
    registry: CharacteristicRegistry,
    subscriber: NotificationSubscriber,
    status: StatusLog,
    fields: Arc<DisplayFields>,
    /// UUID of the service the monitor path targets.
    service_uuid: Uuid,
    /// Services enumerated by the resolver fallback, for the explorer.
    fallback_services: RwLock<Vec<ServiceHandle>>,
    callback_counter: AtomicU64,
}

impl<P: GattPeripheral> MonitorSession<P> {
    /// Create a session targeting the RigMon telemetry service.
    pub fn new(central: Arc<dyn GattCentral<P>>) -> Self {
        Self::with_service(central, TELEMETRY_SERVICE_UUID)
    }

    /// Create a session targeting an arbitrary service UUID.
    pub fn with_service(central: Arc<dyn GattCentral<P>>, service_uuid: Uuid) -> Self {
        Self {
            connection: ConnectionManager::new(central),
            resolver: ServiceResolver::new(),
            registry: CharacteristicRegistry::new(),
            subscriber: NotificationSubscriber::new(),
            status: StatusLog::new(),
            fields: Arc::new(DisplayFields::new()),
            service_uuid,
            fallback_services: RwLock::new(Vec::new()),
            callback_counter: AtomicU64::new(0),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    /// Subscribe to session state changes.
    pub fn subscribe_states(&self) -> broadcast::Receiver<StateEvent> {
        self.connection.subscribe_states()
    }

    /// Subscribe to status-sink events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusEvent> {
        self.status.subscribe()
    }

    /// Subscribe to decoded values.
    pub fn subscribe_values(&self) -> broadcast::Receiver<DecodedValue> {
        self.subscriber.subscribe_values()
    }

    /// Register a callback for decoded values.
    pub fn on_value<F>(&self, callback: F) -> CallbackHandle
    where
        F: Fn(DecodedValue) + Send + Sync + 'static,
    {
        let callback_id = self.callback_counter.fetch_add(1, Ordering::SeqCst);
        let mut rx = self.subscriber.subscribe_values();

        let handle = tokio::spawn(async move {
            while let Ok(value) = rx.recv().await {
                callback(value);
            }
        });

        CallbackHandle::new(callback_id, move || {
            handle.abort();
        })
    }

    /// Current display text for a role.
    pub fn display(&self, role: Role) -> String {
        self.fields.labelled(role)
    }

    /// Number of active subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.subscriber.active_count()
    }

    /// Start a session against `target`.
    ///
    /// The single entry point for both connect parameterizations (numeric
    /// radio address or platform identifier). Returns whether the session
    /// reached `Monitoring`; failures are reported to the status sink, not
    /// propagated.
    pub async fn start(&self, target: impl Into<DeviceTarget>) -> bool {
        let target = target.into();

        match self.try_start(&target).await {
            Ok(()) => true,
            Err(e) => {
                self.status.error(format!("Session start failed: {}", e));
                self.cleanup().await;
                false
            }
        }
    }

    async fn try_start(&self, target: &DeviceTarget) -> Result<()> {
        // Full cleanup before opening: at most one active connection.
        self.cleanup().await;
        self.resolver.reset();

        self.status.info(format!("Connecting to {}...", target));
        let device = self.connection.connect(target).await?;
        self.status
            .info(format!("Connected to {}", device.display_name()));

        match self.resolver.resolve(device.as_ref(), self.service_uuid).await? {
            Resolution::Target(service) => {
                let discovered = self.registry.discover(device.as_ref(), &service).await?;
                self.status.info(format!(
                    "Service resolved; {} characteristics discovered",
                    discovered.len()
                ));
            }
            Resolution::Fallback(services) => {
                self.status.info(format!(
                    "Target service not found; {} services available to the explorer",
                    services.len()
                ));
                *self.fallback_services.write() = services;
            }
        }

        self.connection.set_state(SessionState::Subscribing, None);
        let subscribed = self.subscribe_roles(device.as_ref()).await;

        self.subscriber
            .start_dispatch(device.as_ref(), self.fields.clone())
            .await?;
        self.connection.set_state(SessionState::Monitoring, None);

        if subscribed > 0 {
            self.status.info("Connected and subscribed.");
        } else {
            self.status
                .info("Connected; no monitor characteristics matched.");
        }

        Ok(())
    }

    /// Enable streaming for each matched role. One role's failure never
    /// prevents attempting the remaining roles.
    async fn subscribe_roles(&self, device: &P) -> usize {
        let mut subscribed = 0;

        for role in Role::MONITOR {
            let Some(characteristic) = self.registry.slot(role) else {
                debug!("No characteristic matched role {}", role);
                continue;
            };

            match self
                .subscriber
                .subscribe(device, &characteristic, Owner::Role(role))
                .await
            {
                Ok(cccd) => {
                    debug!("Role {} streaming via {}", role, cccd);
                    subscribed += 1;
                }
                Err(e) => {
                    warn!("Subscribing role {} failed: {}", role, e);
                    self.status
                        .error(format!("Subscribing {} failed: {}", role, e));
                    // The slot stays empty; its field keeps the placeholder.
                    self.registry.clear_slot(role);
                    self.fields.reset(role);
                }
            }
        }

        subscribed
    }

    /// Stop the session: unsubscribe everything, release handles.
    pub async fn stop(&self) {
        self.cleanup().await;
        self.status.info("Session stopped");
    }

    /// Teardown in dependency order: dispatcher, subscriptions, discovery
    /// state, device handle. Safe to call at any point, from any state.
    async fn cleanup(&self) {
        self.subscriber.stop_dispatch().await;

        if let Some(device) = self.connection.device() {
            self.subscriber
                .unsubscribe_all(device.as_ref(), &self.registry, &self.fields)
                .await;
        }

        self.registry.clear();
        self.fallback_services.write().clear();
        self.connection.disconnect().await;
        self.connection.set_state(SessionState::Disconnected, None);
    }

    // --- Explorer path -----------------------------------------------------

    /// Services available to the explorer: the fallback enumeration when
    /// the target service was absent, otherwise whatever the last
    /// discovery produced.
    pub async fn explorer_services(&self) -> Result<Vec<ServiceHandle>> {
        let fallback = self.fallback_services.read().clone();
        if !fallback.is_empty() {
            return Ok(fallback);
        }

        let device = self.require_device()?;
        device.services().await
    }

    /// Characteristics of one service, for the explorer. Unclassified
    /// characteristics are included; the monitor path skips them but they
    /// stay enumerable here.
    pub async fn explorer_characteristics(
        &self,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicInfo>> {
        let device = self.require_device()?;
        device
            .characteristics(service)
            .await
            .map_err(|_| Error::CharacteristicDiscoveryFailed {
                service: service.uuid.to_string(),
            })
    }

    /// Read and decode a characteristic value.
    pub async fn read_value(&self, characteristic: &CharacteristicInfo) -> Result<DecodedValue> {
        if !characteristic.ops.contains(Ops::READ) {
            return Err(Error::UnsupportedOperation {
                uuid: characteristic.uuid.to_string(),
                operation: "read".to_string(),
            });
        }

        let device = self.require_device()?;
        let data = device.read(characteristic).await?;
        let text = decode(&data, characteristic);

        Ok(DecodedValue::now(
            ValueSource::Characteristic(characteristic.uuid),
            text,
        ))
    }

    /// Write a characteristic value. Uses write-with-response when the
    /// characteristic supports it, write-without-response otherwise.
    pub async fn write_value(
        &self,
        characteristic: &CharacteristicInfo,
        data: &[u8],
    ) -> Result<()> {
        let with_response = if characteristic.ops.contains(Ops::WRITE) {
            true
        } else if characteristic.ops.contains(Ops::WRITE_WITHOUT_RESPONSE) {
            false
        } else {
            return Err(Error::UnsupportedOperation {
                uuid: characteristic.uuid.to_string(),
                operation: "write".to_string(),
            });
        };

        let device = self.require_device()?;
        device.write(characteristic, data, with_response).await
    }

    /// Subscribe the single explorer slot to a characteristic. A previous
    /// explorer subscription is torn down first.
    pub async fn watch(&self, characteristic: &CharacteristicInfo) -> Result<()> {
        let device = self.require_device()?;
        self.subscriber
            .subscribe(device.as_ref(), characteristic, Owner::Explorer)
            .await?;
        self.status
            .info(format!("Watching {}", characteristic.uuid));
        Ok(())
    }

    /// Release the explorer subscription, if any.
    pub async fn unwatch(&self) {
        let Some(uuid) = self.subscriber.explorer_subscription() else {
            return;
        };

        if let Some(device) = self.connection.device() {
            self.subscriber.unsubscribe(device.as_ref(), &uuid).await;
        }
        self.status.info(format!("Stopped watching {}", uuid));
    }

    fn require_device(&self) -> Result<Arc<P>> {
        self.connection.device().ok_or(Error::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_handle_unregisters_once() {
        use std::sync::atomic::AtomicUsize;

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        let handle = CallbackHandle::new(7, move || {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(handle.id(), 7);

        handle.unregister();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_callback_handle_drop_unregisters() {
        use std::sync::atomic::AtomicUsize;

        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();

        {
            let _handle = CallbackHandle::new(0, move || {
                count2.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
