//! Notification subscription bookkeeping and dispatch.
//!
//! Per-characteristic ownership lives in an explicit registration table
//! keyed by characteristic UUID. Ordering rules the session depends on:
//!
//! - `subscribe` inserts the table entry **before** issuing the CCCD enable
//!   write; registering after enabling risks losing a notification that
//!   arrives in the gap.
//! - `unsubscribe` removes the table entry before issuing the best-effort
//!   CCCD disable write, so a notification racing teardown finds no owner
//!   and is dropped instead of touching released state.
//!
//! The three monitor roles hold independent subscriptions; the explorer
//! path holds at most one at a time.

use futures::stream::StreamExt;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::ble::gatt::{CccdValue, CharacteristicInfo, GattPeripheral, Ops};
use crate::ble::registry::{CharacteristicRegistry, Role};
use crate::decode::{decode, DecodedValue, ValueSource};
use crate::error::{Error, Result};
use crate::status::DisplayFields;

/// Who owns a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Owner {
    /// One of the monitor roles.
    Role(Role),
    /// The single ad-hoc explorer slot.
    Explorer,
}

/// An active subscription in the registration table.
#[derive(Debug, Clone)]
struct Subscription {
    characteristic: CharacteristicInfo,
    owner: Owner,
    cccd: CccdValue,
}

/// Enables/disables streaming per characteristic and routes notification
/// events to the decoder.
pub struct NotificationSubscriber {
    /// Registration table keyed by characteristic UUID. At most one entry
    /// per characteristic; always a subset of the most recent discovery.
    table: Arc<RwLock<HashMap<Uuid, Subscription>>>,
    /// UUID currently held by the explorer slot.
    explorer: RwLock<Option<Uuid>>,
    /// Decoded-value fan-out.
    value_tx: broadcast::Sender<DecodedValue>,
    /// Whether the dispatcher task is running.
    dispatching: Arc<AtomicBool>,
    /// Handle to the dispatcher task.
    dispatch_handle: RwLock<Option<tokio::task::JoinHandle<()>>>,
}

impl NotificationSubscriber {
    /// Create a subscriber with an empty table.
    pub fn new() -> Self {
        let (value_tx, _) = broadcast::channel(256);

        Self {
            table: Arc::new(RwLock::new(HashMap::new())),
            explorer: RwLock::new(None),
            value_tx,
            dispatching: Arc::new(AtomicBool::new(false)),
            dispatch_handle: RwLock::new(None),
        }
    }

    /// Subscribe to decoded values.
    pub fn subscribe_values(&self) -> broadcast::Receiver<DecodedValue> {
        self.value_tx.subscribe()
    }

    /// Pick the streaming mode for a characteristic: notify if supported,
    /// else indicate, else unsupported.
    fn select_cccd(characteristic: &CharacteristicInfo) -> Result<CccdValue> {
        if characteristic.ops.contains(Ops::NOTIFY) {
            Ok(CccdValue::Notify)
        } else if characteristic.ops.contains(Ops::INDICATE) {
            Ok(CccdValue::Indicate)
        } else {
            Err(Error::UnsupportedOperation {
                uuid: characteristic.uuid.to_string(),
                operation: "notify/indicate".to_string(),
            })
        }
    }

    /// Enable streaming for a characteristic on behalf of `owner`.
    ///
    /// The registration-table entry is inserted before the enable write is
    /// issued. If the write fails the entry is rolled back and
    /// [`Error::DescriptorWriteFailed`] is returned; the caller continues
    /// with its remaining characteristics.
    pub async fn subscribe<P: GattPeripheral>(
        &self,
        peripheral: &P,
        characteristic: &CharacteristicInfo,
        owner: Owner,
    ) -> Result<CccdValue> {
        let cccd = Self::select_cccd(characteristic)?;

        // The explorer slot holds at most one subscription at a time.
        if owner == Owner::Explorer {
            let previous = *self.explorer.read();
            if let Some(previous) = previous {
                if previous != characteristic.uuid {
                    self.unsubscribe(peripheral, &previous).await;
                }
            }
        }

        {
            let mut table = self.table.write();
            if let Some(existing) = table.get(&characteristic.uuid) {
                debug!(
                    "Already subscribed to {} as {:?}",
                    characteristic.uuid, existing.owner
                );
                return Ok(existing.cccd);
            }

            table.insert(
                characteristic.uuid,
                Subscription {
                    characteristic: characteristic.clone(),
                    owner,
                    cccd,
                },
            );
        }

        if let Err(e) = peripheral.write_cccd(characteristic, cccd).await {
            self.table.write().remove(&characteristic.uuid);
            return Err(Error::DescriptorWriteFailed {
                uuid: characteristic.uuid.to_string(),
                reason: e.to_string(),
            });
        }

        if owner == Owner::Explorer {
            *self.explorer.write() = Some(characteristic.uuid);
        }

        debug!(
            "Subscribed to {} ({}) as {:?}",
            characteristic.uuid, cccd, owner
        );

        Ok(cccd)
    }

    /// Disable streaming for a characteristic.
    ///
    /// The table entry is removed unconditionally before the disable write
    /// is issued; a write failure is logged, never fatal. Local state must
    /// not lag behind what the caller believes is unsubscribed.
    pub async fn unsubscribe<P: GattPeripheral>(&self, peripheral: &P, uuid: &Uuid) {
        let entry = self.table.write().remove(uuid);

        {
            let mut explorer = self.explorer.write();
            if *explorer == Some(*uuid) {
                *explorer = None;
            }
        }

        let Some(entry) = entry else {
            trace!("Unsubscribe for {} with no active subscription", uuid);
            return;
        };

        if let Err(e) = peripheral
            .write_cccd(&entry.characteristic, CccdValue::None)
            .await
        {
            warn!("Disable write for {} failed (ignored): {}", uuid, e);
        } else {
            debug!("Unsubscribed from {}", uuid);
        }
    }

    /// Tear down every subscription: the role slots in fixed order, then
    /// the explorer slot. Resets each role's display field to the
    /// placeholder. Idempotent.
    pub async fn unsubscribe_all<P: GattPeripheral>(
        &self,
        peripheral: &P,
        registry: &CharacteristicRegistry,
        fields: &DisplayFields,
    ) {
        for role in Role::MONITOR {
            let uuid = self
                .table
                .read()
                .values()
                .find(|s| s.owner == Owner::Role(role))
                .map(|s| s.characteristic.uuid);

            if let Some(uuid) = uuid {
                self.unsubscribe(peripheral, &uuid).await;
            }
            registry.clear_slot(role);
            fields.reset(role);
        }

        let explorer = *self.explorer.read();
        if let Some(uuid) = explorer {
            self.unsubscribe(peripheral, &uuid).await;
        }

        // Anything left over (e.g. an entry orphaned by a partial failure)
        // is cleared the same way.
        let stragglers: Vec<Uuid> = self.table.read().keys().copied().collect();
        for uuid in stragglers {
            self.unsubscribe(peripheral, &uuid).await;
        }
    }

    /// Number of active subscriptions.
    pub fn active_count(&self) -> usize {
        self.table.read().len()
    }

    /// Whether a characteristic currently has a subscription.
    pub fn is_subscribed(&self, uuid: &Uuid) -> bool {
        self.table.read().contains_key(uuid)
    }

    /// The CCCD state recorded for a characteristic.
    pub fn cccd_state(&self, uuid: &Uuid) -> CccdValue {
        self.table
            .read()
            .get(uuid)
            .map(|s| s.cccd)
            .unwrap_or(CccdValue::None)
    }

    /// UUID currently held by the explorer slot.
    pub fn explorer_subscription(&self) -> Option<Uuid> {
        *self.explorer.read()
    }

    /// Start the dispatcher task draining the peripheral's notification
    /// stream. Runs only while the session is monitoring; events for UUIDs
    /// with no table entry are dropped.
    pub async fn start_dispatch<P: GattPeripheral>(
        &self,
        peripheral: &P,
        fields: Arc<DisplayFields>,
    ) -> Result<()> {
        if self.dispatching.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut stream = match peripheral.notifications().await {
            Ok(stream) => stream,
            Err(e) => {
                self.dispatching.store(false, Ordering::SeqCst);
                return Err(e);
            }
        };

        let table = self.table.clone();
        let value_tx = self.value_tx.clone();
        let dispatching = self.dispatching.clone();

        let handle = tokio::spawn(async move {
            debug!("Notification dispatcher starting");

            while dispatching.load(Ordering::SeqCst) {
                tokio::select! {
                    event = stream.next() => {
                        let Some(event) = event else {
                            debug!("Notification stream ended (peripheral gone)");
                            break;
                        };

                        let entry = table.read().get(&event.uuid).cloned();
                        let Some(subscription) = entry else {
                            // Late event for a torn-down subscription, or a
                            // characteristic we never owned.
                            trace!("Dropping unowned notification from {}", event.uuid);
                            continue;
                        };

                        let text = decode(&event.data, &subscription.characteristic);

                        match subscription.owner {
                            Owner::Role(role) => {
                                // Monitor payloads are ASCII decimal text,
                                // trimmed of surrounding whitespace.
                                let text = text.trim().to_string();
                                fields.set(role, text.clone());
                                let _ = value_tx
                                    .send(DecodedValue::now(ValueSource::Role(role), text));
                            }
                            Owner::Explorer => {
                                let _ = value_tx.send(DecodedValue::now(
                                    ValueSource::Characteristic(event.uuid),
                                    text,
                                ));
                            }
                        }
                    }
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {
                        if !dispatching.load(Ordering::SeqCst) {
                            break;
                        }
                    }
                }
            }

            debug!("Notification dispatcher stopped");
        });

        *self.dispatch_handle.write() = Some(handle);

        Ok(())
    }

    /// Stop the dispatcher task.
    pub async fn stop_dispatch(&self) {
        self.dispatching.store(false, Ordering::SeqCst);

        let handle = self.dispatch_handle.write().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }
}

impl Default for NotificationSubscriber {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for NotificationSubscriber {
    fn drop(&mut self) {
        self.dispatching.store(false, Ordering::SeqCst);
    }
}
