//! Characteristic discovery and role classification.
//!
//! The registry turns a discovered service into an ordered list of
//! characteristic descriptors, classifies each by exact UUID match against
//! the static role table, and tracks the per-role slots the monitor path
//! subscribes from. Characteristics matching no known UUID are marked
//! unclassified: skipped by the monitor path but still enumerable by the
//! explorer path.

use parking_lot::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::ble::gatt::{CharacteristicInfo, GattPeripheral, ServiceHandle};
use crate::ble::uuids::role_for_uuid;
use crate::error::{Error, Result};

/// Application-level meaning assigned to a characteristic UUID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Rig speed, ASCII decimal text.
    Speed,
    /// Rig temperature, ASCII decimal text.
    Temp,
    /// Accumulated runtime, ASCII decimal text.
    Runtime,
    /// No role table match; explorer-only.
    Unclassified,
}

impl Role {
    /// The three monitor roles, in subscription/teardown order.
    pub const MONITOR: [Role; 3] = [Role::Speed, Role::Temp, Role::Runtime];

    /// Display label for the role's field.
    pub fn label(&self) -> &'static str {
        match self {
            Role::Speed => "SPEED",
            Role::Temp => "TEMP",
            Role::Runtime => "RUNTIME",
            Role::Unclassified => "UNCLASSIFIED",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-role tagged-absence slots.
///
/// One optional descriptor per monitor role; never a bare nullable
/// reference threaded through the session.
#[derive(Debug, Default)]
struct RoleSlots {
    speed: Option<CharacteristicInfo>,
    temp: Option<CharacteristicInfo>,
    runtime: Option<CharacteristicInfo>,
}

impl RoleSlots {
    fn slot_mut(&mut self, role: Role) -> Option<&mut Option<CharacteristicInfo>> {
        match role {
            Role::Speed => Some(&mut self.speed),
            Role::Temp => Some(&mut self.temp),
            Role::Runtime => Some(&mut self.runtime),
            Role::Unclassified => None,
        }
    }

    fn slot(&self, role: Role) -> Option<&CharacteristicInfo> {
        match role {
            Role::Speed => self.speed.as_ref(),
            Role::Temp => self.temp.as_ref(),
            Role::Runtime => self.runtime.as_ref(),
            Role::Unclassified => None,
        }
    }
}

/// Classifies discovered characteristics and tracks the per-role slots.
#[derive(Default)]
pub struct CharacteristicRegistry {
    slots: RwLock<RoleSlots>,
    /// All characteristics from the most recent discovery, in discovery
    /// order. The live subscription set is always a subset of this list.
    discovered: RwLock<Vec<CharacteristicInfo>>,
}

impl CharacteristicRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover the characteristics of a service and classify them.
    ///
    /// Returns the ordered descriptor list. Failure yields
    /// [`Error::CharacteristicDiscoveryFailed`] and leaves the previous
    /// discovery state cleared, so no stale slot can be subscribed.
    pub async fn discover<P: GattPeripheral>(
        &self,
        peripheral: &P,
        service: &ServiceHandle,
    ) -> Result<Vec<CharacteristicInfo>> {
        self.clear();

        let characteristics = peripheral.characteristics(service).await.map_err(|e| {
            warn!("Characteristic discovery failed for {}: {}", service.uuid, e);
            Error::CharacteristicDiscoveryFailed {
                service: service.uuid.to_string(),
            }
        })?;

        debug!(
            "Discovered {} characteristics in service {}",
            characteristics.len(),
            service.uuid
        );

        {
            let mut slots = self.slots.write();
            for characteristic in &characteristics {
                let role = role_for_uuid(&characteristic.uuid);
                if let Some(slot) = slots.slot_mut(role) {
                    debug!("Classified {} as {}", characteristic.uuid, role);
                    // First match wins if the peripheral repeats a UUID.
                    if slot.is_none() {
                        *slot = Some(characteristic.clone());
                    }
                }
            }
        }

        *self.discovered.write() = characteristics.clone();

        Ok(characteristics)
    }

    /// The descriptor currently assigned to a monitor role.
    pub fn slot(&self, role: Role) -> Option<CharacteristicInfo> {
        self.slots.read().slot(role).cloned()
    }

    /// Clear one role slot.
    pub fn clear_slot(&self, role: Role) {
        if let Some(slot) = self.slots.write().slot_mut(role) {
            *slot = None;
        }
    }

    /// Monitor roles that matched a characteristic in the last discovery.
    pub fn matched_roles(&self) -> Vec<Role> {
        let slots = self.slots.read();
        Role::MONITOR
            .into_iter()
            .filter(|role| slots.slot(*role).is_some())
            .collect()
    }

    /// All characteristics from the most recent discovery, in order.
    pub fn discovered(&self) -> Vec<CharacteristicInfo> {
        self.discovered.read().clone()
    }

    /// Look up a discovered characteristic by UUID (explorer path; includes
    /// unclassified characteristics).
    pub fn find(&self, uuid: &Uuid) -> Option<CharacteristicInfo> {
        self.discovered
            .read()
            .iter()
            .find(|c| c.uuid == *uuid)
            .cloned()
    }

    /// Characteristics the role table did not match.
    pub fn unclassified(&self) -> Vec<CharacteristicInfo> {
        self.discovered
            .read()
            .iter()
            .filter(|c| role_for_uuid(&c.uuid) == Role::Unclassified)
            .cloned()
            .collect()
    }

    /// Drop all discovery state.
    pub fn clear(&self) {
        *self.slots.write() = RoleSlots::default();
        self.discovered.write().clear();
    }
}
