//! Device handle lifecycle and the session state machine.
//!
//! The connection manager exclusively owns the device handle: it is
//! created on successful connect, released on disconnect, and never
//! reachable afterwards. Service and characteristic handles are derived,
//! read-only views that die with it.

use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::ble::gatt::{DeviceTarget, GattCentral, GattPeripheral};
use crate::error::{Error, Result};

/// Session-level state.
///
/// `Disconnected → Connecting → Connected → Subscribing → Monitoring`;
/// any failure on any edge returns to `Disconnected` via the cleanup path.
/// `Monitoring` is the only state in which notification callbacks fire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SessionState {
    /// No device handle held.
    #[default]
    Disconnected,
    /// Locating the device and opening the link.
    Connecting,
    /// Link open; service not yet resolved.
    Connected,
    /// Enabling per-role streaming.
    Subscribing,
    /// Streaming; notification callbacks may fire.
    Monitoring,
}

impl SessionState {
    /// Check if a device handle is held.
    pub fn is_connected(&self) -> bool {
        !matches!(self, Self::Disconnected | Self::Connecting)
    }

    /// Check if notifications are being delivered.
    pub fn is_monitoring(&self) -> bool {
        matches!(self, Self::Monitoring)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Subscribing => write!(f, "Subscribing"),
            Self::Monitoring => write!(f, "Monitoring"),
        }
    }
}

/// Event for session state changes.
#[derive(Debug, Clone)]
pub struct StateEvent {
    /// Display name of the device involved, if any.
    pub device: Option<String>,
    /// The new state.
    pub state: SessionState,
}

/// Owns the device handle lifecycle: at most one active connection.
pub struct ConnectionManager<P: GattPeripheral> {
    central: Arc<dyn GattCentral<P>>,
    device: RwLock<Option<Arc<P>>>,
    state: RwLock<SessionState>,
    event_tx: broadcast::Sender<StateEvent>,
}

impl<P: GattPeripheral> ConnectionManager<P> {
    /// Create a manager over a central.
    pub fn new(central: Arc<dyn GattCentral<P>>) -> Self {
        let (event_tx, _) = broadcast::channel(16);

        Self {
            central,
            device: RwLock::new(None),
            state: RwLock::new(SessionState::Disconnected),
            event_tx,
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state.read()
    }

    /// Subscribe to state-change events.
    pub fn subscribe_states(&self) -> broadcast::Receiver<StateEvent> {
        self.event_tx.subscribe()
    }

    /// The currently held device handle, if any.
    pub fn device(&self) -> Option<Arc<P>> {
        self.device.read().clone()
    }

    /// Open a connection to `target`.
    ///
    /// Any previously held handle must already have been torn down by the
    /// caller's cleanup pass; a leftover handle is released here as a last
    /// resort. Failure of the locate or the underlying connect call yields
    /// [`Error::DeviceNotFound`] and guarantees no handle is retained.
    pub async fn connect(&self, target: &DeviceTarget) -> Result<Arc<P>> {
        // At most one active connection.
        let previous = self.device.write().take();
        if let Some(previous) = previous {
            warn!("Releasing leftover device handle before reconnect");
            let _ = previous.disconnect().await;
        }

        self.set_state(SessionState::Connecting, None);

        let peripheral = match self.central.locate(target).await {
            Ok(p) => Arc::new(p),
            Err(e) => {
                debug!("Locate failed for {}: {}", target, e);
                self.set_state(SessionState::Disconnected, None);
                return Err(Error::DeviceNotFound {
                    identifier: target.to_string(),
                });
            }
        };

        if let Err(e) = peripheral.connect().await {
            debug!("Connect failed for {}: {}", target, e);
            self.set_state(SessionState::Disconnected, None);
            return Err(Error::DeviceNotFound {
                identifier: target.to_string(),
            });
        }

        info!("Connected to {}", peripheral.display_name());

        *self.device.write() = Some(peripheral.clone());
        self.set_state(SessionState::Connected, Some(peripheral.display_name()));

        Ok(peripheral)
    }

    /// Close the connection and release the handle.
    ///
    /// Idempotent: a no-op when no handle is held. A peripheral that is
    /// already gone counts as disconnected, not as an error.
    pub async fn disconnect(&self) {
        let device = self.device.write().take();

        let Some(device) = device else {
            debug!("Disconnect with no device handle (no-op)");
            return;
        };

        let name = device.display_name();
        match device.disconnect().await {
            Ok(()) => info!("Disconnected from {}", name),
            Err(e) => warn!("Disconnect from {} reported {} (treated as done)", name, e),
        }

        self.set_state(SessionState::Disconnected, Some(name));
    }

    /// Advance the state machine and broadcast the change.
    pub fn set_state(&self, new_state: SessionState, device: Option<String>) {
        let old_state = {
            let mut state = self.state.write();
            std::mem::replace(&mut *state, new_state)
        };

        if old_state != new_state {
            debug!("Session state: {} -> {}", old_state, new_state);
            let _ = self.event_tx.send(StateEvent {
                device,
                state: new_state,
            });
        }
    }
}
