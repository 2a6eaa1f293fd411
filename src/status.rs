//! Status sink and per-role display fields.
//!
//! The session never renders anything itself; it emits timestamped status
//! events for an external log surface and keeps one text slot per monitor
//! role for an external display surface.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info};

use crate::ble::registry::Role;

/// Placeholder shown while a role has no data.
pub const NO_DATA: &str = "-";

/// Severity of a status message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Severity {
    /// Informational progress message.
    Info,
    /// Operation failure.
    Error,
}

/// A human-readable status message for the external log surface.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct StatusEvent {
    /// When the message was produced.
    pub timestamp: DateTime<Utc>,
    /// The message text.
    pub message: String,
    /// Message severity.
    pub severity: Severity,
}

/// Fan-out channel for status events.
///
/// Messages are also mirrored to `tracing` so they show up in structured
/// logs even with no subscriber attached.
pub struct StatusLog {
    event_tx: broadcast::Sender<StatusEvent>,
}

impl StatusLog {
    /// Create a new status log.
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(64);
        Self { event_tx }
    }

    /// Subscribe to status events.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an informational message.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.emit(message, Severity::Info);
    }

    /// Emit an error message.
    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!("{}", message);
        self.emit(message, Severity::Error);
    }

    fn emit(&self, message: String, severity: Severity) {
        let _ = self.event_tx.send(StatusEvent {
            timestamp: Utc::now(),
            message,
            severity,
        });
    }
}

impl Default for StatusLog {
    fn default() -> Self {
        Self::new()
    }
}

/// One text slot per monitor role for the external display surface.
///
/// Slots default to the [`NO_DATA`] placeholder and are reset to it
/// whenever the role is unsubscribed.
pub struct DisplayFields {
    fields: RwLock<[String; 3]>,
}

impl DisplayFields {
    /// Create fields with every slot at the placeholder.
    pub fn new() -> Self {
        Self {
            fields: RwLock::new([
                NO_DATA.to_string(),
                NO_DATA.to_string(),
                NO_DATA.to_string(),
            ]),
        }
    }

    fn index(role: Role) -> Option<usize> {
        match role {
            Role::Speed => Some(0),
            Role::Temp => Some(1),
            Role::Runtime => Some(2),
            Role::Unclassified => None,
        }
    }

    /// Set a role's value.
    pub fn set(&self, role: Role, value: impl Into<String>) {
        if let Some(i) = Self::index(role) {
            self.fields.write()[i] = value.into();
        }
    }

    /// Reset a role to the placeholder.
    pub fn reset(&self, role: Role) {
        self.set(role, NO_DATA);
    }

    /// Current value of a role's field.
    pub fn get(&self, role: Role) -> String {
        match Self::index(role) {
            Some(i) => self.fields.read()[i].clone(),
            None => NO_DATA.to_string(),
        }
    }

    /// Labelled rendering for one role, e.g. `"SPEED: -"`.
    pub fn labelled(&self, role: Role) -> String {
        format!("{}: {}", role.label(), self.get(role))
    }
}

impl Default for DisplayFields {
    fn default() -> Self {
        Self::new()
    }
}
