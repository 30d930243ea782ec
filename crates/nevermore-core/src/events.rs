//! Device lifecycle events.
//!
//! Connections and the [`DeviceManager`](crate::DeviceManager) publish
//! [`DeviceEvent`]s through an [`EventDispatcher`]. Events are
//! serializable for logging and IPC. Per-characteristic value changes are
//! not events; callers poll snapshots for those.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use nevermore_types::{OperationError, ServiceKind};

/// Device identifier carried by every event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceId {
    /// Transport-level identifier.
    pub id: String,
    /// Advertised name, if known.
    pub name: Option<String>,
}

/// Events emitted by device connections.
///
/// Marked `#[non_exhaustive]` so new events can be added without breaking
/// downstream matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum DeviceEvent {
    /// A device request selected a peripheral.
    Discovered { device: DeviceId },
    /// Connected and discovered.
    Connected {
        device: DeviceId,
        services: Vec<ServiceKind>,
    },
    /// A connect attempt failed; the device is disconnected again.
    ConnectFailed {
        device: DeviceId,
        error: OperationError,
    },
    /// Discovery left slots of a service empty.
    DiscoveryIncomplete {
        device: DeviceId,
        service: ServiceKind,
        missing: Vec<String>,
    },
    /// The connection dropped or was closed.
    Disconnected {
        device: DeviceId,
        reason: DisconnectReason,
    },
}

impl DeviceEvent {
    /// The device this event concerns.
    pub fn device(&self) -> &DeviceId {
        match self {
            DeviceEvent::Discovered { device }
            | DeviceEvent::Connected { device, .. }
            | DeviceEvent::ConnectFailed { device, .. }
            | DeviceEvent::DiscoveryIncomplete { device, .. }
            | DeviceEvent::Disconnected { device, .. } => device,
        }
    }
}

/// Why a connection ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// The caller asked for it.
    UserRequested,
    /// The transport reported the link lost.
    LinkLost,
    /// The device was removed from the registry.
    Removed,
}

/// Sender for device events.
pub type EventSender = broadcast::Sender<DeviceEvent>;

/// Receiver for device events.
pub type EventReceiver = broadcast::Receiver<DeviceEvent>;

/// Fan-out of device events to any number of receivers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: EventSender,
}

impl EventDispatcher {
    /// Create a dispatcher buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DeviceEvent) {
        // No receivers is fine
        let _ = self.sender.send(event);
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(100)
    }
}
