use crate::protocol::{CommandResult, Notification};
use crate::types::DeviceId;
use tokio::sync::mpsc;

/// Inbound message forwarded to the caller, tagged with the device it came from
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// Reply to a command sent on this device's session
    Result {
        device_id: DeviceId,
        result: CommandResult,
    },

    /// Property push, already applied to the device state
    Notification {
        device_id: DeviceId,
        notification: Notification,
    },
}

impl DeviceEvent {
    /// Get the originating device id
    pub fn device_id(&self) -> &str {
        match self {
            DeviceEvent::Result { device_id, .. } | DeviceEvent::Notification { device_id, .. } => {
                device_id
            }
        }
    }
}

/// Sending side of the event channel shared by sessions
pub type EventSender = mpsc::UnboundedSender<DeviceEvent>;

/// Receiving side of the event channel
pub type EventReceiver = mpsc::UnboundedReceiver<DeviceEvent>;

/// Create an event channel to hand to one or more sessions
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}
