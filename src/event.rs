use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Events exchanged between the hub and its participants.
///
/// Events are immutable facts; ownership transfers on enqueue and nothing
/// mutates them afterwards. `SendMessage` only travels inbound (participant
/// to hub), `NewMessage` only outbound. Every event carries the timestamp
/// the hub's clock produced when the event was created.
///
/// The serde representation is the envelope used by transport adapters:
/// `{"name": "<kind>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data", rename_all = "camelCase")]
pub enum Event {
    /// First event a participant receives, with the roster including itself.
    Connected {
        time: DateTime<Utc>,
        users: Vec<String>,
    },
    /// Full roster after any membership change.
    UserListUpdate {
        time: DateTime<Utc>,
        users: Vec<String>,
    },
    /// Another participant joined.
    UserEnter { time: DateTime<Utc>, name: String },
    /// Another participant left.
    UserLeave { time: DateTime<Utc>, name: String },
    /// Inbound request to deliver a message to the room.
    SendMessage { time: DateTime<Utc>, message: String },
    /// Outbound delivery of a message, echoed to the sender as well.
    NewMessage {
        time: DateTime<Utc>,
        sender: String,
        message: String,
    },
}

impl Event {
    /// Time of the event.
    pub fn when(&self) -> DateTime<Utc> {
        match self {
            Event::Connected { time, .. } => *time,
            Event::UserListUpdate { time, .. } => *time,
            Event::UserEnter { time, .. } => *time,
            Event::UserLeave { time, .. } => *time,
            Event::SendMessage { time, .. } => *time,
            Event::NewMessage { time, .. } => *time,
        }
    }

    /// Wire name of the event kind, also used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Connected { .. } => "connected",
            Event::UserListUpdate { .. } => "userListUpdate",
            Event::UserEnter { .. } => "userEnter",
            Event::UserLeave { .. } => "userLeave",
            Event::SendMessage { .. } => "sendMessage",
            Event::NewMessage { .. } => "newMessage",
        }
    }
}
