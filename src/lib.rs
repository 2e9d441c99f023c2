//! In-process chat room broker.
//!
//! The main components are:
//! - [`Event`]: the messages exchanged between hub and participants
//! - [`Hub`]: the room coordinating connect/disconnect, routing, broadcast
//! - [`Connection`]: transport-agnostic duplex event channel; WebSocket or
//!   RPC adapters live elsewhere and only satisfy this trait
//! - [`EventQueue`]: per-participant closable FIFO buffering outbound events
//! - [`Registry`]: generic concurrency-safe keyed store
//!
//! Each participant gets two pump tasks: one feeds inbound events to the
//! hub, one drains the participant's queue into its connection. Per-recipient
//! delivery order is guaranteed; a slow or broken consumer never stalls the
//! hub or the other participants.

pub mod clock;
pub mod connection;
pub mod event;
pub mod hub;
pub mod queue;
pub mod registry;

// Re-export commonly used types for easier access
pub use clock::{Clock, FixedClock, SystemClock};
pub use connection::{ChannelConnection, Connection, ConnectionError};
pub use event::Event;
pub use hub::{Hub, HubConfig, HubError, ParticipantId};
pub use queue::{EventQueue, QueueError};
pub use registry::Registry;
