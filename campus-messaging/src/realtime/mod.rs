//! Live connection state: who is connected, which conversation rooms each
//! connection has joined, and the outbound queues used to reach them.

pub mod events;
pub mod hub;
pub mod presence;
pub mod session;

pub use events::{ClientEvent, ConnectionId, OutboundMessage, ServerEvent};
pub use hub::{Departure, Hub, OutboundRx, OutboundTx};
