//! Persistent bridge channel to the companion process
//!
//! Connection lifecycle, outbound queueing, inbound dispatch, and the JSON
//! wire protocol.

pub mod client;
pub mod dispatch;
pub mod protocol;
pub mod queue;
pub mod transport;

pub use client::{BridgeClient, ChannelState};
pub use dispatch::{Dispatcher, NotificationSurface};
pub use protocol::{InboundMessage, LogLevel, LogRecord};
pub use queue::OutboundQueue;
pub use transport::{BridgeChannel, ChannelTransport, WebSocketTransport};
