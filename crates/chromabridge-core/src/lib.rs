pub mod bridge;
pub mod config;
pub mod discovery;
pub mod error;

pub use bridge::{BridgeClient, ChannelState, LogLevel, NotificationSurface, WebSocketTransport};
pub use config::AppConfig;
pub use discovery::{Endpoint, PortResolver};
pub use error::{Error, Result};
