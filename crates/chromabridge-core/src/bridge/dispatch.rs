//! Inbound message dispatch
//!
//! Decodes inbound frames and routes them to the notification surface. A
//! recognized event always produces a visible notification, and every
//! decoded event produces exactly one informational log record carrying the
//! raw payload for downstream diagnostics.

use std::sync::Arc;

use tracing::debug;

use super::protocol::{
    InboundMessage, LogLevel, LogRecord, SKIN_NAME_NONE, UNKNOWN_SKIN_LABEL,
};
use crate::Result;

/// External collaborator that renders a single transient on-screen message
pub trait NotificationSurface: Send + Sync {
    fn show(&self, text: &str);
}

pub struct Dispatcher {
    surface: Arc<dyn NotificationSurface>,
}

impl Dispatcher {
    pub fn new(surface: Arc<dyn NotificationSurface>) -> Self {
        Self { surface }
    }

    /// Decode one raw frame and run its side effect.
    ///
    /// Returns the log record describing the event; the caller owns the log
    /// sink. A payload that is not JSON is a decode failure; a JSON payload
    /// with an unrecognized shape degrades to log-only.
    pub fn dispatch(&self, raw: &str) -> Result<LogRecord> {
        let payload: serde_json::Value = serde_json::from_str(raw)?;

        let message = InboundMessage::deserialize_lenient(&payload);
        match message {
            InboundMessage::HistoricState { historic_skin_name } => {
                let text = historic_skin_name
                    .as_deref()
                    .filter(|name| !name.is_empty() && *name != SKIN_NAME_NONE)
                    .unwrap_or(UNKNOWN_SKIN_LABEL);
                self.surface.show(text);
            }
            InboundMessage::Unknown => {
                debug!("ignoring unrecognized bridge event for dispatch");
            }
        }

        Ok(LogRecord::new(LogLevel::Info, "bridge event received").with_data(payload))
    }
}

impl InboundMessage {
    /// Decode a JSON payload, treating any shape serde rejects (including a
    /// missing tag) as an unknown event rather than an error.
    fn deserialize_lenient(payload: &serde_json::Value) -> Self {
        serde_json::from_value(payload.clone()).unwrap_or(InboundMessage::Unknown)
    }
}
