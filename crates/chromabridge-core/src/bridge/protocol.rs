//! Wire protocol for the companion-process channel
//!
//! JSON text messages both ways: outbound `chroma-log` records, inbound
//! tagged events. Unknown inbound tags must be tolerated, never rejected.

use serde::{Deserialize, Serialize};

/// Outbound message tag
pub const MSG_TYPE_LOG: &str = "chroma-log";
/// Fixed client id stamped on every outbound record
pub const CLIENT_SOURCE: &str = "chromabridge";
/// Sentinel skin name the companion sends when it has nothing to report
pub const SKIN_NAME_NONE: &str = "None";
/// Placeholder shown when the event carries no usable name
pub const UNKNOWN_SKIN_LABEL: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

/// One outbound log record, serialized before being queued or sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogRecord {
    #[serde(rename = "type")]
    pub kind: String,
    pub source: String,
    pub level: LogLevel,
    pub message: String,
    /// Epoch milliseconds
    pub timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl LogRecord {
    pub fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            kind: MSG_TYPE_LOG.to_string(),
            source: CLIENT_SOURCE.to_string(),
            level,
            message: message.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Inbound event from the companion process
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum InboundMessage {
    /// Historic state carrying an optional display name
    #[serde(rename = "historic-state")]
    HistoricState {
        #[serde(rename = "historicSkinName", default)]
        historic_skin_name: Option<String>,
    },
    /// Forward compatibility: new event types degrade to log-only
    #[serde(other)]
    Unknown,
}
