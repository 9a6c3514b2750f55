//! Realtime message envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// A message received from the realtime endpoint.
///
/// Only `type` is required on the wire; `data` defaults to `null` and
/// `timestamp` to an empty string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Message type, used by consumers for routing
    #[serde(rename = "type")]
    pub kind: String,
    /// Arbitrary payload
    #[serde(default)]
    pub data: Value,
    /// Server-side timestamp as sent
    #[serde(default)]
    pub timestamp: String,
}

impl Message {
    /// Create a message stamped with the current UTC time.
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        Self {
            kind: kind.into(),
            data,
            timestamp: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }

    /// Parse one inbound text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }

    /// Decode into a consumer-defined tagged enum.
    ///
    /// The target type is expected to use
    /// `#[serde(tag = "type", content = "data")]`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        let tagged = json!({ "type": self.kind, "data": self.data });
        Ok(serde_json::from_value(tagged)?)
    }
}
