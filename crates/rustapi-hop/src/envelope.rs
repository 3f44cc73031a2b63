//! Message envelope and wire encoding.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Content type of every published message.
pub const CONTENT_TYPE: &str = "application/json";

/// Content encoding of every published message.
pub const CONTENT_ENCODING: &str = "UTF-8";

/// Body of a published message.
///
/// Serialized as `{"date": ..., "request": {...}, "response": {...}}` with a
/// trailing `"millis"` only when the request was timed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// ISO-8601 UTC timestamp with millisecond precision.
    pub date: String,

    /// Selected request fields
    pub request: Map<String, Value>,

    /// Selected response fields
    pub response: Map<String, Value>,

    /// Milliseconds between request start and response completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub millis: Option<u64>,
}

impl Envelope {
    /// Build an envelope stamped with the current time.
    pub fn new(
        request: Map<String, Value>,
        response: Map<String, Value>,
        millis: Option<u64>,
    ) -> Self {
        Self::at(Utc::now(), request, response, millis)
    }

    pub fn at(
        date: DateTime<Utc>,
        request: Map<String, Value>,
        response: Map<String, Value>,
        millis: Option<u64>,
    ) -> Self {
        Self {
            date: date.to_rfc3339_opts(SecondsFormat::Millis, true),
            request,
            response,
            millis,
        }
    }

    /// Serialize to the UTF-8 JSON payload.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

/// Publish-time metadata attached to each message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageProperties {
    pub content_type: String,
    pub content_encoding: String,
}

impl MessageProperties {
    /// `application/json` / `UTF-8`.
    pub fn json() -> Self {
        Self {
            content_type: CONTENT_TYPE.to_string(),
            content_encoding: CONTENT_ENCODING.to_string(),
        }
    }
}

impl Default for MessageProperties {
    fn default() -> Self {
        Self::json()
    }
}
