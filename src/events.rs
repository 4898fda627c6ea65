use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::EventType;

/// Envelope the service wraps around every forwarded payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    pub event_type: String,
    #[serde(default)]
    pub sent_at: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl StreamEvent {
    pub fn from_payload(raw: &Value) -> serde_json::Result<Self> {
        Self::deserialize(raw)
    }

    /// `None` for event types this crate does not route.
    pub fn kind(&self) -> Option<EventType> {
        self.event_type.parse().ok()
    }

    pub fn sent_at(&self) -> Option<DateTime<FixedOffset>> {
        self.sent_at
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    }

    pub fn collection_slug(&self) -> Option<&str> {
        self.payload
            .get("collection")
            .and_then(|c| c.get("slug"))
            .and_then(|s| s.as_str())
    }

    pub fn nft_id(&self) -> Option<&str> {
        self.payload
            .get("item")
            .and_then(|i| i.get("nft_id"))
            .and_then(|s| s.as_str())
    }
}
