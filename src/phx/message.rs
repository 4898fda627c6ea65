use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::socket::Reply;

pub const PHOENIX_TOPIC: &str = "phoenix";

pub const PHX_JOIN: &str = "phx_join";
pub const PHX_LEAVE: &str = "phx_leave";
pub const PHX_REPLY: &str = "phx_reply";
pub const PHX_CLOSE: &str = "phx_close";
pub const PHX_ERROR: &str = "phx_error";
pub const HEARTBEAT: &str = "heartbeat";

/// Frame of the V1 JSON serializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
}

impl Message {
    pub fn push(topic: &str, event: &str, payload: Value, reference: String) -> Self {
        Self {
            topic: topic.to_string(),
            event: event.to_string(),
            payload,
            reference: Some(reference),
        }
    }

    /// Reply carried by a `phx_reply` frame.
    pub fn reply(&self) -> Option<Reply> {
        if self.event != PHX_REPLY {
            return None;
        }
        let status = self
            .payload
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("error")
            .to_string();
        let response = self.payload.get("response").cloned().unwrap_or(Value::Null);
        Some(Reply { status, response })
    }
}
