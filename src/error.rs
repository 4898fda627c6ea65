use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum StreamError {
    #[error("invalid endpoint url: {0}")]
    InvalidUrl(String),

    #[error("websocket error: {0}")]
    WebSocket(String),

    #[error("socket is not connected")]
    NotConnected,

    #[error("connection closed before a reply to {event} on {topic}")]
    ConnectionClosed { topic: String, event: String },

    #[error("{event} on {topic} rejected: {response}")]
    Rejected {
        topic: String,
        event: String,
        response: Value,
    },

    #[error("timed out waiting for a reply to {event} on {topic}")]
    Timeout { topic: String, event: String },

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("no event types requested for {0}")]
    NoEventTypes(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;
