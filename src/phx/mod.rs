//! Phoenix channels client speaking the V1 JSON serializer over tokio-tungstenite.
//!
//! One background task per live connection owns the WebSocket. Handles push
//! frames to it over an mpsc command channel; replies are matched back to the
//! waiting push by `ref`, and every other frame is routed to the channel
//! registered for its topic.

mod channel;
pub mod message;
mod socket;

pub use channel::PhxChannel;
pub use socket::{PhxSocket, SocketOptions};
