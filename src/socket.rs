//! Contract between the stream client and the channel protocol client.
//!
//! The stream client only talks to a [`Socket`] and the [`Channel`]s it hands
//! out. [`crate::phx::PhxSocket`] is the bundled implementation; tests and
//! embedders can supply their own.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::oneshot;

use crate::error::{Result, StreamError};

/// Receives the raw payload of one routed event.
pub type PayloadCallback = Arc<dyn Fn(Value) + Send + Sync>;

/// Receives connection-level failures.
pub type ErrorCallback = Arc<dyn Fn(StreamError) + Send + Sync>;

/// Fired when the connection closes without being asked to.
pub type CloseCallback = Arc<dyn Fn() + Send + Sync>;

/// Identifies one callback registered with [`Channel::on`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerRef(pub u64);

/// Server reply to a push.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: String,
    pub response: Value,
}

impl Reply {
    pub fn ok(response: Value) -> Self {
        Self {
            status: "ok".to_string(),
            response,
        }
    }

    pub fn error(response: Value) -> Self {
        Self {
            status: "error".to_string(),
            response,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == "ok"
    }
}

type ExpireHook = Box<dyn FnOnce() + Send>;

/// Pending acknowledgment of a channel leave.
pub struct LeaveAck {
    topic: String,
    rx: oneshot::Receiver<Reply>,
    timeout: Option<Duration>,
    on_expire: Option<ExpireHook>,
}

impl fmt::Debug for LeaveAck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LeaveAck")
            .field("topic", &self.topic)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl LeaveAck {
    pub fn new(topic: impl Into<String>, rx: oneshot::Receiver<Reply>) -> Self {
        Self {
            topic: topic.into(),
            rx,
            timeout: None,
            on_expire: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Runs `hook` if the timeout elapses before the reply arrives.
    pub fn on_expire(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_expire = Some(Box::new(hook));
        self
    }

    /// Already acknowledged with `reply`.
    pub fn ready(topic: impl Into<String>, reply: Reply) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(reply);
        Self::new(topic, rx)
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn wait(self) -> Result<Reply> {
        let LeaveAck {
            topic,
            rx,
            timeout,
            on_expire,
        } = self;
        let received = match timeout {
            None => rx.await,
            Some(d) => match tokio::time::timeout(d, rx).await {
                Ok(res) => res,
                Err(_) => {
                    if let Some(hook) = on_expire {
                        hook();
                    }
                    return Err(StreamError::Timeout {
                        topic,
                        event: "phx_leave".to_string(),
                    })
                }
            },
        };
        received.map_err(|_| StreamError::ConnectionClosed {
            topic,
            event: "phx_leave".to_string(),
        })
    }
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn topic(&self) -> &str;

    /// Joins the topic, resolving once the server accepts or rejects it.
    async fn join(&self) -> Result<()>;

    fn on(&self, event: &str, callback: PayloadCallback) -> HandlerRef;

    fn off(&self, event: &str, handler: HandlerRef);

    /// Sends the leave. The returned ack resolves when the server confirms it.
    async fn leave(&self) -> Result<LeaveAck>;
}

#[async_trait]
pub trait Socket: Send + Sync + 'static {
    type Channel: Channel;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    async fn reconnect(&self) -> Result<()>;

    fn channel(&self, topic: &str) -> Self::Channel;

    fn on_error(&self, callback: ErrorCallback);

    fn on_close(&self, callback: CloseCallback);
}
