//! In-memory `Socket` that records every call the stream client makes.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opensea_stream::socket::{CloseCallback, ErrorCallback, PayloadCallback};
use opensea_stream::{Channel, HandlerRef, LeaveAck, Reply, Socket, StreamError};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::oneshot;

type Binding = (String, HandlerRef, PayloadCallback);

#[derive(Default)]
pub struct MockState {
    pub joins: Mutex<HashMap<String, usize>>,
    pub leaves: Mutex<Vec<String>>,
    pub pending_leaves: Mutex<Vec<(String, oneshot::Sender<Reply>)>>,
    pub rejected_topics: Mutex<HashSet<String>>,
    pub join_delay: Mutex<Option<Duration>>,
    pub auto_ack_leave: AtomicBool,
    pub fail_leave: AtomicBool,
    pub fail_reconnect: AtomicBool,
    pub connects: AtomicUsize,
    pub disconnects: AtomicUsize,
    pub reconnects: AtomicUsize,
    bindings: Mutex<HashMap<String, Vec<Binding>>>,
    next_handler: AtomicU64,
    error_callbacks: Mutex<Vec<ErrorCallback>>,
    close_callbacks: Mutex<Vec<CloseCallback>>,
}

impl MockState {
    pub fn join_count(&self, topic: &str) -> usize {
        self.joins.lock().get(topic).copied().unwrap_or(0)
    }

    pub fn total_joins(&self) -> usize {
        self.joins.lock().values().sum()
    }

    pub fn leave_count(&self) -> usize {
        self.leaves.lock().len()
    }

    /// Event names currently bound on `topic`, sorted.
    pub fn bound_events(&self, topic: &str) -> Vec<String> {
        let mut events: Vec<String> = self
            .bindings
            .lock()
            .get(topic)
            .map(|b| b.iter().map(|(e, _, _)| e.clone()).collect())
            .unwrap_or_default();
        events.sort();
        events
    }

    /// Delivers `payload` to every callback bound to `event` on `topic`.
    pub fn emit(&self, topic: &str, event: &str, payload: Value) {
        let callbacks: Vec<PayloadCallback> = self
            .bindings
            .lock()
            .get(topic)
            .map(|b| {
                b.iter()
                    .filter(|(e, _, _)| e == event)
                    .map(|(_, _, cb)| cb.clone())
                    .collect()
            })
            .unwrap_or_default();
        for cb in callbacks {
            cb(payload.clone());
        }
    }

    /// Answers the oldest unacknowledged leave.
    pub fn ack_leave(&self, reply: Reply) -> String {
        let (topic, tx) = self.pending_leaves.lock().remove(0);
        let _ = tx.send(reply);
        topic
    }

    pub fn fire_close(&self) {
        let callbacks: Vec<CloseCallback> = self.close_callbacks.lock().clone();
        for cb in callbacks {
            cb();
        }
    }

    pub fn fire_error(&self, err: StreamError) {
        let callbacks: Vec<ErrorCallback> = self.error_callbacks.lock().clone();
        for cb in callbacks {
            cb(err.clone());
        }
    }
}

pub struct MockSocket {
    pub state: Arc<MockState>,
}

impl MockSocket {
    pub fn pair() -> (Self, Arc<MockState>) {
        let state = Arc::new(MockState::default());
        state.auto_ack_leave.store(true, Ordering::SeqCst);
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

pub struct MockChannel {
    topic: String,
    state: Arc<MockState>,
}

#[async_trait]
impl Channel for MockChannel {
    fn topic(&self) -> &str {
        &self.topic
    }

    async fn join(&self) -> opensea_stream::Result<()> {
        let delay = *self.state.join_delay.lock();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        *self.state.joins.lock().entry(self.topic.clone()).or_insert(0) += 1;
        if self.state.rejected_topics.lock().contains(&self.topic) {
            return Err(StreamError::Rejected {
                topic: self.topic.clone(),
                event: "phx_join".to_string(),
                response: json!({"reason": "unauthorized"}),
            });
        }
        Ok(())
    }

    fn on(&self, event: &str, callback: PayloadCallback) -> HandlerRef {
        let id = HandlerRef(self.state.next_handler.fetch_add(1, Ordering::SeqCst) + 1);
        self.state
            .bindings
            .lock()
            .entry(self.topic.clone())
            .or_default()
            .push((event.to_string(), id, callback));
        id
    }

    fn off(&self, event: &str, handler: HandlerRef) {
        if let Some(b) = self.state.bindings.lock().get_mut(&self.topic) {
            b.retain(|(e, id, _)| !(e == event && *id == handler));
        }
    }

    async fn leave(&self) -> opensea_stream::Result<LeaveAck> {
        if self.state.fail_leave.load(Ordering::SeqCst) {
            return Err(StreamError::NotConnected);
        }
        self.state.leaves.lock().push(self.topic.clone());
        if self.state.auto_ack_leave.load(Ordering::SeqCst) {
            return Ok(LeaveAck::ready(self.topic.clone(), Reply::ok(json!({}))));
        }
        let (tx, rx) = oneshot::channel();
        self.state.pending_leaves.lock().push((self.topic.clone(), tx));
        Ok(LeaveAck::new(self.topic.clone(), rx))
    }
}

#[async_trait]
impl Socket for MockSocket {
    type Channel = MockChannel;

    async fn connect(&self) -> opensea_stream::Result<()> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> opensea_stream::Result<()> {
        self.state.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn reconnect(&self) -> opensea_stream::Result<()> {
        self.state.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reconnect.load(Ordering::SeqCst) {
            return Err(StreamError::WebSocket("connection refused".to_string()));
        }
        Ok(())
    }

    fn channel(&self, topic: &str) -> MockChannel {
        MockChannel {
            topic: topic.to_string(),
            state: self.state.clone(),
        }
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.state.error_callbacks.lock().push(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        self.state.close_callbacks.lock().push(callback);
    }
}

/// Polls `check` until it holds or roughly a second has passed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}
