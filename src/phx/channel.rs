use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};

use super::message::{PHX_JOIN, PHX_LEAVE};
use super::socket::{ReplyHook, Shared};
use crate::{
    error::{Result, StreamError},
    socket::{Channel, HandlerRef, LeaveAck, PayloadCallback, Reply},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ChannelStatus {
    Closed,
    Joining,
    Joined,
    Leaving,
    Errored,
}

struct Binding {
    event: String,
    id: HandlerRef,
    callback: PayloadCallback,
}

pub(crate) struct ChannelState {
    pub(crate) topic: String,
    status: Mutex<ChannelStatus>,
    join_ref: Mutex<Option<String>>,
    bindings: RwLock<Vec<Binding>>,
    next_binding: AtomicU64,
}

impl ChannelState {
    pub(crate) fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            status: Mutex::new(ChannelStatus::Closed),
            join_ref: Mutex::new(None),
            bindings: RwLock::new(Vec::new()),
            next_binding: AtomicU64::new(0),
        }
    }

    pub(crate) fn status(&self) -> ChannelStatus {
        *self.status.lock()
    }

    pub(crate) fn set_status(&self, status: ChannelStatus) {
        *self.status.lock() = status;
    }

    pub(crate) fn set_join_ref(&self, reference: String) {
        *self.join_ref.lock() = Some(reference);
    }

    /// Lifecycle frames carry the join ref of the channel instance they target.
    pub(crate) fn owns_ref(&self, reference: Option<&str>) -> bool {
        match reference {
            None => true,
            Some(r) => self.join_ref.lock().as_deref() == Some(r),
        }
    }

    /// Joined (or joining) channels are marked errored so a reconnect rejoins them.
    pub(crate) fn connection_lost(&self) {
        let mut status = self.status.lock();
        if matches!(*status, ChannelStatus::Joined | ChannelStatus::Joining) {
            *status = ChannelStatus::Errored;
        }
    }

    pub(crate) fn should_rejoin(&self) -> bool {
        matches!(self.status(), ChannelStatus::Joined | ChannelStatus::Errored)
    }

    fn bind(&self, event: &str, callback: PayloadCallback) -> HandlerRef {
        let id = HandlerRef(self.next_binding.fetch_add(1, Ordering::Relaxed) + 1);
        self.bindings.write().push(Binding {
            event: event.to_string(),
            id,
            callback,
        });
        id
    }

    fn unbind(&self, event: &str, id: HandlerRef) {
        self.bindings
            .write()
            .retain(|b| !(b.id == id && b.event == event));
    }

    /// Runs every callback bound to `event`. The bindings lock is released first.
    pub(crate) fn trigger(&self, event: &str, payload: Value) {
        let callbacks: Vec<PayloadCallback> = self
            .bindings
            .read()
            .iter()
            .filter(|b| b.event == event)
            .map(|b| b.callback.clone())
            .collect();
        if callbacks.is_empty() {
            log::debug!("phx.event.unbound topic={} event={}", self.topic, event);
            return;
        }
        for cb in callbacks {
            cb(payload.clone());
        }
    }
}

pub struct PhxChannel {
    shared: Arc<Shared>,
    state: Arc<ChannelState>,
}

impl PhxChannel {
    pub(crate) fn new(shared: Arc<Shared>, state: Arc<ChannelState>) -> Self {
        Self { shared, state }
    }

    pub fn is_joined(&self) -> bool {
        self.state.status() == ChannelStatus::Joined
    }

    async fn await_reply(
        &self,
        rx: tokio::sync::oneshot::Receiver<Reply>,
        reference: &str,
        event: &str,
    ) -> Result<Reply> {
        match tokio::time::timeout(self.shared.options.timeout, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(StreamError::ConnectionClosed {
                topic: self.state.topic.clone(),
                event: event.to_string(),
            }),
            Err(_) => {
                self.shared.forget(reference);
                Err(StreamError::Timeout {
                    topic: self.state.topic.clone(),
                    event: event.to_string(),
                })
            }
        }
    }

    fn join_failed(&self) {
        self.state.set_status(ChannelStatus::Closed);
        self.shared.unregister(&self.state);
    }
}

#[async_trait]
impl Channel for PhxChannel {
    fn topic(&self) -> &str {
        &self.state.topic
    }

    async fn join(&self) -> Result<()> {
        self.shared.ensure_registered(&self.state);
        self.state.set_status(ChannelStatus::Joining);
        let (reference, rx) = match self.shared.push(&self.state.topic, PHX_JOIN, json!({}), None) {
            Ok(pushed) => pushed,
            Err(e) => {
                self.join_failed();
                return Err(e);
            }
        };
        self.state.set_join_ref(reference.clone());
        let reply = match self.await_reply(rx, &reference, PHX_JOIN).await {
            Ok(reply) => reply,
            Err(e) => {
                self.join_failed();
                return Err(e);
            }
        };
        if reply.is_ok() {
            self.state.set_status(ChannelStatus::Joined);
            Ok(())
        } else {
            self.join_failed();
            Err(StreamError::Rejected {
                topic: self.state.topic.clone(),
                event: PHX_JOIN.to_string(),
                response: reply.response,
            })
        }
    }

    fn on(&self, event: &str, callback: PayloadCallback) -> HandlerRef {
        self.state.bind(event, callback)
    }

    fn off(&self, event: &str, handler: HandlerRef) {
        self.state.unbind(event, handler);
    }

    async fn leave(&self) -> Result<LeaveAck> {
        let previous = self.state.status();
        self.state.set_status(ChannelStatus::Leaving);

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let state = self.state.clone();
        let hook: ReplyHook = Box::new(move |_reply: &Reply| {
            state.set_status(ChannelStatus::Closed);
            if let Some(shared) = weak.upgrade() {
                shared.unregister(&state);
            }
        });

        let (reference, rx) =
            match self.shared.push(&self.state.topic, PHX_LEAVE, json!({}), Some(hook)) {
                Ok(pushed) => pushed,
                Err(e) => {
                    self.state.set_status(previous);
                    return Err(e);
                }
            };

        let weak: Weak<Shared> = Arc::downgrade(&self.shared);
        let state = self.state.clone();
        Ok(LeaveAck::new(self.state.topic.clone(), rx)
            .with_timeout(self.shared.options.timeout)
            .on_expire(move || {
                state.set_status(ChannelStatus::Closed);
                if let Some(shared) = weak.upgrade() {
                    shared.forget(&reference);
                    shared.unregister(&state);
                }
            }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn trigger_runs_only_matching_bindings() {
        let state = ChannelState::new("collection:doodles");
        let sold = Arc::new(AtomicUsize::new(0));
        let listed = Arc::new(AtomicUsize::new(0));

        let s = sold.clone();
        state.bind("item_sold", Arc::new(move |_: Value| {
            s.fetch_add(1, Ordering::SeqCst);
        }));
        let l = listed.clone();
        let listed_ref = state.bind("item_listed", Arc::new(move |_: Value| {
            l.fetch_add(1, Ordering::SeqCst);
        }));

        state.trigger("item_sold", json!({}));
        state.trigger("item_listed", json!({}));
        state.unbind("item_listed", listed_ref);
        state.trigger("item_listed", json!({}));

        assert_eq!(sold.load(Ordering::SeqCst), 1);
        assert_eq!(listed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn unbind_requires_matching_event() {
        let state = ChannelState::new("collection:doodles");
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        let id = state.bind("item_sold", Arc::new(move |_: Value| {
            h.fetch_add(1, Ordering::SeqCst);
        }));
        state.unbind("item_listed", id);
        state.trigger("item_sold", json!({}));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn lost_connection_marks_joined_for_rejoin() {
        let state = ChannelState::new("collection:doodles");
        assert!(!state.should_rejoin());
        state.set_status(ChannelStatus::Joined);
        state.connection_lost();
        assert_eq!(state.status(), ChannelStatus::Errored);
        assert!(state.should_rejoin());

        state.set_status(ChannelStatus::Leaving);
        state.connection_lost();
        assert_eq!(state.status(), ChannelStatus::Leaving);
        assert!(!state.should_rejoin());
    }

    #[test]
    fn lifecycle_frames_match_join_ref() {
        let state = ChannelState::new("collection:doodles");
        state.set_join_ref("4".to_string());
        assert!(state.owns_ref(Some("4")));
        assert!(state.owns_ref(None));
        assert!(!state.owns_ref(Some("2")));
    }
}
