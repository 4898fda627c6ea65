use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use url::Url;

use super::channel::{ChannelState, ChannelStatus, PhxChannel};
use super::message::{Message, HEARTBEAT, PHOENIX_TOPIC, PHX_CLOSE, PHX_ERROR, PHX_JOIN, PHX_REPLY};
use crate::{
    error::{Result, StreamError},
    socket::{CloseCallback, ErrorCallback, Reply, Socket},
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) type ReplyHook = Box<dyn FnOnce(&Reply) + Send>;

#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub heartbeat_interval: Duration,
    /// Upper bound for connecting and for each join/leave reply.
    pub timeout: Duration,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            timeout: Duration::from_secs(10),
        }
    }
}

enum Command {
    Send(String),
    Close,
}

struct Connection {
    cmd_tx: mpsc::UnboundedSender<Command>,
    generation: u64,
}

struct Pending {
    tx: oneshot::Sender<Reply>,
    hook: Option<ReplyHook>,
}

enum Outcome {
    Requested,
    Lost(Option<StreamError>),
}

pub(crate) struct Shared {
    endpoint: Url,
    pub(crate) options: SocketOptions,
    conn: Mutex<Option<Connection>>,
    lifecycle: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    next_ref: AtomicU64,
    pending: Mutex<HashMap<String, Pending>>,
    channels: RwLock<HashMap<String, Arc<ChannelState>>>,
    error_callbacks: RwLock<Vec<ErrorCallback>>,
    close_callbacks: RwLock<Vec<CloseCallback>>,
}

impl Shared {
    fn new(endpoint: Url, options: SocketOptions) -> Self {
        Self {
            endpoint,
            options,
            conn: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
            generation: AtomicU64::new(0),
            next_ref: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            channels: RwLock::new(HashMap::new()),
            error_callbacks: RwLock::new(Vec::new()),
            close_callbacks: RwLock::new(Vec::new()),
        }
    }

    fn is_connected(&self) -> bool {
        self.conn.lock().is_some()
    }

    fn make_ref(&self) -> String {
        (self.next_ref.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn track(&self, reference: &str, hook: Option<ReplyHook>) -> oneshot::Receiver<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(reference.to_string(), Pending { tx, hook });
        rx
    }

    /// Queues a push on the live connection. Returns its ref and a receiver for the reply.
    pub(crate) fn push(
        &self,
        topic: &str,
        event: &str,
        payload: Value,
        hook: Option<ReplyHook>,
    ) -> Result<(String, oneshot::Receiver<Reply>)> {
        let conn = self.conn.lock();
        let Some(conn) = conn.as_ref() else {
            return Err(StreamError::NotConnected);
        };
        let reference = self.make_ref();
        let text = serde_json::to_string(&Message::push(topic, event, payload, reference.clone()))
            .map_err(|e| StreamError::Protocol(e.to_string()))?;
        let rx = self.track(&reference, hook);
        if conn.cmd_tx.send(Command::Send(text)).is_err() {
            self.pending.lock().remove(&reference);
            return Err(StreamError::NotConnected);
        }
        log::debug!("phx.push topic={} event={} ref={}", topic, event, reference);
        Ok((reference, rx))
    }

    /// Drops the reply slot of a push nobody waits for anymore.
    pub(crate) fn forget(&self, reference: &str) {
        if self.pending.lock().remove(reference).is_some() {
            log::debug!("phx.pending.expired ref={}", reference);
        }
    }

    pub(crate) fn register(&self, channel: Arc<ChannelState>) {
        self.channels.write().insert(channel.topic.clone(), channel);
    }

    /// Registers `channel` unless another instance already owns its topic.
    pub(crate) fn ensure_registered(&self, channel: &Arc<ChannelState>) {
        self.channels
            .write()
            .entry(channel.topic.clone())
            .or_insert_with(|| channel.clone());
    }

    pub(crate) fn unregister(&self, channel: &Arc<ChannelState>) {
        let mut channels = self.channels.write();
        if channels
            .get(&channel.topic)
            .is_some_and(|c| Arc::ptr_eq(c, channel))
        {
            channels.remove(&channel.topic);
        }
    }

    fn fail_pending(&self) {
        let drained: Vec<Pending> = self.pending.lock().drain().map(|(_, p)| p).collect();
        if !drained.is_empty() {
            log::debug!("phx.pending.dropped count={}", drained.len());
        }
    }

    pub(crate) fn emit_error(&self, err: StreamError) {
        let callbacks: Vec<ErrorCallback> = self.error_callbacks.read().clone();
        for cb in callbacks {
            cb(err.clone());
        }
    }

    fn emit_close(&self) {
        let callbacks: Vec<CloseCallback> = self.close_callbacks.read().clone();
        for cb in callbacks {
            cb();
        }
    }

    async fn open(self: &Arc<Self>) -> Result<()> {
        let url = transport_url(&self.endpoint);
        let connecting = connect_async(url.as_str());
        let (ws, _) = tokio::time::timeout(self.options.timeout, connecting)
            .await
            .map_err(|_| StreamError::Timeout {
                topic: PHOENIX_TOPIC.to_string(),
                event: "connect".to_string(),
            })?
            .map_err(|e| StreamError::WebSocket(e.to_string()))?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.conn.lock() = Some(Connection { cmd_tx, generation });
        log::info!(
            "phx.connected host={} generation={}",
            self.endpoint.host_str().unwrap_or(""),
            generation
        );

        tokio::spawn(run_connection(self.clone(), ws, cmd_rx, generation));
        Ok(())
    }

    fn close_live(&self) {
        if let Some(conn) = self.conn.lock().take() {
            let _ = conn.cmd_tx.send(Command::Close);
        }
        self.fail_pending();
    }

    /// Clears the live connection if `generation` still owns it.
    fn connection_lost(&self, generation: u64) -> bool {
        {
            let mut conn = self.conn.lock();
            if conn.as_ref().map(|c| c.generation) != Some(generation) {
                return false;
            }
            *conn = None;
        }
        self.fail_pending();
        for channel in self.channels.read().values() {
            channel.connection_lost();
        }
        true
    }

    fn rejoin_all(self: &Arc<Self>) {
        let channels: Vec<Arc<ChannelState>> = self
            .channels
            .read()
            .values()
            .filter(|c| c.should_rejoin())
            .cloned()
            .collect();
        for channel in channels {
            log::info!("phx.channel.rejoin topic={}", channel.topic);
            channel.set_status(ChannelStatus::Joining);
            let weak: Weak<Shared> = Arc::downgrade(self);
            let state = channel.clone();
            let hook: ReplyHook = Box::new(move |reply: &Reply| {
                if reply.is_ok() {
                    state.set_status(ChannelStatus::Joined);
                    return;
                }
                state.set_status(ChannelStatus::Errored);
                if let Some(shared) = weak.upgrade() {
                    shared.emit_error(StreamError::Rejected {
                        topic: state.topic.clone(),
                        event: PHX_JOIN.to_string(),
                        response: reply.response.clone(),
                    });
                }
            });
            match self.push(&channel.topic, PHX_JOIN, json!({}), Some(hook)) {
                Ok((reference, _rx)) => channel.set_join_ref(reference),
                Err(e) => {
                    channel.set_status(ChannelStatus::Errored);
                    self.emit_error(e);
                }
            }
        }
    }

    fn dispatch(&self, text: &str) {
        let msg: Message = match serde_json::from_str(text) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("phx.frame.invalid err={}", e);
                return;
            }
        };

        if msg.event == PHX_REPLY {
            let Some(reference) = msg.reference.as_deref() else {
                return;
            };
            let pending = self.pending.lock().remove(reference);
            if let (Some(pending), Some(reply)) = (pending, msg.reply()) {
                if let Some(hook) = pending.hook {
                    hook(&reply);
                }
                let _ = pending.tx.send(reply);
            }
            return;
        }

        let channel = self.channels.read().get(&msg.topic).cloned();
        let Some(channel) = channel else {
            log::debug!("phx.frame.unrouted topic={} event={}", msg.topic, msg.event);
            return;
        };
        let lifecycle = msg.event == PHX_CLOSE || msg.event == PHX_ERROR;
        if lifecycle && !channel.owns_ref(msg.reference.as_deref()) {
            log::debug!("phx.frame.stale topic={} event={}", msg.topic, msg.event);
            return;
        }
        match msg.event.as_str() {
            PHX_CLOSE => {
                log::info!("phx.channel.closed topic={}", channel.topic);
                channel.set_status(ChannelStatus::Closed);
                self.unregister(&channel);
            }
            PHX_ERROR => {
                log::warn!("phx.channel.error topic={} payload={}", channel.topic, msg.payload);
                channel.set_status(ChannelStatus::Errored);
                self.emit_error(StreamError::Protocol(format!(
                    "channel {} errored: {}",
                    channel.topic, msg.payload
                )));
            }
            event => channel.trigger(event, msg.payload),
        }
    }
}

/// `<endpoint>/websocket` with the V1 JSON serializer requested.
fn transport_url(endpoint: &Url) -> Url {
    let mut url = endpoint.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("websocket");
    }
    url.query_pairs_mut().append_pair("vsn", "1.0.0");
    url
}

async fn run_connection(
    shared: Arc<Shared>,
    mut ws: WsStream,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    generation: u64,
) {
    let mut heartbeat = tokio::time::interval(shared.options.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut pending_heartbeat: Option<oneshot::Receiver<Reply>> = None;

    let outcome = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if let Err(e) = ws.send(WsMessage::Text(text.into())).await {
                        break Outcome::Lost(Some(StreamError::WebSocket(e.to_string())));
                    }
                }
                Some(Command::Close) | None => {
                    let _ = ws.close(None).await;
                    break Outcome::Requested;
                }
            },
            frame = ws.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => shared.dispatch(text.as_str()),
                Some(Ok(WsMessage::Close(frame))) => {
                    log::info!("phx.close_frame frame={:?}", frame);
                    break Outcome::Lost(None);
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Outcome::Lost(Some(StreamError::WebSocket(e.to_string()))),
                None => break Outcome::Lost(None),
            },
            _ = heartbeat.tick() => {
                if let Some(mut rx) = pending_heartbeat.take() {
                    if matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Empty)) {
                        log::warn!("phx.heartbeat.timeout generation={}", generation);
                        let _ = ws.close(None).await;
                        break Outcome::Lost(Some(StreamError::Timeout {
                            topic: PHOENIX_TOPIC.to_string(),
                            event: HEARTBEAT.to_string(),
                        }));
                    }
                }
                let reference = shared.make_ref();
                let frame = Message::push(PHOENIX_TOPIC, HEARTBEAT, json!({}), reference.clone());
                let text = match serde_json::to_string(&frame) {
                    Ok(t) => t,
                    Err(e) => break Outcome::Lost(Some(StreamError::Protocol(e.to_string()))),
                };
                pending_heartbeat = Some(shared.track(&reference, None));
                if let Err(e) = ws.send(WsMessage::Text(text.into())).await {
                    break Outcome::Lost(Some(StreamError::WebSocket(e.to_string())));
                }
            }
        }
    };

    match outcome {
        Outcome::Requested => {
            log::info!("phx.disconnected generation={}", generation);
        }
        Outcome::Lost(err) => {
            if !shared.connection_lost(generation) {
                return;
            }
            log::warn!(
                "phx.connection.lost generation={} err={}",
                generation,
                err.as_ref().map(|e| e.to_string()).unwrap_or_default()
            );
            if let Some(e) = err {
                shared.emit_error(e);
            }
            shared.emit_close();
        }
    }
}

/// Socket handle. Dropping it closes the live connection.
pub struct PhxSocket {
    shared: Arc<Shared>,
}

impl PhxSocket {
    pub fn new(endpoint: Url, options: SocketOptions) -> Self {
        Self {
            shared: Arc::new(Shared::new(endpoint, options)),
        }
    }

    pub fn endpoint(&self) -> &Url {
        &self.shared.endpoint
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }
}

#[async_trait]
impl Socket for PhxSocket {
    type Channel = PhxChannel;

    async fn connect(&self) -> Result<()> {
        let _guard = self.shared.lifecycle.lock().await;
        if self.shared.is_connected() {
            return Ok(());
        }
        self.shared.open().await
    }

    async fn disconnect(&self) -> Result<()> {
        let _guard = self.shared.lifecycle.lock().await;
        self.shared.close_live();
        let channels: Vec<Arc<ChannelState>> =
            self.shared.channels.write().drain().map(|(_, c)| c).collect();
        for channel in channels {
            channel.set_status(ChannelStatus::Closed);
        }
        Ok(())
    }

    async fn reconnect(&self) -> Result<()> {
        let _guard = self.shared.lifecycle.lock().await;
        self.shared.close_live();
        self.shared.open().await?;
        self.shared.rejoin_all();
        Ok(())
    }

    fn channel(&self, topic: &str) -> PhxChannel {
        let state = Arc::new(ChannelState::new(topic));
        self.shared.register(state.clone());
        PhxChannel::new(self.shared.clone(), state)
    }

    fn on_error(&self, callback: ErrorCallback) {
        self.shared.error_callbacks.write().push(callback);
    }

    fn on_close(&self, callback: CloseCallback) {
        self.shared.close_callbacks.write().push(callback);
    }
}

impl Drop for PhxSocket {
    fn drop(&mut self) {
        self.shared.close_live();
    }
}
