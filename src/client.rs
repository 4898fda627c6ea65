use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::OnceCell;

use crate::{
    error::{Result, StreamError},
    phx::{PhxSocket, SocketOptions},
    socket::{Channel, ErrorCallback, HandlerRef, PayloadCallback, Socket},
    types::{collection_topic, socket_url, EventType, Network},
};

/// One cached topic. `subscribers` and `leaving` only change under the cache lock.
struct TopicEntry<C> {
    topic: String,
    channel: OnceCell<Arc<C>>,
    subscribers: AtomicUsize,
    leaving: AtomicBool,
}

impl<C> TopicEntry<C> {
    fn new(topic: &str) -> Self {
        Self {
            topic: topic.to_string(),
            channel: OnceCell::new(),
            subscribers: AtomicUsize::new(0),
            leaving: AtomicBool::new(false),
        }
    }
}

type ChannelCache<C> = Arc<Mutex<HashMap<String, Arc<TopicEntry<C>>>>>;

/// Subscriber slot taken by `reserve`. Dropped while still armed
/// (failed or cancelled join), it gives the slot back and evicts an entry nobody joined.
struct Reservation<C> {
    entry: Arc<TopicEntry<C>>,
    cache: ChannelCache<C>,
    armed: bool,
}

impl<C> Reservation<C> {
    fn disarm(mut self) -> Arc<TopicEntry<C>> {
        self.armed = false;
        self.entry.clone()
    }
}

impl<C> Drop for Reservation<C> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut channels = self.cache.lock();
        let remaining = self.entry.subscribers.fetch_sub(1, Ordering::SeqCst) - 1;
        let cached = channels
            .get(&self.entry.topic)
            .is_some_and(|e| Arc::ptr_eq(e, &self.entry));
        if remaining == 0 && cached && self.entry.channel.get().is_none() {
            channels.remove(&self.entry.topic);
            log::debug!("stream.subscribe.released topic={}", self.entry.topic);
        }
    }
}

/// Subscription facade over one shared socket.
///
/// Channels are opened lazily, one per collection topic, and shared by every
/// subscription on that collection.
pub struct StreamClient<S: Socket = PhxSocket> {
    socket: Arc<S>,
    channels: ChannelCache<S::Channel>,
    /// Set by `disconnect`, cleared by `connect`. The close hook reconnects only while unset.
    disconnected: Arc<tokio::sync::Mutex<bool>>,
}

impl StreamClient<PhxSocket> {
    pub fn new<F>(network: Network, token: &str, on_error: F) -> Result<Self>
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        Self::with_options(network, token, SocketOptions::default(), on_error)
    }

    pub fn with_options<F>(
        network: Network,
        token: &str,
        options: SocketOptions,
        on_error: F,
    ) -> Result<Self>
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        let endpoint = socket_url(network, token)?;
        log::debug!("stream.endpoint network={} host={:?}", network, endpoint.host_str());
        Ok(Self::with_socket(PhxSocket::new(endpoint, options), on_error))
    }
}

impl<S: Socket> StreamClient<S> {
    /// Wires `socket` so errors reach `on_error` and an unexpected close triggers one reconnect.
    pub fn with_socket<F>(socket: S, on_error: F) -> Self
    where
        F: Fn(StreamError) + Send + Sync + 'static,
    {
        let socket = Arc::new(socket);
        let on_error: ErrorCallback = Arc::new(on_error);

        socket.on_error(on_error.clone());

        let disconnected = Arc::new(tokio::sync::Mutex::new(false));
        let weak: Weak<S> = Arc::downgrade(&socket);
        let flag = disconnected.clone();
        socket.on_close(Arc::new(move || {
            let Some(socket) = weak.upgrade() else {
                return;
            };
            let on_error = on_error.clone();
            let flag = flag.clone();
            tokio::spawn(async move {
                let disconnected = flag.lock().await;
                if *disconnected {
                    log::info!("stream.socket.closed after disconnect, not reconnecting");
                    return;
                }
                log::warn!("stream.socket.closed reconnecting");
                if let Err(e) = socket.reconnect().await {
                    on_error(e);
                }
            });
        }));

        Self {
            socket,
            channels: Arc::new(Mutex::new(HashMap::new())),
            disconnected,
        }
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub async fn connect(&self) -> Result<()> {
        let mut disconnected = self.disconnected.lock().await;
        self.socket.connect().await?;
        *disconnected = false;
        Ok(())
    }

    /// Drops every cached channel, then disconnects the socket.
    pub async fn disconnect(&self) -> Result<()> {
        let mut disconnected = self.disconnected.lock().await;
        *disconnected = true;
        let dropped = {
            let mut channels = self.channels.lock();
            let n = channels.len();
            channels.clear();
            n
        };
        log::info!("stream.disconnect dropped_channels={}", dropped);
        self.socket.disconnect().await
    }

    pub fn cached_topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.channels.lock().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn is_cached(&self, topic: &str) -> bool {
        self.channels.lock().contains_key(topic)
    }

    /// Registers `callback` for each of `events` on the collection's topic.
    pub async fn subscribe<F>(
        &self,
        events: &[EventType],
        collection_slug: &str,
        callback: F,
    ) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let topic = collection_topic(collection_slug);
        if events.is_empty() {
            return Err(StreamError::NoEventTypes(topic));
        }

        let reservation = self.reserve(&topic);
        let channel = self.channel_for(&reservation.entry).await?;
        let entry = reservation.disarm();

        let callback: PayloadCallback = Arc::new(callback);
        let mut handlers = Vec::with_capacity(events.len());
        for event in events {
            log::info!("stream.subscribe topic={} event={}", topic, event);
            handlers.push((*event, channel.on(event.as_str(), callback.clone())));
        }

        Ok(Subscription {
            topic,
            handlers,
            channel,
            entry,
            cache: self.channels.clone(),
            active: true,
        })
    }

    pub async fn on_item_listed<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemListed], slug, callback).await
    }

    pub async fn on_item_sold<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemSold], slug, callback).await
    }

    pub async fn on_item_transferred<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemTransferred], slug, callback).await
    }

    pub async fn on_item_cancelled<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemCancelled], slug, callback).await
    }

    pub async fn on_item_received_bid<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemReceivedBid], slug, callback).await
    }

    pub async fn on_item_received_offer<F>(&self, slug: &str, callback: F) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemReceivedOffer], slug, callback).await
    }

    pub async fn on_item_metadata_updated<F>(
        &self,
        slug: &str,
        callback: F,
    ) -> Result<Subscription<S::Channel>>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        self.subscribe(&[EventType::ItemMetadataUpdated], slug, callback).await
    }

    /// Cached entry for `topic` with one subscriber slot taken. A leaving entry is replaced.
    fn reserve(&self, topic: &str) -> Reservation<S::Channel> {
        let mut channels = self.channels.lock();
        let entry = match channels.get(topic) {
            Some(e) if !e.leaving.load(Ordering::SeqCst) => e.clone(),
            _ => {
                let e = Arc::new(TopicEntry::new(topic));
                channels.insert(topic.to_string(), e.clone());
                e
            }
        };
        entry.subscribers.fetch_add(1, Ordering::SeqCst);
        Reservation {
            entry,
            cache: self.channels.clone(),
            armed: true,
        }
    }

    async fn channel_for(&self, entry: &TopicEntry<S::Channel>) -> Result<Arc<S::Channel>> {
        let channel = entry
            .channel
            .get_or_try_init(|| async {
                let channel = self.socket.channel(&entry.topic);
                channel.join().await?;
                log::info!("stream.channel.joined topic={}", entry.topic);
                Ok::<_, StreamError>(Arc::new(channel))
            })
            .await?;
        Ok(channel.clone())
    }
}

/// Handle for one callback registered by [`StreamClient::subscribe`].
///
/// Dropping it keeps the callback registered; call [`Subscription::unsubscribe`].
pub struct Subscription<C: Channel> {
    topic: String,
    handlers: Vec<(EventType, HandlerRef)>,
    channel: Arc<C>,
    entry: Arc<TopicEntry<C>>,
    cache: ChannelCache<C>,
    active: bool,
}

impl<C: Channel> Subscription<C> {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn events(&self) -> Vec<EventType> {
        self.handlers.iter().map(|(e, _)| *e).collect()
    }

    /// Removes this subscription's callbacks. The last subscription on a topic
    /// also leaves the channel; the topic is evicted once the leave is acknowledged.
    ///
    /// If the leave cannot be sent the error is returned and the call may be repeated.
    pub async fn unsubscribe(&mut self) -> Result<()> {
        if self.active {
            for (event, handler) in &self.handlers {
                self.channel.off(event.as_str(), *handler);
            }
        }

        let should_leave = {
            let channels = self.cache.lock();
            if self.active {
                self.active = false;
                self.entry.subscribers.fetch_sub(1, Ordering::SeqCst);
            }
            let cached = channels
                .get(&self.topic)
                .is_some_and(|e| Arc::ptr_eq(e, &self.entry));
            let last = self.entry.subscribers.load(Ordering::SeqCst) == 0;
            if last && cached && !self.entry.leaving.load(Ordering::SeqCst) {
                self.entry.leaving.store(true, Ordering::SeqCst);
                true
            } else {
                false
            }
        };
        if !should_leave {
            log::debug!("stream.unsubscribe topic={} channel_kept=true", self.topic);
            return Ok(());
        }

        log::info!("stream.unsubscribe topic={} leaving channel", self.topic);
        let ack = match self.channel.leave().await {
            Ok(ack) => ack,
            Err(e) => {
                let _channels = self.cache.lock();
                if self.entry.subscribers.load(Ordering::SeqCst) == 0 {
                    self.entry.leaving.store(false, Ordering::SeqCst);
                }
                log::warn!("stream.unsubscribe.leave_failed topic={} err={}", self.topic, e);
                return Err(e);
            }
        };

        let cache = self.cache.clone();
        let entry = self.entry.clone();
        tokio::spawn(async move {
            match ack.wait().await {
                Ok(reply) if reply.is_ok() => {
                    let mut channels = cache.lock();
                    let cached = channels
                        .get(&entry.topic)
                        .is_some_and(|e| Arc::ptr_eq(e, &entry));
                    if cached {
                        channels.remove(&entry.topic);
                        log::info!("stream.channel.left topic={}", entry.topic);
                    }
                }
                Ok(reply) => {
                    log::warn!(
                        "stream.channel.leave_rejected topic={} status={} response={}",
                        entry.topic,
                        reply.status,
                        reply.response
                    );
                }
                Err(e) => {
                    log::warn!("stream.channel.leave_failed topic={} err={}", entry.topic, e);
                }
            }
        });
        Ok(())
    }
}
