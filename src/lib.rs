//! Subscription client for the OpenSea stream API.
//!
//! [`StreamClient`] opens one channel per collection topic on a shared socket
//! and forwards raw event payloads to the callbacks registered on it.
//!
//! ```rust,no_run
//! use opensea_stream::{EventType, Network, StreamClient};
//!
//! # async fn run() -> opensea_stream::Result<()> {
//! let client = StreamClient::new(Network::Mainnet, "api-key", |e| log::error!("stream.error {e}"))?;
//! client.connect().await?;
//!
//! let mut sub = client
//!     .subscribe(&[EventType::ItemSold, EventType::ItemListed], "doodles-official", |payload| {
//!         println!("{payload}");
//!     })
//!     .await?;
//!
//! sub.unsubscribe().await?;
//! client.disconnect().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod phx;
pub mod socket;
pub mod types;

pub use client::{StreamClient, Subscription};
pub use error::{Result, StreamError};
pub use events::StreamEvent;
pub use phx::{PhxChannel, PhxSocket, SocketOptions};
pub use socket::{Channel, HandlerRef, LeaveAck, Reply, Socket};
pub use types::{collection_topic, socket_url, EventType, Network, ALL_COLLECTIONS};
