use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, StreamError};

/// Slug accepted by the service for "every collection".
pub const ALL_COLLECTIONS: &str = "*";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn endpoint(&self) -> &'static str {
        match self {
            Network::Mainnet => "wss://stream.openseabeta.com/socket",
            Network::Testnet => "wss://testnets-stream.openseabeta.com/socket",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" => Ok(Network::Mainnet),
            "testnet" => Ok(Network::Testnet),
            other => Err(format!("unknown network {other:?} (expected mainnet|testnet)")),
        }
    }
}

/// Marketplace event kinds routed within a collection topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    ItemListed,
    ItemSold,
    ItemTransferred,
    ItemCancelled,
    ItemReceivedBid,
    ItemReceivedOffer,
    ItemMetadataUpdated,
}

impl EventType {
    pub const ALL: [EventType; 7] = [
        EventType::ItemListed,
        EventType::ItemSold,
        EventType::ItemTransferred,
        EventType::ItemCancelled,
        EventType::ItemReceivedBid,
        EventType::ItemReceivedOffer,
        EventType::ItemMetadataUpdated,
    ];

    /// Event name as it appears on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ItemListed => "item_listed",
            EventType::ItemSold => "item_sold",
            EventType::ItemTransferred => "item_transferred",
            EventType::ItemCancelled => "item_cancelled",
            EventType::ItemReceivedBid => "item_received_bid",
            EventType::ItemReceivedOffer => "item_received_offer",
            EventType::ItemMetadataUpdated => "item_metadata_updated",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        EventType::ALL
            .iter()
            .copied()
            .find(|e| e.as_str() == wanted)
            .ok_or_else(|| format!("unknown event type {s:?}"))
    }
}

pub fn collection_topic(slug: &str) -> String {
    format!("collection:{slug}")
}

/// Endpoint for `network` with the auth token attached as the `token` query parameter.
pub fn socket_url(network: Network, token: &str) -> Result<Url> {
    let mut url =
        Url::parse(network.endpoint()).map_err(|e| StreamError::InvalidUrl(e.to_string()))?;
    url.query_pairs_mut().append_pair("token", token);
    Ok(url)
}
