use std::env;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::{
    phx::SocketOptions,
    types::{EventType, Network, ALL_COLLECTIONS},
};

fn get_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn get_env_u64(key: &str, default: u64) -> Result<u64> {
    match get_env(key) {
        None => Ok(default),
        Some(v) => Ok(v
            .parse::<u64>()
            .map_err(|e| anyhow!("{key} invalid int: {e}"))?),
    }
}

fn get_env_string(key: &str, default: &str) -> String {
    get_env(key).unwrap_or_else(|| default.to_string())
}

/// Splits a comma list, dropping blanks.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

pub fn parse_events(raw: &str) -> Result<Vec<EventType>> {
    let mut events = Vec::new();
    for name in parse_list(raw) {
        let event = name.parse::<EventType>().map_err(|e| anyhow!(e))?;
        if !events.contains(&event) {
            events.push(event);
        }
    }
    Ok(events)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub network: Network,
    pub token: String,

    // Subscriptions
    pub collections: Vec<String>,
    pub events: Vec<EventType>,

    // Socket timing
    pub heartbeat_secs: u64,
    pub timeout_secs: u64,
}

impl Settings {
    /// Reads the environment. Call [`Settings::validate`] once CLI overrides are applied.
    pub fn load() -> Result<Self> {
        let network = get_env_string("OPENSEA_NETWORK", "mainnet")
            .parse::<Network>()
            .map_err(|e| anyhow!("OPENSEA_NETWORK: {e}"))?;

        let collections = parse_list(&get_env_string("OPENSEA_COLLECTIONS", ALL_COLLECTIONS));
        let events = match get_env("OPENSEA_EVENTS") {
            None => EventType::ALL.to_vec(),
            Some(raw) => parse_events(&raw).map_err(|e| anyhow!("OPENSEA_EVENTS: {e}"))?,
        };

        Ok(Self {
            network,
            token: get_env_string("OPENSEA_API_KEY", ""),
            collections,
            events,
            heartbeat_secs: get_env_u64("STREAM_HEARTBEAT_SECS", 30)?,
            timeout_secs: get_env_u64("STREAM_TIMEOUT_SECS", 10)?,
        })
    }

    pub fn socket_options(&self) -> SocketOptions {
        SocketOptions {
            heartbeat_interval: Duration::from_secs(self.heartbeat_secs),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.token.trim().is_empty() {
            return Err(anyhow!("OPENSEA_API_KEY must be set (or pass --token)"));
        }
        if self.collections.is_empty() {
            return Err(anyhow!("OPENSEA_COLLECTIONS must name at least one collection"));
        }
        if self.events.is_empty() {
            return Err(anyhow!("OPENSEA_EVENTS must name at least one event type"));
        }
        if self.heartbeat_secs < 1 {
            return Err(anyhow!(
                "STREAM_HEARTBEAT_SECS must be >= 1 (got {})",
                self.heartbeat_secs
            ));
        }
        if self.timeout_secs < 1 {
            return Err(anyhow!(
                "STREAM_TIMEOUT_SECS must be >= 1 (got {})",
                self.timeout_secs
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings {
            network: Network::Mainnet,
            token: "key".to_string(),
            collections: vec!["doodles-official".to_string()],
            events: vec![EventType::ItemSold],
            heartbeat_secs: 30,
            timeout_secs: 10,
        }
    }

    #[test]
    fn list_drops_blanks() {
        assert_eq!(parse_list(" a, ,b ,,"), vec!["a".to_string(), "b".to_string()]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn events_dedup_and_reject_unknown() {
        let events = parse_events("item_sold, item_listed,item_sold").unwrap();
        assert_eq!(events, vec![EventType::ItemSold, EventType::ItemListed]);
        assert!(parse_events("item_sold,item_burned").is_err());
    }

    #[test]
    fn validate_requires_token_and_targets() {
        assert!(settings().validate().is_ok());

        let mut s = settings();
        s.token = "  ".to_string();
        assert!(s.validate().is_err());

        let mut s = settings();
        s.collections.clear();
        assert!(s.validate().is_err());

        let mut s = settings();
        s.events.clear();
        assert!(s.validate().is_err());

        let mut s = settings();
        s.timeout_secs = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn socket_options_use_seconds() {
        let opts = settings().socket_options();
        assert_eq!(opts.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(opts.timeout, Duration::from_secs(10));
    }
}
