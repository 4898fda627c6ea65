use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;

use opensea_stream::{
    config::{parse_events, Settings},
    StreamClient, StreamEvent,
};

#[derive(Debug, Parser)]
#[command(name = "opensea-stream", version)]
struct Cli {
    /// Override OPENSEA_NETWORK (mainnet|testnet)
    #[arg(long)]
    network: Option<String>,

    /// Override OPENSEA_API_KEY
    #[arg(long)]
    token: Option<String>,

    /// Collection slug to watch; repeatable. Overrides OPENSEA_COLLECTIONS.
    #[arg(long = "collection")]
    collections: Vec<String>,

    /// Event type to watch; repeatable. Overrides OPENSEA_EVENTS.
    #[arg(long = "event")]
    events: Vec<String>,

    /// Print raw payloads instead of one summary line per event
    #[arg(long)]
    raw: bool,
}

fn print_event(raw: bool, payload: Value) {
    if raw {
        println!("{payload}");
        return;
    }
    match StreamEvent::from_payload(&payload) {
        Ok(ev) => println!(
            "{} {} collection={} nft={}",
            ev.sent_at.as_deref().unwrap_or("-"),
            ev.event_type,
            ev.collection_slug().unwrap_or("-"),
            ev.nft_id().unwrap_or("-"),
        ),
        Err(e) => {
            log::warn!("event.decode.error err={}", e);
            println!("{payload}");
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let mut settings = Settings::load()?;
    if let Some(n) = cli.network {
        settings.network = n.parse().map_err(|e: String| anyhow::anyhow!(e))?;
    }
    if let Some(t) = cli.token {
        settings.token = t;
    }
    if !cli.collections.is_empty() {
        settings.collections = cli.collections;
    }
    if !cli.events.is_empty() {
        settings.events = parse_events(&cli.events.join(","))?;
    }
    settings.validate()?;

    log::info!(
        "app.start network={} collections={} events={}",
        settings.network,
        settings.collections.join(","),
        settings
            .events
            .iter()
            .map(|e| e.as_str())
            .collect::<Vec<_>>()
            .join(",")
    );

    let client = StreamClient::with_options(
        settings.network,
        &settings.token,
        settings.socket_options(),
        |e| log::error!("stream.error {}", e),
    )?;
    client.connect().await.context("connect to stream")?;

    let raw = cli.raw;
    let mut subscriptions = Vec::with_capacity(settings.collections.len());
    for slug in &settings.collections {
        let sub = client
            .subscribe(&settings.events, slug, move |payload| print_event(raw, payload))
            .await
            .with_context(|| format!("subscribe to {slug}"))?;
        subscriptions.push(sub);
    }

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;
    log::info!("app.shutdown subscriptions={}", subscriptions.len());

    for mut sub in subscriptions {
        let topic = sub.topic().to_string();
        if let Err(e) = sub.unsubscribe().await {
            log::warn!("app.unsubscribe.error topic={} err={}", topic, e);
        }
    }
    client.disconnect().await?;
    Ok(())
}
