use std::env;
use std::time::Instant;
use anyhow::{Context, bail};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use upstream::config::ClientConfig;
use upstream::core::{ItemEvent, StreamEvent};
use upstream::utils::{format_bytes, format_duration, format_rate};
use upstream::Client;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = env::args().skip(1);
    let Some(title) = args.next() else {
        bail!("usage: upstream <title> <file or url>...");
    };
    let payloads: Vec<String> = args.collect();

    let config_path = env::var("UPSTREAM_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = ClientConfig::load_config(&config_path)
        .with_context(|| format!("failed to load {}", config_path))?;
    let client = Client::from_config(config).context("failed to build client")?;

    let mut stream = client.stream(title);
    stream.on(|event| match event {
        StreamEvent::Saved { id } => info!(%id, "stream created"),
        StreamEvent::ItemFailed { index, error, .. } => error!(index, %error, "item failed"),
        StreamEvent::End { saved, failed } => info!(saved, failed, "done"),
        StreamEvent::ItemAdded { .. } => {}
    });

    for payload in &payloads {
        if payload.starts_with("http://") || payload.starts_with("https://") {
            stream.link(payload)?;
        } else {
            stream.file(payload);
        }
    }

    for item in stream.items_mut() {
        let started = Instant::now();
        let name = item.title().unwrap_or_default().to_string();
        item.on(move |event| match event {
            ItemEvent::Progress(info) => info!(
                item = %name,
                sent = %format_bytes(info.sent),
                total = %format_bytes(info.total),
                rate = %format_rate(info.sent, started.elapsed()),
                "{:.1}%",
                info.percent
            ),
            ItemEvent::End => info!(item = %name, elapsed = %format_duration(started.elapsed()), "uploaded"),
            ItemEvent::Saved { .. } => {}
        });
    }

    stream.save().await.context("failed to save stream")?;

    for item in stream.items() {
        if let Some(remote) = &item.record().remote {
            println!("{}\t{}", item.title().unwrap_or_default(), remote);
        }
    }

    Ok(())
}
