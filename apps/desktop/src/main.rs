use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Result;
use clap::Parser;
use client_core::{MessageSynchronizer, SyncEvent, WebSocketConnection};
use tokio_stream::{
    wrappers::{errors::BroadcastStreamRecvError, BroadcastStream},
    StreamExt,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;

const BACKFILL_RETRY: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
struct Args {
    #[arg(long, default_value = config::DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[arg(long)]
    server_url: Option<String>,
    /// Channel to join; repeatable. Replaces the configured channel list.
    #[arg(long = "channel")]
    channels: Vec<String>,
    /// Older pages to request per channel after the initial load.
    #[arg(long, default_value_t = 0)]
    backfill: u32,
    /// Text to post to the first channel once joined.
    #[arg(long)]
    send: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = config::load_settings(&args.config)?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if !args.channels.is_empty() {
        settings.channels = args.channels;
    }

    let filter = EnvFilter::try_new(&settings.log_filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let connection = WebSocketConnection::connect(&settings.server_url).await?;
    let sync = MessageSynchronizer::new(settings.sync_config());
    let printer = tokio::spawn(print_events(BroadcastStream::new(sync.subscribe_events())));

    sync.on_socket_connected(connection.clone()).await;
    for channel in &settings.channels {
        sync.on_joined_channel(channel).await?;
    }

    if let (Some(text), Some(channel)) = (args.send.as_deref(), settings.channels.first()) {
        if let Err(err) = sync.send_message(channel, text).await {
            warn!(channel = %channel, error = %err, "desktop: send failed");
        }
    }

    for channel in &settings.channels {
        for _ in 0..args.backfill {
            backfill_page(&sync, channel).await?;
        }
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("desktop: interrupted"),
        _ = connection.closed() => warn!("desktop: server closed the connection"),
    }

    sync.on_socket_disconnected().await;
    if connection.is_connected() {
        if let Err(err) = connection.close().await {
            warn!(error = %err, "desktop: websocket close failed");
        }
    }
    printer.abort();
    Ok(())
}

/// Requests one older page, waiting for the loading gate to free up.
async fn backfill_page(sync: &Arc<MessageSynchronizer>, channel: &str) -> Result<()> {
    while !sync.load_older_messages(channel).await? {
        tokio::time::sleep(BACKFILL_RETRY).await;
    }
    Ok(())
}

async fn print_events(mut events: BroadcastStream<SyncEvent>) {
    while let Some(event) = events.next().await {
        match event {
            Ok(SyncEvent::MessagesUpdated { channel, messages }) => {
                println!("#{channel}: {} messages", messages.len());
                if let Some(latest) = messages.last() {
                    match serde_json::to_string(latest) {
                        Ok(json) => println!("  latest {json}"),
                        Err(err) => warn!(error = %err, "desktop: cannot render message"),
                    }
                }
            }
            Ok(SyncEvent::Error(message)) => eprintln!("error: {message}"),
            Ok(SyncEvent::LoadingStarted { .. } | SyncEvent::LoadingStopped { .. }) => {}
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                warn!(skipped, "desktop: event printer lagged");
            }
        }
    }
}
