//! Relay client
//!
//! Connects to a relay server, completes the proxy handshake, sends
//! synthetic voice frames and reports what it hears from the others.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_relay::{
    audio::{frame_channel, ChannelSinkFactory, PlaybackStats, SyntheticCapture},
    config::AppConfig,
    network::RelayClient,
    session::ProxyEvent,
};

#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    server: Option<String>,
    no_capture: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("═══════════════════════════════════════════════");
    tracing::info!("            Voice Relay - Client               ");
    tracing::info!("═══════════════════════════════════════════════");

    let args = parse_args();
    let mut config = AppConfig::load_or_default(args.config.as_ref())
        .context("failed to load configuration")?;

    if let Some(server) = args.server {
        config.network.server_address = server;
    }
    if args.no_capture {
        config.capture.enabled = false;
    }

    let (factory, playback_rx) = ChannelSinkFactory::new(config.playback.queue_capacity);
    let mut client = RelayClient::connect(config.clone(), Box::new(factory))
        .await
        .context("failed to connect to relay server")?;

    let mut capture = None;
    if config.capture.enabled {
        let (frame_tx, frame_rx) = frame_channel(&config.capture);
        capture = Some(SyntheticCapture::start(&config.capture, frame_tx)?);
        client = client.with_capture(frame_rx);
    }

    // Log proxy lifecycle as it happens
    let mut events = client.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ProxyEvent::Assigned(id) => tracing::info!("Joined as proxy {}", id),
                ProxyEvent::Spawned { id, is_local: false } => {
                    tracing::info!("Participant {} joined", id)
                }
                ProxyEvent::Despawned(id) => tracing::info!("Participant {} left", id),
                _ => {}
            }
        }
    });

    let running = Arc::new(AtomicBool::new(true));
    let printer_running = running.clone();
    let interval = config.session.stats_interval();
    let printer = std::thread::spawn(move || {
        let stats = PlaybackStats::new();
        while printer_running.load(Ordering::Relaxed) {
            std::thread::sleep(Duration::from_millis(100).min(interval));
            stats.drain(&playback_rx);
        }
        stats
    });

    tracing::info!("Press Ctrl+C to stop");

    let session_stats = client
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    if let Some(mut capture) = capture {
        capture.stop();
    }
    running.store(false, Ordering::Relaxed);

    if let Ok(stats) = printer.join() {
        for (proxy, playback) in stats.snapshot() {
            tracing::info!(
                "Heard proxy {}: {} packets, {} bytes",
                proxy,
                playback.packets,
                playback.bytes
            );
        }
    }

    tracing::info!(
        "Sent {} packets, played {}, dropped {}",
        session_stats.packets_sent,
        session_stats.packets_played,
        session_stats.packets_dropped
    );

    Ok(())
}

fn parse_args() -> CliArgs {
    let mut args = CliArgs::default();
    let argv: Vec<String> = std::env::args().collect();
    let mut i = 1;

    while i < argv.len() {
        match argv[i].as_str() {
            "--config" | "-c" => {
                if i + 1 < argv.len() {
                    args.config = Some(PathBuf::from(&argv[i + 1]));
                    i += 1;
                }
            }
            "--server" | "-s" => {
                if i + 1 < argv.len() {
                    args.server = Some(argv[i + 1].clone());
                    i += 1;
                }
            }
            "--no-capture" => args.no_capture = true,
            "--help" | "-h" => {
                println!("Voice Relay - Client");
                println!();
                println!("Usage: relay-client [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>   Configuration file (default: platform config dir)");
                println!("  -s, --server <ADDR>   Relay server address (default: 127.0.0.1:7777)");
                println!("  --no-capture          Listen only");
                println!("  -h, --help            Show this help");
                std::process::exit(0);
            }
            other => tracing::warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    args
}
