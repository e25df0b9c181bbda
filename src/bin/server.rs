//! Relay server
//!
//! Accepts participant connections, assigns proxies and relays voice
//! packets. With `--host` the server also runs its own participant, which
//! captures synthetic frames and plays what the others send.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use voice_relay::{
    audio::{frame_channel, ChannelSinkFactory, PlaybackStats, SyntheticCapture},
    config::AppConfig,
    network::{HostParticipant, RelayServer},
};

/// Command line overrides
#[derive(Debug, Default)]
struct CliArgs {
    config: Option<PathBuf>,
    bind: Option<String>,
    port: Option<u16>,
    host: bool,
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
    tracing::info!("            Voice Relay - Server               ");
    tracing::info!("═══════════════════════════════════════════════");

    let args = parse_args();
    let mut config = AppConfig::load_or_default(args.config.as_ref())
        .context("failed to load configuration")?;

    if let Some(bind) = args.bind {
        config.network.bind_address = bind;
    }
    if let Some(port) = args.port {
        config.network.port = port;
    }
    if args.host {
        config.session.host_participant = true;
    }
    if args.no_capture {
        config.capture.enabled = false;
    }

    let mut server = RelayServer::bind(config.clone()).await?;

    // Host participant: synthetic capture in, channel playback out
    let mut capture = None;
    let running = Arc::new(AtomicBool::new(true));
    let mut printer = None;

    if config.session.host_participant {
        let (factory, playback_rx) = ChannelSinkFactory::new(config.playback.queue_capacity);

        let frames = if config.capture.enabled {
            let (frame_tx, frame_rx) = frame_channel(&config.capture);
            capture = Some(SyntheticCapture::start(&config.capture, frame_tx)?);
            Some(frame_rx)
        } else {
            None
        };

        server = server.with_host(HostParticipant {
            sinks: Box::new(factory),
            capture: frames,
        });

        let stats = PlaybackStats::new();
        let printer_running = running.clone();
        let interval = config.session.stats_interval();
        printer = Some(std::thread::spawn(move || {
            while printer_running.load(Ordering::Relaxed) {
                std::thread::sleep(Duration::from_millis(100).min(interval));
                stats.drain(&playback_rx);
            }
            for (proxy, playback) in stats.snapshot() {
                tracing::info!(
                    "Host heard proxy {}: {} packets, {} bytes",
                    proxy,
                    playback.packets,
                    playback.bytes
                );
            }
        }));
    }

    tracing::info!("Press Ctrl+C to stop");

    let summary = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl+C: {}", e);
            }
        })
        .await?;

    if let Some(mut capture) = capture {
        capture.stop();
        tracing::info!(
            "Host capture produced {} frames ({} dropped)",
            capture.frames_produced(),
            capture.frames_dropped()
        );
    }
    running.store(false, Ordering::Relaxed);
    if let Some(printer) = printer {
        let _ = printer.join();
    }

    tracing::info!(
        "Relayed {} packets ({} deliveries, {} dropped, {} send failures)",
        summary.server.packets_relayed,
        summary.server.deliveries,
        summary.server.packets_dropped,
        summary.server.send_failures
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
            "--bind" | "-b" => {
                if i + 1 < argv.len() {
                    args.bind = Some(argv[i + 1].clone());
                    i += 1;
                }
            }
            "--port" | "-p" => {
                if i + 1 < argv.len() {
                    match argv[i + 1].parse() {
                        Ok(port) => args.port = Some(port),
                        Err(_) => tracing::warn!("Ignoring invalid port {}", argv[i + 1]),
                    }
                    i += 1;
                }
            }
            "--host" => args.host = true,
            "--no-capture" => args.no_capture = true,
            "--help" | "-h" => {
                println!("Voice Relay - Server");
                println!();
                println!("Usage: relay-server [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -c, --config <PATH>   Configuration file (default: platform config dir)");
                println!("  -b, --bind <ADDR>     Bind address (default: 0.0.0.0)");
                println!("  -p, --port <PORT>     TCP port (default: 7777)");
                println!("  --host                Run a host participant in the server");
                println!("  --no-capture          Host participant listens only");
                println!("  -h, --help            Show this help");
                std::process::exit(0);
            }
            other => tracing::warn!("Ignoring unknown argument {}", other),
        }
        i += 1;
    }

    args
}
