//! TCP relay client runtime

use bytes::Bytes;
use std::future::Future;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use crate::config::AppConfig;
use crate::network::connection::Connection;
use crate::network::server::next_frame;
use crate::session::{ClientSession, ClientStats, ProxyEvent, SinkFactory};

/// Shortest handshake timeout poll
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

pub struct RelayClient {
    connection: Connection,
    session: ClientSession,
    capture: Option<mpsc::Receiver<Bytes>>,
    config: AppConfig,
}

impl RelayClient {
    /// Connect to `config.network.server_address`
    pub async fn connect(config: AppConfig, sinks: Box<dyn SinkFactory>) -> crate::Result<Self> {
        let addr = config.network.server_socket_addr()?;
        let connection = Connection::connect(addr, &config.network).await?;
        tracing::info!("Connected to relay server at {}", addr);

        Ok(Self {
            connection,
            session: ClientSession::new(sinks, &config.session),
            capture: None,
            config,
        })
    }

    /// Send frames from `capture` once the handshake is active
    pub fn with_capture(mut self, capture: mpsc::Receiver<Bytes>) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Subscribe to proxy lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.session.subscribe()
    }

    /// Run until `shutdown` resolves or the server goes away
    pub async fn run<F>(self, shutdown: F) -> crate::Result<ClientStats>
    where
        F: Future<Output = ()>,
    {
        let Self {
            connection,
            mut session,
            mut capture,
            config,
        } = self;

        let (mut link, mut reader) = connection.into_parts();
        session.start(&mut link)?;

        let poll_interval = (config.session.request_timeout() / 4).max(MIN_POLL_INTERVAL);
        let mut poll_tick = tokio::time::interval(poll_interval);
        let mut stats_tick = tokio::time::interval(config.session.stats_interval());
        stats_tick.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Client shutting down");
                    break;
                }
                message = reader.recv() => match message {
                    Some(message) => session.handle_message(message, &mut link),
                    None => {
                        tracing::warn!("Server closed the connection");
                        break;
                    }
                },
                Some(frame) = next_frame(&mut capture) => {
                    session.on_captured(frame, &mut link);
                }
                _ = poll_tick.tick() => session.poll_timeouts(&mut link),
                _ = stats_tick.tick() => {
                    let stats = session.stats();
                    tracing::info!(
                        "Proxy {:?} ({}), handles: {}, sent: {}, played: {}, dropped: {}",
                        session.local_id().map(|id| id.get()),
                        session.handshake(),
                        stats.handles,
                        stats.packets_sent,
                        stats.packets_played,
                        stats.packets_dropped
                    );
                }
            }
        }

        session.shutdown();
        Ok(session.stats())
    }
}
