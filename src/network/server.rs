//! TCP relay server runtime
//!
//! One event loop task owns the [`ServerSession`] and the
//! [`ConnectionTable`]. Per-connection reader tasks forward decoded
//! messages into the loop as [`TransportEvent`]s; per-connection writer
//! tasks drain the queues the table sends into. An optional host
//! participant lives inside the same loop and talks to the session through
//! loopback queues.

use bytes::Bytes;
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use crate::config::AppConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::error::NetworkError;
use crate::network::connection::Connection;
use crate::network::socket;
use crate::network::transport::{self, ConnectionTable, LoopbackLink, TransportEvent};
use crate::protocol::{ConnectionId, Message};
use crate::session::{ClientSession, ClientStats, ServerSession, ServerStats, SinkFactory};

/// In-process participant on the server machine
pub struct HostParticipant {
    /// Sinks for remote participants heard by the host
    pub sinks: Box<dyn SinkFactory>,

    /// Frames captured by the host
    pub capture: Option<mpsc::Receiver<Bytes>>,
}

/// Final counters after the server stops
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerSummary {
    pub server: ServerStats,
    pub host: Option<ClientStats>,
}

pub struct RelayServer {
    listener: TcpListener,
    config: AppConfig,
    host: Option<HostParticipant>,
    session: ServerSession,
}

impl RelayServer {
    /// Bind the listener described by `config.network`
    pub async fn bind(config: AppConfig) -> crate::Result<Self> {
        let addr = config.network.bind_socket_addr()?;
        let listener = socket::bind_listener(addr, &config.network)?;
        tracing::info!("Relay server listening on {}", listener.local_addr()?);

        Ok(Self {
            listener,
            config,
            host: None,
            session: ServerSession::new(),
        })
    }

    /// Run a host participant inside the server
    pub fn with_host(mut self, host: HostParticipant) -> Self {
        self.host = Some(host);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        Ok(self.listener.local_addr()?)
    }

    pub fn session(&self) -> &ServerSession {
        &self.session
    }

    /// Serve until `shutdown` resolves
    pub async fn run<F>(self, shutdown: F) -> crate::Result<ServerSummary>
    where
        F: Future<Output = ()>,
    {
        let Self {
            listener,
            config,
            host,
            mut session,
        } = self;

        let (event_tx, mut event_rx) = mpsc::channel::<TransportEvent>(EVENT_CHANNEL_CAPACITY);
        let mut table = ConnectionTable::new(config.session.max_connections);

        let (mut host, mut host_capture) = match host {
            Some(participant) => {
                let capture = participant.capture;
                let runtime = HostRuntime::start(participant.sinks, &config, &mut session, &mut table)?;
                (Some(runtime), capture)
            }
            None => (None, None),
        };

        let mut stats_tick = tokio::time::interval(config.session.stats_interval());
        stats_tick.tick().await;

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Relay server shutting down");
                    break;
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => accept(stream, addr, &config, &mut table, &event_tx),
                    Err(e) => tracing::warn!("Accept failed: {}", e),
                },
                Some(event) = event_rx.recv() => {
                    if let TransportEvent::Disconnected(id) = &event {
                        table.remove(*id);
                        tracing::info!(
                            "Connection {} disconnected ({} remaining)",
                            id,
                            table.remote_count()
                        );
                    }
                    session.handle_event(event, &mut table);
                }
                Some(frame) = next_frame(&mut host_capture) => {
                    if let Some(host) = host.as_mut() {
                        host.client.on_captured(frame, &mut host.link);
                    }
                }
                _ = stats_tick.tick() => {
                    log_stats(&session, host.as_ref().map(|h| h.client.stats()));
                }
            }

            if let Some(host) = host.as_mut() {
                host.pump(&mut session, &mut table);
            }
        }

        session.shutdown(&mut table);
        let host_stats = host.map(|mut host| {
            host.pump(&mut session, &mut table);
            host.client.shutdown();
            host.client.stats()
        });

        Ok(ServerSummary {
            server: session.stats(),
            host: host_stats,
        })
    }
}

/// Host participant wired to the session through loopback queues
struct HostRuntime {
    client: ClientSession,

    /// Host → server
    link: LoopbackLink,
    outbox: crossbeam_channel::Receiver<Message>,

    /// Server → host
    inbox: crossbeam_channel::Receiver<Message>,
}

impl HostRuntime {
    fn start(
        sinks: Box<dyn SinkFactory>,
        config: &AppConfig,
        session: &mut ServerSession,
        table: &mut ConnectionTable,
    ) -> crate::Result<Self> {
        let (to_host, inbox) = crossbeam_channel::unbounded();
        table.attach_host(to_host);
        let (link, outbox) = transport::loopback();

        let mut client = ClientSession::new(sinks, &config.session);
        let id = session.request_proxy(ConnectionId::HOST, table)?;
        client.assign_local(id)?;

        let mut runtime = Self {
            client,
            link,
            outbox,
            inbox,
        };
        runtime.pump(session, table);
        tracing::info!("Host participant joined as proxy {}", id);
        Ok(runtime)
    }

    /// Move queued loopback messages until both directions are idle
    fn pump(&mut self, session: &mut ServerSession, table: &mut ConnectionTable) {
        loop {
            let mut progressed = false;

            while let Ok(message) = self.inbox.try_recv() {
                self.client.handle_message(message, &mut self.link);
                progressed = true;
            }
            while let Ok(message) = self.outbox.try_recv() {
                session.handle_event(TransportEvent::Message(ConnectionId::HOST, message), table);
                progressed = true;
            }

            if !progressed {
                break;
            }
        }
    }
}

fn accept(
    stream: TcpStream,
    addr: SocketAddr,
    config: &AppConfig,
    table: &mut ConnectionTable,
    events: &mpsc::Sender<TransportEvent>,
) {
    let id = match table.allocate_id() {
        Ok(id) => id,
        Err(e) => {
            tracing::warn!("Rejecting connection from {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = socket::configure_stream(&stream, &config.network) {
        tracing::warn!("Failed to configure stream from {}: {}", addr, e);
    }

    let (writer, mut reader) = Connection::new(stream, config.network.outbound_queue).into_parts();
    table.insert(id, writer);
    tracing::info!(
        "Connection {} accepted from {} ({} connected)",
        id,
        addr,
        table.remote_count()
    );

    let events = events.clone();
    tokio::spawn(async move {
        if events.send(TransportEvent::Connected(id)).await.is_err() {
            return;
        }
        while let Some(message) = reader.recv().await {
            if events.send(TransportEvent::Message(id, message)).await.is_err() {
                return;
            }
        }
        let _ = events.send(TransportEvent::Disconnected(id)).await;
    });
}

/// Next captured frame; pending forever once the source is gone
pub(crate) async fn next_frame(capture: &mut Option<mpsc::Receiver<Bytes>>) -> Option<Bytes> {
    match capture {
        Some(rx) => match rx.recv().await {
            Some(frame) => Some(frame),
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

fn log_stats(session: &ServerSession, host: Option<ClientStats>) {
    let stats = session.stats();
    tracing::info!(
        "Proxies: {}, relayed: {}, deliveries: {}, dropped: {}, send failures: {}",
        stats.proxies,
        stats.packets_relayed,
        stats.deliveries,
        stats.packets_dropped,
        stats.send_failures
    );
    if let Some(host) = host {
        tracing::info!(
            "Host: handles {}, sent {}, played {}",
            host.handles,
            host.packets_sent,
            host.packets_played
        );
    }
}
