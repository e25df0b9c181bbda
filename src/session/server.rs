//! Server-side relay session
//!
//! Owns the [`ProxyRegistry`] and processes transport events one at a time:
//!
//! ```text
//!  Connected(c)         ─► (nothing until the peer asks)
//!  Message(c, Request)  ─► registry.request(c)
//!                            ├─► ProxyAssigned(id) ─► c          (non-host only)
//!                            ├─► SpawnProxy(existing) ─► c        (late join)
//!                            └─► SpawnProxy(id) ─► everyone
//!  Message(c, Packet)   ─► validate origin == id(c) ─► relay to everyone except origin
//!  Disconnected(c)      ─► registry.release(c) ─► DespawnProxy(id) ─► everyone
//! ```

use tokio::sync::broadcast;

use crate::constants::PROXY_EVENT_CAPACITY;
use crate::error::ProxyError;
use crate::network::transport::{Transport, TransportEvent};
use crate::protocol::{ConnectionId, Message, PacketEnvelope, ProxyId};
use crate::proxy::ProxyRegistry;
use crate::session::ProxyEvent;

/// Outcome of one relay or broadcast
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    /// Connections the message was handed to
    pub delivered: usize,
    /// Connections whose send failed
    pub failed: usize,
}

/// Server counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ServerStats {
    pub proxies: usize,
    pub packets_relayed: u64,
    pub deliveries: u64,
    pub packets_dropped: u64,
    pub send_failures: u64,
}

/// Registry plus relay, driven by transport events
pub struct ServerSession {
    registry: ProxyRegistry,
    stats: ServerStats,
    event_tx: broadcast::Sender<ProxyEvent>,
}

impl ServerSession {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(PROXY_EVENT_CAPACITY);
        Self {
            registry: ProxyRegistry::new(),
            stats: ServerStats::default(),
            event_tx,
        }
    }

    /// Subscribe to proxy lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.event_tx.subscribe()
    }

    pub fn registry(&self) -> &ProxyRegistry {
        &self.registry
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            proxies: self.registry.len(),
            ..self.stats
        }
    }

    /// Process one transport event
    pub fn handle_event<T: Transport + ?Sized>(&mut self, event: TransportEvent, transport: &mut T) {
        match event {
            TransportEvent::Connected(connection) => {
                tracing::debug!("Connection {} opened", connection);
            }
            TransportEvent::Disconnected(connection) => {
                tracing::debug!("Connection {} closed", connection);
                self.release_proxy(connection, transport);
            }
            TransportEvent::Message(connection, message) => match message {
                Message::RequestProxy => {
                    let _ = self.request_proxy(connection, transport);
                }
                Message::Packet(envelope) => self.on_packet(connection, envelope, transport),
                other => {
                    tracing::warn!(
                        "Ignoring unexpected {:?} from connection {}",
                        other.message_type(),
                        connection
                    );
                }
            },
        }
    }

    /// Create and announce a proxy for `connection`
    ///
    /// The host connection is not sent ProxyAssigned; the caller hands the
    /// returned identifier to the host participant directly.
    pub fn request_proxy<T: Transport + ?Sized>(
        &mut self,
        connection: ConnectionId,
        transport: &mut T,
    ) -> Result<ProxyId, ProxyError> {
        let request = self.registry.request(connection).map_err(|e| {
            tracing::warn!("Proxy request from connection {} refused: {}", connection, e);
            e
        })?;
        let id = request.id();

        if !connection.is_host() {
            self.send(connection, &Message::ProxyAssigned(id), transport);
        }

        if !request.is_new() {
            tracing::debug!("Connection {} already owns proxy {}", connection, id);
            return Ok(id);
        }

        tracing::info!("Proxy {} registered for connection {}", id, connection);

        for existing in self.registry.ids() {
            if existing != id {
                self.send(connection, &Message::SpawnProxy(existing), transport);
            }
        }
        self.broadcast(&Message::SpawnProxy(id), transport);

        let _ = self.event_tx.send(ProxyEvent::Registered(id));
        Ok(id)
    }

    /// Destroy the proxy of a departed connection and announce it
    pub fn release_proxy<T: Transport + ?Sized>(&mut self, connection: ConnectionId, transport: &mut T) {
        let handle = match self.registry.release(connection) {
            Ok(handle) => handle,
            Err(_) => {
                tracing::warn!(
                    "Release requested for connection {} but no proxy is registered",
                    connection
                );
                return;
            }
        };

        if let Some(id) = handle.id() {
            tracing::info!(
                "Proxy {} released ({} packets relayed)",
                id,
                handle.packets()
            );
            self.broadcast(&Message::DespawnProxy(id), transport);
            let _ = self.event_tx.send(ProxyEvent::Released(id));
        }
    }

    /// Send `envelope` to every live connection except the one whose id
    /// equals its origin
    ///
    /// A failed send is logged and skipped; the remaining recipients are
    /// still served.
    pub fn relay<T: Transport + ?Sized>(&mut self, envelope: &PacketEnvelope, transport: &mut T) -> RelayReport {
        let origin = i32::from(envelope.origin_id);
        let message = Message::Packet(envelope.clone());
        let mut report = RelayReport::default();

        for connection in transport.connections() {
            if connection.get() == origin {
                continue;
            }
            match transport.send(connection, &message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Relay of packet from {} to {} failed: {}", origin, connection, e);
                    report.failed += 1;
                }
            }
        }

        self.stats.packets_relayed += 1;
        self.stats.deliveries += report.delivered as u64;
        self.stats.send_failures += report.failed as u64;
        report
    }

    /// Tear down every proxy, announcing each despawn
    pub fn shutdown<T: Transport + ?Sized>(&mut self, transport: &mut T) {
        for id in self.registry.clear() {
            self.broadcast(&Message::DespawnProxy(id), transport);
            let _ = self.event_tx.send(ProxyEvent::Released(id));
        }
    }

    fn on_packet<T: Transport + ?Sized>(
        &mut self,
        connection: ConnectionId,
        envelope: PacketEnvelope,
        transport: &mut T,
    ) {
        let Some(expected) = self.registry.proxy_id(connection) else {
            tracing::debug!("Dropping packet from connection {} with no proxy", connection);
            self.stats.packets_dropped += 1;
            return;
        };

        if envelope.origin() != expected {
            let err = ProxyError::OriginMismatch {
                connection,
                origin: envelope.origin_id,
            };
            tracing::warn!("Dropping packet: {}", err);
            self.stats.packets_dropped += 1;
            return;
        }

        if let Some(handle) = self.registry.get_mut(connection) {
            handle.record_packet();
        }
        self.relay(&envelope, transport);
    }

    fn send<T: Transport + ?Sized>(&mut self, to: ConnectionId, message: &Message, transport: &mut T) {
        if let Err(e) = transport.send(to, message) {
            tracing::warn!("Failed to send {:?} to {}: {}", message.message_type(), to, e);
            self.stats.send_failures += 1;
        }
    }

    fn broadcast<T: Transport + ?Sized>(&mut self, message: &Message, transport: &mut T) -> RelayReport {
        let mut report = RelayReport::default();
        for connection in transport.connections() {
            match transport.send(connection, message) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!("Failed to send {:?} to {}: {}", message.message_type(), connection, e);
                    report.failed += 1;
                }
            }
        }
        self.stats.send_failures += report.failed as u64;
        report
    }
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::testing::RecordingTransport;
    use bytes::Bytes;
    use proptest::prelude::*;

    fn conn(id: i32) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn pid(id: i16) -> ProxyId {
        ProxyId::from_origin(id)
    }

    fn packet(origin: i16) -> PacketEnvelope {
        PacketEnvelope::from_capture(pid(origin), Bytes::from_static(b"voice")).unwrap()
    }

    fn join(session: &mut ServerSession, transport: &mut RecordingTransport, id: i32) {
        transport.connect(conn(id));
        session.handle_event(TransportEvent::Connected(conn(id)), transport);
        session.handle_event(TransportEvent::Message(conn(id), Message::RequestProxy), transport);
    }

    #[test]
    fn test_request_assigns_connection_id_and_broadcasts_spawn() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();

        join(&mut session, &mut transport, 5);

        assert_eq!(session.registry().ids(), vec![pid(5)]);
        assert_eq!(
            transport.sent_to(conn(5)),
            vec![Message::ProxyAssigned(pid(5)), Message::SpawnProxy(pid(5))]
        );
    }

    #[test]
    fn test_mismatched_origin_is_not_relayed() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 5);
        join(&mut session, &mut transport, 7);
        transport.clear();

        session.handle_event(TransportEvent::Message(conn(7), Message::Packet(packet(5))), &mut transport);

        assert!(transport.packet_recipients().is_empty());
        assert_eq!(session.stats().packets_dropped, 1);
    }

    #[test]
    fn test_relay_excludes_origin() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 5);
        join(&mut session, &mut transport, 9);
        transport.clear();

        session.handle_event(TransportEvent::Message(conn(5), Message::Packet(packet(5))), &mut transport);

        assert_eq!(transport.packet_recipients(), vec![conn(9)]);
        assert_eq!(session.registry().get(conn(5)).unwrap().packets(), 1);
    }

    #[test]
    fn test_host_packet_reaches_every_remote() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::with(&[3, 4]);
        session.request_proxy(ConnectionId::HOST, &mut transport).unwrap();
        transport.clear();

        let report = session.relay(&packet(-1), &mut transport);

        assert_eq!(report, RelayReport { delivered: 2, failed: 0 });
        assert_eq!(transport.packet_recipients(), vec![conn(3), conn(4)]);
    }

    #[test]
    fn test_host_never_hears_itself() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::with(&[-1, 3]);
        session.request_proxy(ConnectionId::HOST, &mut transport).unwrap();
        transport.clear();

        session.handle_event(
            TransportEvent::Message(ConnectionId::HOST, Message::Packet(packet(-1))),
            &mut transport,
        );

        assert_eq!(transport.packet_recipients(), vec![conn(3)]);
    }

    #[test]
    fn test_host_request_skips_assigned_message() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::with(&[-1, 2]);

        let id = session.request_proxy(ConnectionId::HOST, &mut transport).unwrap();

        assert_eq!(id, ProxyId::HOST);
        assert!(!transport
            .sent
            .iter()
            .any(|(_, m)| matches!(m, Message::ProxyAssigned(_))));
        assert_eq!(transport.sent_to(conn(2)), vec![Message::SpawnProxy(ProxyId::HOST)]);
    }

    #[test]
    fn test_disconnect_releases_and_stale_packets_go_nowhere() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 5);
        join(&mut session, &mut transport, 9);
        transport.clear();

        transport.disconnect(conn(5));
        session.handle_event(TransportEvent::Disconnected(conn(5)), &mut transport);

        assert!(!session.registry().contains(conn(5)));
        assert_eq!(transport.sent_to(conn(9)), vec![Message::DespawnProxy(pid(5))]);
        assert!(transport.sent_to(conn(5)).is_empty());

        transport.clear();
        session.handle_event(TransportEvent::Message(conn(5), Message::Packet(packet(5))), &mut transport);
        assert!(transport.packet_recipients().is_empty());
    }

    #[test]
    fn test_released_connection_receives_no_later_relay() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 5);
        join(&mut session, &mut transport, 7);
        join(&mut session, &mut transport, 9);

        transport.disconnect(conn(5));
        session.handle_event(TransportEvent::Disconnected(conn(5)), &mut transport);
        transport.clear();

        session.handle_event(TransportEvent::Message(conn(9), Message::Packet(packet(9))), &mut transport);

        let recipients = transport.packet_recipients();
        assert_eq!(recipients, vec![conn(7)]);
        assert!(!recipients.contains(&conn(5)));
        assert!(transport.sent_to(conn(5)).is_empty());
        assert_eq!(session.stats().packets_relayed, 1);
    }

    #[test]
    fn test_release_unregistered_is_noop() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 2);
        transport.clear();

        session.release_proxy(conn(42), &mut transport);

        assert_eq!(session.registry().ids(), vec![pid(2)]);
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn test_duplicate_request_reassigns_without_spawning() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 5);
        transport.clear();

        session.handle_event(TransportEvent::Message(conn(5), Message::RequestProxy), &mut transport);

        assert_eq!(session.registry().len(), 1);
        assert_eq!(transport.sent, vec![(conn(5), Message::ProxyAssigned(pid(5)))]);
    }

    #[test]
    fn test_late_joiner_learns_existing_proxies() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 1);
        join(&mut session, &mut transport, 2);
        transport.clear();

        join(&mut session, &mut transport, 3);

        assert_eq!(
            transport.sent_to(conn(3)),
            vec![
                Message::ProxyAssigned(pid(3)),
                Message::SpawnProxy(pid(1)),
                Message::SpawnProxy(pid(2)),
                Message::SpawnProxy(pid(3)),
            ]
        );
        assert_eq!(transport.sent_to(conn(1)), vec![Message::SpawnProxy(pid(3))]);
    }

    #[test]
    fn test_failed_send_does_not_abort_relay() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::with(&[1, 2, 3]);
        transport.failing.insert(conn(2));

        let report = session.relay(&packet(1), &mut transport);

        assert_eq!(report, RelayReport { delivered: 1, failed: 1 });
        assert_eq!(transport.packet_recipients(), vec![conn(3)]);
        assert_eq!(session.stats().send_failures, 1);
    }

    #[test]
    fn test_unexpected_client_messages_ignored() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::with(&[4]);

        session.handle_event(
            TransportEvent::Message(conn(4), Message::SpawnProxy(pid(9))),
            &mut transport,
        );

        assert!(session.registry().is_empty());
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn test_events_published() {
        let mut session = ServerSession::new();
        let mut events = session.subscribe();
        let mut transport = RecordingTransport::default();

        join(&mut session, &mut transport, 6);
        transport.disconnect(conn(6));
        session.handle_event(TransportEvent::Disconnected(conn(6)), &mut transport);

        assert_eq!(events.try_recv().unwrap(), ProxyEvent::Registered(pid(6)));
        assert_eq!(events.try_recv().unwrap(), ProxyEvent::Released(pid(6)));
    }

    #[test]
    fn test_shutdown_despawns_everything() {
        let mut session = ServerSession::new();
        let mut transport = RecordingTransport::default();
        join(&mut session, &mut transport, 1);
        join(&mut session, &mut transport, 2);
        transport.clear();

        session.shutdown(&mut transport);

        assert!(session.registry().is_empty());
        assert_eq!(
            transport.sent_to(conn(1)),
            vec![Message::DespawnProxy(pid(1)), Message::DespawnProxy(pid(2))]
        );
    }

    proptest! {
        #[test]
        fn relay_recipients_are_live_minus_origin(
            live in proptest::collection::btree_set(-1i32..32, 0..12),
            origin in -1i16..32,
        ) {
            let ids: Vec<i32> = live.iter().copied().collect();
            let mut session = ServerSession::new();
            let mut transport = RecordingTransport::with(&ids);

            session.relay(&packet(origin), &mut transport);

            let expected: Vec<ConnectionId> = ids
                .iter()
                .copied()
                .filter(|id| *id != i32::from(origin))
                .map(ConnectionId::new)
                .collect();
            prop_assert_eq!(transport.packet_recipients(), expected);
        }

        #[test]
        fn repeated_requests_register_once(id in 1i32..1000, repeats in 1usize..6) {
            let mut session = ServerSession::new();
            let mut transport = RecordingTransport::with(&[id]);

            for _ in 0..repeats {
                session.handle_event(TransportEvent::Message(conn(id), Message::RequestProxy), &mut transport);
            }

            prop_assert_eq!(session.registry().len(), 1);
            let spawns = transport
                .sent
                .iter()
                .filter(|(_, m)| matches!(m, Message::SpawnProxy(_)))
                .count();
            prop_assert_eq!(spawns, 1);
        }
    }
}
