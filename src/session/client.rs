//! Client-side session for one participant
//!
//! Runs the local handshake, mirrors the server's spawn/despawn broadcasts
//! as local handles, and routes relayed packets into playback sinks.

use std::collections::HashMap;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::broadcast;

use crate::config::SessionConfig;
use crate::constants::PROXY_EVENT_CAPACITY;
use crate::error::ProxyError;
use crate::network::transport::ServerLink;
use crate::protocol::{Message, PacketEnvelope, ProxyId};
use crate::proxy::{HandleState, ProxyHandle};
use crate::session::dispatch::{DispatchOutcome, LocalDispatch, SinkFactory};
use crate::session::handshake::HandshakeState;
use crate::session::ProxyEvent;

/// Client counters
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientStats {
    pub handles: usize,
    pub packets_sent: u64,
    pub packets_played: u64,
    pub packets_dropped: u64,
    pub frames_skipped: u64,
    pub send_failures: u64,
}

/// One participant's view of the relay
pub struct ClientSession {
    /// Local handshake
    handshake: HandshakeState,

    /// Handles announced by the server, keyed by identifier
    handles: HashMap<ProxyId, ProxyHandle>,

    /// Playback subscriptions for remote handles
    dispatch: LocalDispatch,

    /// Creates a sink per remote handle
    sinks: Box<dyn SinkFactory>,

    /// Time to wait for ProxyAssigned before asking again
    request_timeout: Duration,

    stats: ClientStats,

    event_tx: broadcast::Sender<ProxyEvent>,
}

impl ClientSession {
    pub fn new(sinks: Box<dyn SinkFactory>, config: &SessionConfig) -> Self {
        let (event_tx, _) = broadcast::channel(PROXY_EVENT_CAPACITY);
        Self {
            handshake: HandshakeState::default(),
            handles: HashMap::new(),
            dispatch: LocalDispatch::new(),
            sinks,
            request_timeout: config.request_timeout(),
            stats: ClientStats::default(),
            event_tx,
        }
    }

    /// Subscribe to proxy lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.event_tx.subscribe()
    }

    pub fn handshake(&self) -> &HandshakeState {
        &self.handshake
    }

    /// Identifier assigned to this participant, once known
    pub fn local_id(&self) -> Option<ProxyId> {
        self.handshake.local_id()
    }

    pub fn is_active(&self) -> bool {
        self.handshake.is_active()
    }

    pub fn handle(&self, id: ProxyId) -> Option<&ProxyHandle> {
        self.handles.get(&id)
    }

    /// Known handle identifiers, sorted
    pub fn handle_ids(&self) -> Vec<ProxyId> {
        let mut ids: Vec<ProxyId> = self.handles.keys().copied().collect();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> ClientStats {
        ClientStats {
            handles: self.handles.len(),
            ..self.stats
        }
    }

    /// Send the initial RequestProxy
    pub fn start<L: ServerLink + ?Sized>(&mut self, link: &mut L) -> crate::Result<()> {
        self.handshake.request()?;
        tracing::debug!("Requesting proxy");
        link.send(Message::RequestProxy)?;
        Ok(())
    }

    /// Take the identifier assigned by the server
    ///
    /// Called for ProxyAssigned, and directly by the host runtime. A repeat
    /// of the identifier already held is accepted silently.
    pub fn assign_local(&mut self, id: ProxyId) -> Result<(), ProxyError> {
        if self.handshake.local_id() == Some(id) {
            return Ok(());
        }

        self.handshake.assign(id)?;
        tracing::info!("Assigned proxy {}", id);
        let _ = self.event_tx.send(ProxyEvent::Assigned(id));

        // Handles spawned before we knew our own id
        let mut pending: Vec<ProxyId> = self
            .handles
            .iter()
            .filter(|(_, handle)| handle.state() == HandleState::Assigned)
            .map(|(id, _)| *id)
            .collect();
        pending.sort();
        for pending_id in pending {
            self.activate_handle(pending_id);
        }

        Ok(())
    }

    /// Process one message from the server
    pub fn handle_message<L: ServerLink + ?Sized>(&mut self, message: Message, link: &mut L) {
        match message {
            Message::ProxyAssigned(id) => {
                if let Err(e) = self.assign_local(id) {
                    tracing::warn!("Ignoring assignment of proxy {}: {}", id, e);
                }
            }
            Message::SpawnProxy(id) => self.spawn_handle(id),
            Message::DespawnProxy(id) => self.despawn_handle(id),
            Message::Packet(envelope) => self.dispatch_packet(&envelope),
            Message::RequestProxy => {
                tracing::warn!("Ignoring RequestProxy sent to a client");
            }
        }

        self.poll_timeouts(link);
    }

    /// Wrap a captured frame and send it, if the handshake is active
    ///
    /// Returns true if the frame went out.
    pub fn on_captured<L: ServerLink + ?Sized>(&mut self, data: Bytes, link: &mut L) -> bool {
        let id = match self.handshake {
            HandshakeState::Active { id, .. } => id,
            _ => {
                tracing::trace!("Dropping captured frame, handshake is {}", self.handshake);
                self.stats.frames_skipped += 1;
                return false;
            }
        };

        let envelope = match PacketEnvelope::from_capture(id, data) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!("Dropping captured frame: {}", e);
                self.stats.frames_skipped += 1;
                return false;
            }
        };

        match link.send(Message::Packet(envelope)) {
            Ok(()) => {
                self.stats.packets_sent += 1;
                if let Some(handle) = self.handles.get_mut(&id) {
                    handle.record_packet();
                }
                true
            }
            Err(e) => {
                tracing::debug!("Failed to send captured frame: {}", e);
                self.stats.send_failures += 1;
                false
            }
        }
    }

    /// Re-send RequestProxy if the assignment is overdue
    pub fn poll_timeouts<L: ServerLink + ?Sized>(&mut self, link: &mut L) {
        if self.handshake.request_expired(self.request_timeout) {
            self.retry_request(link);
        }
    }

    /// Destroy every handle and drop all subscriptions
    pub fn shutdown(&mut self) {
        let mut ids = self.handle_ids();
        ids.reverse();
        for id in ids {
            if let Some(mut handle) = self.handles.remove(&id) {
                handle.destroy();
                let _ = self.event_tx.send(ProxyEvent::Despawned(id));
            }
        }
        self.dispatch.clear();
        self.handshake.destroy();
        tracing::debug!("Client session shut down");
    }

    fn retry_request<L: ServerLink + ?Sized>(&mut self, link: &mut L) {
        let attempts = self.handshake.attempts();
        if self.handshake.request().is_err() {
            return;
        }
        tracing::warn!(
            "No proxy assignment after {} request(s), asking again",
            attempts
        );
        if let Err(e) = link.send(Message::RequestProxy) {
            tracing::warn!("Failed to re-send proxy request: {}", e);
            self.stats.send_failures += 1;
        }
    }

    fn spawn_handle(&mut self, id: ProxyId) {
        if self.handshake.is_destroyed() {
            tracing::debug!("Ignoring spawn of proxy {} after shutdown", id);
            return;
        }
        if self.handles.contains_key(&id) {
            tracing::debug!("Proxy {} already spawned", id);
            return;
        }

        self.handles.insert(id, ProxyHandle::with_id(id));

        if self.handshake.local_id().is_some() {
            self.activate_handle(id);
        } else {
            tracing::debug!("Proxy {} pending until our own identifier arrives", id);
        }
    }

    fn activate_handle(&mut self, id: ProxyId) {
        let local = self.handshake.local_id();
        let Some(handle) = self.handles.get_mut(&id) else {
            return;
        };
        if let Err(e) = handle.activate(local) {
            tracing::warn!("Cannot activate proxy {}: {}", id, e);
            return;
        }
        let is_local = handle.is_local();

        if is_local {
            if self.handshake.spawned().and_then(|_| self.handshake.activate()).is_ok() {
                tracing::info!("Local proxy {} active", id);
            }
        } else {
            let sink = self.sinks.create(id);
            self.dispatch.subscribe(id, sink);
            tracing::debug!("Remote proxy {} active", id);
        }

        let _ = self.event_tx.send(ProxyEvent::Spawned { id, is_local });
    }

    fn despawn_handle(&mut self, id: ProxyId) {
        let Some(mut handle) = self.handles.remove(&id) else {
            tracing::warn!("Despawn for unknown proxy {}", id);
            return;
        };

        let active_for = handle.active_for();
        handle.destroy();
        self.dispatch.unsubscribe(id);

        if self.handshake.local_id() == Some(id) {
            tracing::info!("Local proxy {} destroyed by server", id);
            self.handshake.destroy();
        } else {
            tracing::debug!(
                "Proxy {} despawned after {} packets, active for {:?}",
                id,
                handle.packets(),
                active_for
            );
        }

        let _ = self.event_tx.send(ProxyEvent::Despawned(id));
    }

    fn dispatch_packet(&mut self, envelope: &PacketEnvelope) {
        match self.dispatch.dispatch(envelope, self.handshake.local_id()) {
            DispatchOutcome::Delivered => {
                self.stats.packets_played += 1;
                if let Some(handle) = self.handles.get_mut(&envelope.origin()) {
                    handle.record_packet();
                }
            }
            DispatchOutcome::NoSubscriber => {
                tracing::trace!("Dropping packet from unknown origin {}", envelope.origin_id);
                self.stats.packets_dropped += 1;
            }
            DispatchOutcome::OwnPacket => {
                tracing::trace!("Dropping echo of our own packet");
                self.stats.packets_dropped += 1;
            }
        }
    }
}
