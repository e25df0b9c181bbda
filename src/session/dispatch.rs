//! Local dispatch of relayed packets to playback sinks

use std::collections::HashMap;

use crate::protocol::{PacketEnvelope, ProxyId, VoicePacket};

/// Receives voice payloads for one remote handle
pub trait PlaybackSink: Send {
    fn deliver(&mut self, packet: &VoicePacket);
}

/// Creates a playback sink when a remote handle becomes active
pub trait SinkFactory: Send {
    fn create(&mut self, proxy: ProxyId) -> Box<dyn PlaybackSink>;
}

impl<F> SinkFactory for F
where
    F: FnMut(ProxyId) -> Box<dyn PlaybackSink> + Send,
{
    fn create(&mut self, proxy: ProxyId) -> Box<dyn PlaybackSink> {
        self(proxy)
    }
}

/// What happened to a dispatched packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered,
    /// Origin has no active handle here
    NoSubscriber,
    /// Packet carries our own identifier
    OwnPacket,
}

/// Per-handle subscriptions, scoped to one client session
#[derive(Default)]
pub struct LocalDispatch {
    subscriptions: HashMap<ProxyId, Box<dyn PlaybackSink>>,
}

impl LocalDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route packets with origin `proxy` to `sink`, replacing any previous sink
    pub fn subscribe(&mut self, proxy: ProxyId, sink: Box<dyn PlaybackSink>) {
        self.subscriptions.insert(proxy, sink);
    }

    pub fn unsubscribe(&mut self, proxy: ProxyId) -> bool {
        self.subscriptions.remove(&proxy).is_some()
    }

    pub fn len(&self) -> usize {
        self.subscriptions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    pub fn clear(&mut self) {
        self.subscriptions.clear();
    }

    /// Hand `envelope` to the sink subscribed to its origin
    ///
    /// Only a handle whose identifier equals the origin receives the
    /// payload, and the local participant never plays its own packets.
    pub fn dispatch(&mut self, envelope: &PacketEnvelope, local: Option<ProxyId>) -> DispatchOutcome {
        let origin = envelope.origin();
        if local == Some(origin) {
            return DispatchOutcome::OwnPacket;
        }

        match self.subscriptions.get_mut(&origin) {
            Some(sink) => {
                sink.deliver(&envelope.payload);
                DispatchOutcome::Delivered
            }
            None => DispatchOutcome::NoSubscriber,
        }
    }
}
