//! Channel-backed playback sinks
//!
//! Each remote proxy gets a [`ChannelSink`] that forwards payloads into one
//! shared crossbeam channel without blocking the session. A consumer on the
//! other end (a real audio backend, or the binaries' stats printer) drains
//! it as [`ReceivedPacket`]s.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::protocol::{ProxyId, VoicePacket};
use crate::session::{PlaybackSink, SinkFactory};

/// A payload handed to playback
#[derive(Debug, Clone)]
pub struct ReceivedPacket {
    pub proxy: ProxyId,
    pub owner_id: i32,
    pub payload: Bytes,
    pub receive_time: Instant,
}

/// Sink for one remote proxy
pub struct ChannelSink {
    proxy: ProxyId,
    tx: Sender<ReceivedPacket>,
    dropped: Arc<AtomicU64>,
}

impl PlaybackSink for ChannelSink {
    fn deliver(&mut self, packet: &VoicePacket) {
        let received = ReceivedPacket {
            proxy: self.proxy,
            owner_id: packet.owner_id(),
            payload: packet.data().clone(),
            receive_time: Instant::now(),
        };

        match self.tx.try_send(received) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Playback queue full, dropping frame from {}", self.proxy);
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Hands out [`ChannelSink`]s that all feed one channel
pub struct ChannelSinkFactory {
    tx: Sender<ReceivedPacket>,
    dropped: Arc<AtomicU64>,
}

impl ChannelSinkFactory {
    /// Create the factory and the consumer end of its channel
    pub fn new(capacity: usize) -> (Self, Receiver<ReceivedPacket>) {
        let (tx, rx) = bounded(capacity.max(1));
        let factory = Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        };
        (factory, rx)
    }

    /// Frames dropped by any sink of this factory
    pub fn dropped_counter(&self) -> Arc<AtomicU64> {
        self.dropped.clone()
    }
}

impl SinkFactory for ChannelSinkFactory {
    fn create(&mut self, proxy: ProxyId) -> Box<dyn PlaybackSink> {
        Box::new(ChannelSink {
            proxy,
            tx: self.tx.clone(),
            dropped: self.dropped.clone(),
        })
    }
}

/// Per-proxy playback counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyPlayback {
    pub packets: u64,
    pub bytes: u64,
}

/// Aggregates [`ReceivedPacket`]s for reporting
#[derive(Debug, Default)]
pub struct PlaybackStats {
    per_proxy: Mutex<BTreeMap<ProxyId, ProxyPlayback>>,
}

impl PlaybackStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, packet: &ReceivedPacket) {
        let mut per_proxy = self.per_proxy.lock();
        let entry = per_proxy.entry(packet.proxy).or_default();
        entry.packets += 1;
        entry.bytes += packet.payload.len() as u64;
    }

    /// Drain everything currently queued on `rx`
    pub fn drain(&self, rx: &Receiver<ReceivedPacket>) -> usize {
        let mut count = 0;
        while let Ok(packet) = rx.try_recv() {
            self.record(&packet);
            count += 1;
        }
        count
    }

    pub fn get(&self, proxy: ProxyId) -> Option<ProxyPlayback> {
        self.per_proxy.lock().get(&proxy).copied()
    }

    pub fn snapshot(&self) -> Vec<(ProxyId, ProxyPlayback)> {
        self.per_proxy
            .lock()
            .iter()
            .map(|(id, stats)| (*id, *stats))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_forwards_with_proxy_id() {
        let (mut factory, rx) = ChannelSinkFactory::new(4);
        let mut sink = factory.create(ProxyId::from_origin(3));

        sink.deliver(&VoicePacket::new(3, Bytes::from_static(b"abc")).unwrap());

        let received = rx.try_recv().unwrap();
        assert_eq!(received.proxy, ProxyId::from_origin(3));
        assert_eq!(received.owner_id, 3);
        assert_eq!(received.payload.as_ref(), b"abc");
    }

    #[test]
    fn test_full_queue_drops_without_blocking() {
        let (mut factory, rx) = ChannelSinkFactory::new(1);
        let dropped = factory.dropped_counter();
        let mut sink = factory.create(ProxyId::HOST);
        let packet = VoicePacket::new(-1, Bytes::from_static(b"x")).unwrap();

        sink.deliver(&packet);
        sink.deliver(&packet);

        assert_eq!(rx.len(), 1);
        assert_eq!(dropped.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_stats_aggregate_per_proxy() {
        let (mut factory, rx) = ChannelSinkFactory::new(16);
        let mut a = factory.create(ProxyId::from_origin(1));
        let mut b = factory.create(ProxyId::from_origin(2));

        a.deliver(&VoicePacket::new(1, Bytes::from_static(b"aa")).unwrap());
        a.deliver(&VoicePacket::new(1, Bytes::from_static(b"aaa")).unwrap());
        b.deliver(&VoicePacket::new(2, Bytes::from_static(b"b")).unwrap());

        let stats = PlaybackStats::new();
        assert_eq!(stats.drain(&rx), 3);
        assert_eq!(
            stats.get(ProxyId::from_origin(1)),
            Some(ProxyPlayback { packets: 2, bytes: 5 })
        );
        assert_eq!(stats.snapshot().len(), 2);
    }
}
