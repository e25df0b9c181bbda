//! Transport seams used by the sessions
//!
//! The sessions never touch sockets. The server session talks to a
//! [`Transport`] (send to a connection, list live connections) and the
//! client session to a [`ServerLink`]. The TCP runtime implements both
//! with channels into per-connection writer tasks; tests implement them
//! with plain vectors.
//!
//! Each writer task is fed by two queues. Voice packets go through a
//! bounded queue and are dropped when it is full. Handshake and
//! spawn/despawn messages go through an unbounded control queue that the
//! writer drains first, so a backlog of voice never costs a control
//! message.

use std::collections::BTreeMap;

use tokio::sync::mpsc;

use crate::constants::MAX_CONNECTION_ID;
use crate::error::NetworkError;
use crate::protocol::{ConnectionId, Message};

/// Inbound transport notification, processed one at a time
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Connected(ConnectionId),
    Message(ConnectionId, Message),
    Disconnected(ConnectionId),
}

/// Server side of the transport
pub trait Transport {
    /// Best-effort send to one connection
    fn send(&mut self, to: ConnectionId, message: &Message) -> Result<(), NetworkError>;

    /// Currently live connections
    fn connections(&self) -> Vec<ConnectionId>;
}

/// Client side of the transport
pub trait ServerLink {
    /// Best-effort send to the server
    fn send(&mut self, message: Message) -> Result<(), NetworkError>;
}

/// Sending half of a connection's outbound queues
#[derive(Clone)]
pub struct Outbound {
    control: mpsc::UnboundedSender<Message>,
    voice: mpsc::Sender<Message>,
}

/// Receiving half of a connection's outbound queues, owned by the writer task
pub struct OutboundQueues {
    pub control: mpsc::UnboundedReceiver<Message>,
    pub voice: mpsc::Receiver<Message>,
}

/// Create the outbound queues of one connection
pub fn outbound(voice_depth: usize) -> (Outbound, OutboundQueues) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (voice_tx, voice_rx) = mpsc::channel(voice_depth.max(1));
    (
        Outbound {
            control: control_tx,
            voice: voice_tx,
        },
        OutboundQueues {
            control: control_rx,
            voice: voice_rx,
        },
    )
}

impl Outbound {
    /// Queue without waiting. Only voice packets can be refused for room.
    pub fn try_send(&self, message: Message) -> Result<(), NetworkError> {
        match message {
            Message::Packet(_) => self.voice.try_send(message).map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    NetworkError::SendFailed("outbound queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    NetworkError::SendFailed("connection closed".to_string())
                }
            }),
            control => self
                .control
                .send(control)
                .map_err(|_| NetworkError::SendFailed("connection closed".to_string())),
        }
    }

    /// Queue, waiting for room in the voice queue
    pub async fn send(&self, message: Message) -> Result<(), NetworkError> {
        let result = match message {
            Message::Packet(_) => self.voice.send(message).await.is_ok(),
            control => self.control.send(control).is_ok(),
        };
        if result {
            Ok(())
        } else {
            Err(NetworkError::SendFailed("connection closed".to_string()))
        }
    }
}

impl ServerLink for Outbound {
    fn send(&mut self, message: Message) -> Result<(), NetworkError> {
        self.try_send(message)
    }
}

impl OutboundQueues {
    /// Next message for the wire, control first. `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<Message> {
        tokio::select! {
            biased;
            Some(message) = self.control.recv() => Some(message),
            Some(message) = self.voice.recv() => Some(message),
            else => None,
        }
    }
}

/// Live connections of the TCP runtime
///
/// Remote peers are reached through their writer task queues. When a host
/// participant runs in-process it is listed as [`ConnectionId::HOST`] and
/// reached through a loopback channel.
pub struct ConnectionTable {
    /// Writer queues keyed by connection
    peers: BTreeMap<ConnectionId, Outbound>,

    /// Host participant loopback
    loopback: Option<crossbeam_channel::Sender<Message>>,

    /// Next candidate id
    next_id: i32,

    /// Maximum simultaneous remote connections
    max_connections: usize,
}

impl ConnectionTable {
    pub fn new(max_connections: usize) -> Self {
        Self {
            peers: BTreeMap::new(),
            loopback: None,
            next_id: 1,
            max_connections,
        }
    }

    /// Pick an unused id in `1..=MAX_CONNECTION_ID`, wrapping around
    pub fn allocate_id(&mut self) -> Result<ConnectionId, NetworkError> {
        if self.peers.len() >= self.max_connections {
            return Err(NetworkError::ConnectionLimit);
        }

        for _ in 0..MAX_CONNECTION_ID {
            let candidate = ConnectionId::new(self.next_id);
            self.next_id = if self.next_id >= MAX_CONNECTION_ID {
                1
            } else {
                self.next_id + 1
            };

            if !self.peers.contains_key(&candidate) {
                return Ok(candidate);
            }
        }

        Err(NetworkError::ConnectionLimit)
    }

    /// Register the outbound queues of a remote connection
    pub fn insert(&mut self, id: ConnectionId, writer: Outbound) {
        self.peers.insert(id, writer);
    }

    /// Forget a remote connection. Returns false if it was unknown.
    pub fn remove(&mut self, id: ConnectionId) -> bool {
        self.peers.remove(&id).is_some()
    }

    /// Attach the in-process host participant
    pub fn attach_host(&mut self, loopback: crossbeam_channel::Sender<Message>) {
        self.loopback = Some(loopback);
    }

    /// Number of remote connections
    pub fn remote_count(&self) -> usize {
        self.peers.len()
    }
}

impl Transport for ConnectionTable {
    fn send(&mut self, to: ConnectionId, message: &Message) -> Result<(), NetworkError> {
        if to.is_host() {
            let loopback = self.loopback.as_ref().ok_or(NetworkError::UnknownConnection(to))?;
            return loopback
                .send(message.clone())
                .map_err(|_| NetworkError::SendFailed("host loopback closed".to_string()));
        }

        let writer = self.peers.get(&to).ok_or(NetworkError::UnknownConnection(to))?;
        writer
            .try_send(message.clone())
            .map_err(|e| NetworkError::SendFailed(format!("{}: {}", to, e)))
    }

    fn connections(&self) -> Vec<ConnectionId> {
        let mut connections = Vec::with_capacity(self.peers.len() + 1);
        if self.loopback.is_some() {
            connections.push(ConnectionId::HOST);
        }
        connections.extend(self.peers.keys().copied());
        connections
    }
}

/// Host participant's link to the in-process server
pub struct LoopbackLink {
    tx: crossbeam_channel::Sender<Message>,
}

impl ServerLink for LoopbackLink {
    fn send(&mut self, message: Message) -> Result<(), NetworkError> {
        self.tx
            .send(message)
            .map_err(|_| NetworkError::SendFailed("server loopback closed".to_string()))
    }
}

/// Create a host → server loopback
pub fn loopback() -> (LoopbackLink, crossbeam_channel::Receiver<Message>) {
    let (tx, rx) = crossbeam_channel::unbounded();
    (LoopbackLink { tx }, rx)
}
