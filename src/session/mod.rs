//! Relay sessions
//!
//! A [`ServerSession`] owns the proxy registry and relays packets; a
//! [`ClientSession`] runs one participant's handshake and feeds remote
//! packets into local playback. Both are driven purely by transport events
//! and are constructed and torn down explicitly.

pub mod client;
pub mod dispatch;
pub mod handshake;
pub mod server;

pub use client::{ClientSession, ClientStats};
pub use dispatch::{DispatchOutcome, LocalDispatch, PlaybackSink, SinkFactory};
pub use handshake::HandshakeState;
pub use server::{RelayReport, ServerSession, ServerStats};

use crate::protocol::ProxyId;

/// Proxy lifecycle notifications
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxyEvent {
    /// Server registered a proxy
    Registered(ProxyId),
    /// Server released a proxy
    Released(ProxyId),
    /// Local participant received its identifier
    Assigned(ProxyId),
    /// Client activated a handle
    Spawned { id: ProxyId, is_local: bool },
    /// Client destroyed a handle
    Despawned(ProxyId),
}
