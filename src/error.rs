//! Error types for the voice relay
//!
//! Nothing in the relay core is fatal: most of these surface as warnings
//! in the logs and leave session state untouched.

use thiserror::Error;

use crate::protocol::{ConnectionId, ProxyId};

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Proxy(#[from] ProxyError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Transport and socket errors
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("failed to bind socket: {0}")]
    BindFailed(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("send failed: {0}")]
    SendFailed(String),

    #[error("connection {0} is not open")]
    UnknownConnection(ConnectionId),

    #[error("no free connection ids")]
    ConnectionLimit,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Proxy lifecycle and handshake errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProxyError {
    /// Release or lookup for a connection that never registered a proxy
    #[error("no proxy registered for connection {0}")]
    NotRegistered(ConnectionId),

    /// Identifier change attempted after the handle went active
    #[error("proxy {current} is already active, refusing to reassign to {attempted}")]
    LateAssignment { current: ProxyId, attempted: ProxyId },

    /// Identifier change attempted on a handle that already has one
    #[error("proxy identifier already set to {current}, refusing {attempted}")]
    AlreadyAssigned { current: ProxyId, attempted: ProxyId },

    /// Operation needs an assigned identifier
    #[error("proxy has no identifier yet")]
    Unassigned,

    #[error("proxy identifier {0} is already in use")]
    DuplicateIdentifier(ProxyId),

    #[error("connection {0} does not fit a proxy identifier")]
    IdentifierOutOfRange(ConnectionId),

    #[error("packet origin {origin} does not match sender {connection}")]
    OriginMismatch { connection: ConnectionId, origin: i16 },

    #[error("invalid handshake transition: {from} -> {to}")]
    InvalidTransition { from: &'static str, to: &'static str },
}

/// Wire decoding errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid frame magic: {0:#06x}")]
    InvalidMagic(u16),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("message truncated: need {needed} bytes, have {available}")]
    Truncated { needed: usize, available: usize },

    #[error("unknown message type: {0:#04x}")]
    UnknownMessageType(u8),

    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("declared payload length {declared} but {actual} bytes follow")]
    LengthMismatch { declared: usize, actual: usize },

    #[error("identifier {0} out of range")]
    IdentifierOutOfRange(i32),
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        let e = ProxyError::NotRegistered(ConnectionId::new(5));
        assert!(e.to_string().contains('5'));

        let e = ProtocolError::LengthMismatch { declared: 10, actual: 4 };
        assert!(e.to_string().contains("10"));
        assert!(e.to_string().contains('4'));
    }

    #[test]
    fn network_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe");
        let e: NetworkError = io.into();
        assert!(matches!(e, NetworkError::Io(_)));
    }

    #[test]
    fn crate_error_wraps_proxy_error() {
        let e: Error = ProxyError::Unassigned.into();
        assert!(matches!(e, Error::Proxy(ProxyError::Unassigned)));
    }
}
