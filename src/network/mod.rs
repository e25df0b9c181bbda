//! Network subsystem
//!
//! Contains:
//! - Stream framing and per-connection reader/writer tasks
//! - The transport seams the sessions are written against
//! - TCP server and client runtimes

pub mod client;
pub mod codec;
pub mod connection;
pub mod server;
pub mod socket;
pub mod transport;

pub use client::RelayClient;
pub use codec::RelayCodec;
pub use connection::Connection;
pub use server::{HostParticipant, RelayServer, ServerSummary};
pub use transport::{ConnectionTable, Outbound, ServerLink, Transport, TransportEvent};
