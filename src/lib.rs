//! Voice relay
//!
//! Server-mediated voice chat plumbing. Every participant gets a proxy
//! handle whose identifier equals its server-side connection id; captured
//! voice packets go to the server tagged with that id and are relayed to
//! every other participant, where they are played through the handle that
//! matches the origin.
//!
//! ```text
//!  participant A                 server                  participant B
//!  ─────────────                 ──────                  ─────────────
//!  RequestProxy ───────────────► registry[A] = A
//!               ◄─────────────── ProxyAssigned(A)
//!               ◄─────────────── SpawnProxy(A) ────────► handle(A)
//!  capture ─► Packet{origin A} ► relay (skip A) ───────► playback via handle(A)
//!  disconnect ─────────────────► release ─ DespawnProxy(A) ─► drop handle(A)
//! ```
//!
//! The host may run its own participant inside the server process; that
//! participant uses the reserved connection id -1.

pub mod audio;
pub mod config;
pub mod constants;
pub mod error;
pub mod network;
pub mod protocol;
pub mod proxy;
pub mod session;

pub use config::AppConfig;
pub use error::{Error, NetworkError, ProtocolError, ProxyError, Result};
pub use protocol::{ConnectionId, Message, PacketEnvelope, ProxyId, VoicePacket};
pub use session::{ClientSession, ProxyEvent, ServerSession};
