//! Wire protocol for the voice relay
//!
//! ## Frame Format
//!
//! ```text
//! ┌──────────┬──────────────┬───────────────────────────────────────────┐
//! │ Magic(2) │  Length(4)   │              Message (Length)             │
//! │  0x5643  │   u32 LE     │                                           │
//! └──────────┴──────────────┴───────────────────────────────────────────┘
//!
//! Message:
//! ┌─────────┬─────────────────────────────────────────────────────────────┐
//! │ Type(1) │ Body                                                        │
//! ├─────────┼─────────────────────────────────────────────────────────────┤
//! │  0x01   │ RequestProxy   (empty)                                      │
//! │  0x02   │ ProxyAssigned  id: i32 LE                                   │
//! │  0x03   │ SpawnProxy     id: i32 LE                                   │
//! │  0x04   │ DespawnProxy   id: i32 LE                                   │
//! │  0x10   │ Packet         origin: i16 LE │ owner: i32 LE │ len: u16 LE │
//! │         │                payload (len bytes)                          │
//! └─────────┴─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Framing lives in [`crate::network::codec`]; this module only knows how
//! to turn a message body into bytes and back.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::fmt;

use crate::constants::{HOST_CONNECTION_ID, MAX_PAYLOAD_SIZE};
use crate::error::{ProtocolError, ProxyError};

/// Transport-level identifier of a participant's link to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(i32);

impl ConnectionId {
    /// The host's own, locally-originated participant
    pub const HOST: Self = Self(HOST_CONNECTION_ID);

    pub const fn new(id: i32) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i32 {
        self.0
    }

    /// True for the in-process host participant.
    ///
    /// This is the only place the host sentinel is compared against.
    pub const fn is_host(self) -> bool {
        self.0 == HOST_CONNECTION_ID
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_host() {
            write!(f, "host({})", self.0)
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// Identifier assigned to a proxy handle
///
/// Always fits the `int16` origin field of a packet envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(i16);

impl ProxyId {
    pub const HOST: Self = Self(HOST_CONNECTION_ID as i16);

    pub const fn from_origin(origin: i16) -> Self {
        Self(origin)
    }

    /// Value as carried in the envelope origin field
    pub const fn origin(self) -> i16 {
        self.0
    }

    pub const fn get(self) -> i32 {
        self.0 as i32
    }

    pub const fn is_host(self) -> bool {
        self.0 as i32 == HOST_CONNECTION_ID
    }

    /// Decode an identifier from a wide wire integer
    pub fn from_wire(value: i32) -> Result<Self, ProtocolError> {
        i16::try_from(value)
            .map(Self)
            .map_err(|_| ProtocolError::IdentifierOutOfRange(value))
    }
}

impl TryFrom<ConnectionId> for ProxyId {
    type Error = ProxyError;

    fn try_from(connection: ConnectionId) -> Result<Self, Self::Error> {
        i16::try_from(connection.get())
            .map(Self)
            .map_err(|_| ProxyError::IdentifierOutOfRange(connection))
    }
}

impl From<ProxyId> for ConnectionId {
    fn from(id: ProxyId) -> Self {
        ConnectionId::new(id.get())
    }
}

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Message type tags
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    RequestProxy = 0x01,
    ProxyAssigned = 0x02,
    SpawnProxy = 0x03,
    DespawnProxy = 0x04,
    Packet = 0x10,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(Self::RequestProxy),
            0x02 => Ok(Self::ProxyAssigned),
            0x03 => Ok(Self::SpawnProxy),
            0x04 => Ok(Self::DespawnProxy),
            0x10 => Ok(Self::Packet),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// One captured voice frame, opaque to the relay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoicePacket {
    owner_id: i32,
    data: Bytes,
}

impl VoicePacket {
    /// Create a voice packet, rejecting payloads over [`MAX_PAYLOAD_SIZE`]
    pub fn new(owner_id: i32, data: Bytes) -> Result<Self, ProtocolError> {
        if data.len() > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: data.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { owner_id, data })
    }

    pub fn owner_id(&self) -> i32 {
        self.owner_id
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A voice packet tagged with the proxy that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketEnvelope {
    /// Identifier of the producing handle
    pub origin_id: i16,

    pub payload: VoicePacket,
}

impl PacketEnvelope {
    pub fn new(origin: ProxyId, payload: VoicePacket) -> Self {
        Self {
            origin_id: origin.origin(),
            payload,
        }
    }

    /// Wrap raw captured bytes for `origin`, owner set to the same id
    pub fn from_capture(origin: ProxyId, data: Bytes) -> Result<Self, ProtocolError> {
        let payload = VoicePacket::new(origin.get(), data)?;
        Ok(Self::new(origin, payload))
    }

    pub fn origin(&self) -> ProxyId {
        ProxyId::from_origin(self.origin_id)
    }

    /// Encoded body size without the type tag
    fn body_len(&self) -> usize {
        2 + 4 + 2 + self.payload.len()
    }
}

/// Messages exchanged between participants and the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// client → server: ask for an identifier
    RequestProxy,
    /// server → requesting client: completes the handshake
    ProxyAssigned(ProxyId),
    /// server → all clients: materialize a handle
    SpawnProxy(ProxyId),
    /// server → all clients: destroy a handle
    DespawnProxy(ProxyId),
    /// one voice packet, client → server → other clients
    Packet(PacketEnvelope),
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RequestProxy => MessageType::RequestProxy,
            Message::ProxyAssigned(_) => MessageType::ProxyAssigned,
            Message::SpawnProxy(_) => MessageType::SpawnProxy,
            Message::DespawnProxy(_) => MessageType::DespawnProxy,
            Message::Packet(_) => MessageType::Packet,
        }
    }

    /// Encoded size of the message body
    pub fn encoded_len(&self) -> usize {
        match self {
            Message::RequestProxy => 1,
            Message::ProxyAssigned(_) | Message::SpawnProxy(_) | Message::DespawnProxy(_) => 1 + 4,
            Message::Packet(envelope) => 1 + envelope.body_len(),
        }
    }

    /// Append the encoded message to `buf`
    pub fn encode(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        buf.put_u8(self.message_type() as u8);

        match self {
            Message::RequestProxy => {}
            Message::ProxyAssigned(id) | Message::SpawnProxy(id) | Message::DespawnProxy(id) => {
                buf.put_i32_le(id.get());
            }
            Message::Packet(envelope) => {
                buf.put_i16_le(envelope.origin_id);
                buf.put_i32_le(envelope.payload.owner_id);
                // VoicePacket::new caps the payload well below u16::MAX
                buf.put_u16_le(envelope.payload.len() as u16);
                buf.put_slice(&envelope.payload.data);
            }
        }
    }

    /// Serialize to a standalone buffer
    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Deserialize a message body
    pub fn decode(mut data: Bytes) -> Result<Self, ProtocolError> {
        ensure_remaining(&data, 1)?;
        let message_type = MessageType::try_from(data.get_u8())?;

        let message = match message_type {
            MessageType::RequestProxy => Message::RequestProxy,
            MessageType::ProxyAssigned => Message::ProxyAssigned(decode_id(&mut data)?),
            MessageType::SpawnProxy => Message::SpawnProxy(decode_id(&mut data)?),
            MessageType::DespawnProxy => Message::DespawnProxy(decode_id(&mut data)?),
            MessageType::Packet => {
                ensure_remaining(&data, 8)?;
                let origin_id = data.get_i16_le();
                let owner_id = data.get_i32_le();
                let declared = data.get_u16_le() as usize;

                if declared > MAX_PAYLOAD_SIZE {
                    return Err(ProtocolError::PayloadTooLarge {
                        size: declared,
                        max: MAX_PAYLOAD_SIZE,
                    });
                }
                if data.remaining() != declared {
                    return Err(ProtocolError::LengthMismatch {
                        declared,
                        actual: data.remaining(),
                    });
                }

                let payload = VoicePacket::new(owner_id, data.split_to(declared))?;
                return Ok(Message::Packet(PacketEnvelope { origin_id, payload }));
            }
        };

        if data.has_remaining() {
            return Err(ProtocolError::LengthMismatch {
                declared: 0,
                actual: data.remaining(),
            });
        }

        Ok(message)
    }
}

fn ensure_remaining(data: &Bytes, needed: usize) -> Result<(), ProtocolError> {
    if data.remaining() < needed {
        return Err(ProtocolError::Truncated {
            needed,
            available: data.remaining(),
        });
    }
    Ok(())
}

fn decode_id(data: &mut Bytes) -> Result<ProxyId, ProtocolError> {
    ensure_remaining(data, 4)?;
    ProxyId::from_wire(data.get_i32_le())
}
