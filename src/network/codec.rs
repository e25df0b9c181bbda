//! Length-prefixed framing for relay streams
//!
//! The decoder yields raw message bodies rather than decoded messages, so a
//! body that fails to parse can be dropped on its own while the stream stays
//! usable. Only framing errors (bad magic, oversize length) end the stream.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::{FRAME_HEADER_SIZE, FRAME_MAGIC, MAX_MESSAGE_SIZE};
use crate::error::{NetworkError, ProtocolError};
use crate::protocol::Message;

#[derive(Debug, Clone, Copy, Default)]
pub struct RelayCodec;

impl Decoder for RelayCodec {
    type Item = Bytes;
    type Error = NetworkError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }

        let magic = u16::from_le_bytes([src[0], src[1]]);
        if magic != FRAME_MAGIC {
            return Err(ProtocolError::InvalidMagic(magic).into());
        }

        let length = u32::from_le_bytes([src[2], src[3], src[4], src[5]]) as usize;
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        let frame_len = FRAME_HEADER_SIZE + length;
        if src.len() < frame_len {
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_SIZE);
        Ok(Some(src.split_to(length).freeze()))
    }
}

impl Encoder<Message> for RelayCodec {
    type Error = NetworkError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let length = item.encoded_len();
        if length > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: length,
                max: MAX_MESSAGE_SIZE,
            }
            .into());
        }

        dst.reserve(FRAME_HEADER_SIZE + length);
        dst.put_u16_le(FRAME_MAGIC);
        dst.put_u32_le(length as u32);
        item.encode(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PacketEnvelope, ProxyId};

    fn encoded(message: Message) -> BytesMut {
        let mut buf = BytesMut::new();
        RelayCodec.encode(message, &mut buf).unwrap();
        buf
    }

    #[test]
    fn test_frame_layout() {
        let buf = encoded(Message::SpawnProxy(ProxyId::from_origin(7)));
        assert_eq!(&buf[..], &[0x43, 0x56, 5, 0, 0, 0, 0x03, 7, 0, 0, 0]);
    }

    #[test]
    fn test_decode_waits_for_full_frame() {
        let envelope =
            PacketEnvelope::from_capture(ProxyId::from_origin(2), Bytes::from_static(b"partial")).unwrap();
        let full = encoded(Message::Packet(envelope.clone()));

        let mut buf = BytesMut::from(&full[..4]);
        assert!(RelayCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[4..full.len() - 1]);
        assert!(RelayCodec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&full[full.len() - 1..]);
        let body = RelayCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Message::decode(body).unwrap(), Message::Packet(envelope));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut buf = encoded(Message::RequestProxy);
        buf.extend_from_slice(&encoded(Message::DespawnProxy(ProxyId::HOST)));

        let first = RelayCodec.decode(&mut buf).unwrap().unwrap();
        let second = RelayCodec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(Message::decode(first).unwrap(), Message::RequestProxy);
        assert_eq!(Message::decode(second).unwrap(), Message::DespawnProxy(ProxyId::HOST));
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let mut buf = BytesMut::from(&[0xFF, 0xFF, 1, 0, 0, 0, 1][..]);
        assert!(matches!(
            RelayCodec.decode(&mut buf),
            Err(NetworkError::Protocol(ProtocolError::InvalidMagic(0xFFFF)))
        ));
    }

    #[test]
    fn test_oversize_length_is_fatal() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(FRAME_MAGIC);
        buf.put_u32_le((MAX_MESSAGE_SIZE + 1) as u32);
        assert!(matches!(
            RelayCodec.decode(&mut buf),
            Err(NetworkError::Protocol(ProtocolError::FrameTooLarge { .. }))
        ));
    }

    #[test]
    fn test_malformed_body_still_framed() {
        let mut buf = BytesMut::new();
        buf.put_u16_le(FRAME_MAGIC);
        buf.put_u32_le(1);
        buf.put_u8(0x7F);

        let body = RelayCodec.decode(&mut buf).unwrap().unwrap();
        assert!(Message::decode(body).is_err());
    }
}
