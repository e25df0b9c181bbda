//! One framed relay stream
//!
//! A connection is split into a writer task fed by the outbound queues
//! (control before voice) and a reader task that decodes message bodies.
//! Bodies that fail to decode are dropped on their own; a framing or
//! socket error ends the reader, which closes the inbound queue. Dropping
//! every outbound sender shuts down the write half.

use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

use crate::config::NetworkConfig;
use crate::error::NetworkError;
use crate::network::codec::RelayCodec;
use crate::network::socket;
use crate::network::transport::{self, Outbound};
use crate::protocol::Message;

pub struct Connection {
    /// Outbound queues drained by the writer task
    tx: Outbound,

    /// Inbound queue filled by the reader task
    rx: mpsc::Receiver<Message>,
}

impl Connection {
    pub fn new(stream: TcpStream, queue_depth: usize) -> Self {
        let peer = stream.peer_addr().ok();
        let (mut net_writer, mut net_reader) = Framed::new(stream, RelayCodec).split();

        let (user_tx, mut network_rx) = transport::outbound(queue_depth);
        let (network_tx, user_rx) = mpsc::channel::<Message>(queue_depth.max(1));

        tokio::spawn(async move {
            while let Some(message) = network_rx.recv().await {
                if let Err(e) = net_writer.send(message).await {
                    tracing::debug!("Write to {:?} failed: {}", peer, e);
                    break;
                }
            }
            // Outbound queues dropped: half-close so the peer sees EOF
            let _ = net_writer.close().await;
        });

        tokio::spawn(async move {
            while let Some(frame) = net_reader.next().await {
                let body = match frame {
                    Ok(body) => body,
                    Err(e) => {
                        tracing::warn!("Closing stream from {:?}: {}", peer, e);
                        break;
                    }
                };

                match Message::decode(body) {
                    Ok(message) => {
                        if network_tx.send(message).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        tracing::debug!("Dropping malformed message from {:?}: {}", peer, e);
                    }
                }
            }
        });

        Self {
            tx: user_tx,
            rx: user_rx,
        }
    }

    /// Open a connection to the relay server
    pub async fn connect(addr: SocketAddr, config: &NetworkConfig) -> Result<Self, NetworkError> {
        let stream = socket::connect(addr, config).await?;
        Ok(Self::new(stream, config.outbound_queue))
    }

    /// Queue a message, waiting for room
    pub async fn send(&self, message: Message) -> Result<(), NetworkError> {
        self.tx.send(message).await
    }

    /// Next inbound message; `None` once the stream has ended
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }

    /// Split into the outbound queues and the inbound queue
    pub fn into_parts(self) -> (Outbound, mpsc::Receiver<Message>) {
        (self.tx, self.rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::socket::bind_listener;
    use crate::protocol::{PacketEnvelope, ProxyId};
    use bytes::Bytes;
    use tokio::io::AsyncWriteExt;

    async fn pair() -> (Connection, TcpStream) {
        let config = NetworkConfig::default();
        let listener = bind_listener("127.0.0.1:0".parse().unwrap(), &config).unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(Connection::connect(addr, &config), listener.accept());
        (client.unwrap(), accepted.unwrap().0)
    }

    #[tokio::test]
    async fn test_messages_cross_the_stream() {
        let (client, server_stream) = pair().await;
        let mut server = Connection::new(server_stream, 8);

        client.send(Message::RequestProxy).await.unwrap();
        client.send(Message::SpawnProxy(ProxyId::from_origin(4))).await.unwrap();

        assert_eq!(server.recv().await, Some(Message::RequestProxy));
        assert_eq!(server.recv().await, Some(Message::SpawnProxy(ProxyId::from_origin(4))));
    }

    #[tokio::test]
    async fn test_control_overtakes_queued_voice() {
        let (client, server_stream) = pair().await;
        let mut server = Connection::new(server_stream, 8);
        let (outbound, _inbound) = client.into_parts();

        // Queued without yielding, so the writer sees all of them at once
        let voice = Message::Packet(
            PacketEnvelope::from_capture(ProxyId::from_origin(2), Bytes::from_static(b"pcm")).unwrap(),
        );
        outbound.try_send(voice.clone()).unwrap();
        outbound.try_send(voice.clone()).unwrap();
        outbound.try_send(Message::DespawnProxy(ProxyId::from_origin(5))).unwrap();

        assert_eq!(server.recv().await, Some(Message::DespawnProxy(ProxyId::from_origin(5))));
        assert_eq!(server.recv().await, Some(voice.clone()));
        assert_eq!(server.recv().await, Some(voice));
    }

    #[tokio::test]
    async fn test_malformed_body_skipped() {
        let (mut client, mut raw) = pair().await;

        // Unknown type, then a valid ProxyAssigned(3)
        raw.write_all(&[0x43, 0x56, 1, 0, 0, 0, 0x7F]).await.unwrap();
        raw.write_all(&[0x43, 0x56, 5, 0, 0, 0, 0x02, 3, 0, 0, 0]).await.unwrap();

        assert_eq!(client.recv().await, Some(Message::ProxyAssigned(ProxyId::from_origin(3))));
    }

    #[tokio::test]
    async fn test_bad_magic_closes_stream() {
        let (mut client, mut raw) = pair().await;
        raw.write_all(&[0xDE, 0xAD, 0, 0, 0, 0]).await.unwrap();

        assert_eq!(client.recv().await, None);
    }
}
