use async_trait::async_trait;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};

use super::codec::{decode_datagram, encode_datagram};
use crate::types::PeerEndpoint;
use crate::util::errors::{ChatError, Result};

/// Unreliable, connectionless frame exchange between peers.
#[async_trait]
pub trait Transport: Send + Sync {
    fn local_endpoint(&self) -> PeerEndpoint;

    /// Send one frame. No delivery guarantee.
    async fn send_to(&self, to: PeerEndpoint, frame: &str) -> Result<()>;

    /// Wait for the next frame and its source endpoint.
    async fn recv_from(&self) -> Result<(PeerEndpoint, String)>;
}

/// Datagram transport on a bound UDP socket
pub struct UdpTransport {
    socket: UdpSocket,
    endpoint: PeerEndpoint,
    max_frame_len: usize,
}

impl UdpTransport {
    pub async fn bind(endpoint: PeerEndpoint, max_frame_len: usize) -> Result<Self> {
        let socket = UdpSocket::bind(endpoint.addr()).await.map_err(|e| {
            ChatError::TransportUnavailable(format!("cannot bind {}: {}", endpoint, e))
        })?;
        let endpoint = PeerEndpoint::new(socket.local_addr()?);

        tracing::info!("Listening for peer datagrams on {}", endpoint);

        Ok(Self {
            socket,
            endpoint,
            max_frame_len,
        })
    }
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_endpoint(&self) -> PeerEndpoint {
        self.endpoint
    }

    async fn send_to(&self, to: PeerEndpoint, frame: &str) -> Result<()> {
        let bytes = encode_datagram(frame, self.max_frame_len)?;
        self.socket
            .send_to(&bytes, to.addr())
            .await
            .map_err(|e| ChatError::SendFailure(format!("to {}: {}", to, e)))?;
        Ok(())
    }

    async fn recv_from(&self) -> Result<(PeerEndpoint, String)> {
        // One spare byte so an oversize datagram is seen as oversize, not truncated
        let mut buf = vec![0u8; self.max_frame_len + 1];
        let (len, from) = self.socket.recv_from(&mut buf).await?;
        let text = decode_datagram(&buf[..len], self.max_frame_len)?;
        Ok((PeerEndpoint::new(from), text))
    }
}

type Mailbox = mpsc::UnboundedSender<(PeerEndpoint, String)>;

/// In-process datagram network. Frames to unknown endpoints are dropped,
/// like UDP to a closed port.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    mailboxes: Arc<StdMutex<HashMap<SocketAddr, Mailbox>>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, endpoint: PeerEndpoint, max_frame_len: usize) -> Result<MemoryTransport> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut mailboxes = self
            .mailboxes
            .lock()
            .map_err(|_| ChatError::Internal("memory network lock poisoned".to_string()))?;

        if mailboxes.contains_key(&endpoint.addr()) {
            return Err(ChatError::TransportUnavailable(format!(
                "{} is already bound",
                endpoint
            )));
        }
        mailboxes.insert(endpoint.addr(), tx);

        Ok(MemoryTransport {
            network: self.clone(),
            endpoint,
            max_frame_len,
            inbox: Mutex::new(rx),
        })
    }

    fn deliver(&self, from: PeerEndpoint, to: PeerEndpoint, frame: String) -> Result<()> {
        let mailboxes = self
            .mailboxes
            .lock()
            .map_err(|_| ChatError::Internal("memory network lock poisoned".to_string()))?;

        match mailboxes.get(&to.addr()) {
            Some(mailbox) => {
                if mailbox.send((from, frame)).is_err() {
                    tracing::debug!("Dropping datagram to closed endpoint {}", to);
                }
            }
            None => tracing::debug!("Dropping datagram to unbound endpoint {}", to),
        }
        Ok(())
    }

    fn unbind(&self, endpoint: PeerEndpoint) {
        if let Ok(mut mailboxes) = self.mailboxes.lock() {
            mailboxes.remove(&endpoint.addr());
        }
    }
}

pub struct MemoryTransport {
    network: MemoryNetwork,
    endpoint: PeerEndpoint,
    max_frame_len: usize,
    inbox: Mutex<mpsc::UnboundedReceiver<(PeerEndpoint, String)>>,
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_endpoint(&self) -> PeerEndpoint {
        self.endpoint
    }

    async fn send_to(&self, to: PeerEndpoint, frame: &str) -> Result<()> {
        encode_datagram(frame, self.max_frame_len)?;
        self.network.deliver(self.endpoint, to, frame.to_string())
    }

    async fn recv_from(&self) -> Result<(PeerEndpoint, String)> {
        let mut inbox = self.inbox.lock().await;
        inbox
            .recv()
            .await
            .ok_or_else(|| ChatError::TransportUnavailable("memory network closed".to_string()))
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.network.unbind(self.endpoint);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn endpoint(port: u16) -> PeerEndpoint {
        PeerEndpoint::new(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port))
    }

    #[tokio::test]
    async fn test_memory_network_delivers_with_source() {
        let network = MemoryNetwork::new();
        let a = network.bind(endpoint(9000), 64).unwrap();
        let b = network.bind(endpoint(9001), 64).unwrap();

        a.send_to(b.local_endpoint(), "hello").await.unwrap();
        let (from, frame) = b.recv_from().await.unwrap();
        assert_eq!(from, a.local_endpoint());
        assert_eq!(frame, "hello");

        // Unbound destinations are silently dropped
        a.send_to(endpoint(9005), "lost").await.unwrap();
        assert!(a.send_to(b.local_endpoint(), &"x".repeat(65)).await.is_err());
    }

    #[tokio::test]
    async fn test_memory_network_rejects_double_bind() {
        let network = MemoryNetwork::new();
        let _a = network.bind(endpoint(9000), 64).unwrap();
        assert!(network.bind(endpoint(9000), 64).is_err());
    }

    #[tokio::test]
    async fn test_udp_round_trip() {
        let a = UdpTransport::bind(endpoint(0), 64).await.unwrap();
        let b = UdpTransport::bind(endpoint(0), 64).await.unwrap();

        a.send_to(b.local_endpoint(), "/GO").await.unwrap();
        let (from, frame) = b.recv_from().await.unwrap();
        assert_eq!(from, a.local_endpoint());
        assert_eq!(frame, "/GO");
    }
}
