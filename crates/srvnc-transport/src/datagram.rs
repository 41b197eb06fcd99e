//! Unreliable, unordered datagram transport for frame chunks.
//!
//! There are deliberately no retries and no acknowledgements here.  A send
//! either hands the datagram to the OS or reports why it could not; anything
//! lost after that is the reassembly engine's problem.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tracing::{debug, info};

use srvnc_core::protocol::datagram::MAX_UDP_PAYLOAD;

/// Errors reported by a [`DatagramTransport`].
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to bind datagram socket on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// Refused before touching the socket.
    #[error("datagram of {size} bytes exceeds the {max}-byte limit")]
    Oversized { size: usize, max: usize },

    #[error("send to {endpoint} failed: {source}")]
    Send {
        endpoint: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("datagram receive failed: {0}")]
    Recv(#[source] io::Error),
}

/// Best-effort datagram socket.
///
/// The trait exists so the stream coordinator can be exercised against a
/// recording transport in tests.
#[async_trait]
pub trait DatagramTransport: Send + Sync {
    /// Sends one datagram.  No retries.
    async fn send_to(&self, endpoint: SocketAddr, datagram: &[u8]) -> Result<(), TransportError>;

    /// Waits for the next datagram.
    async fn recv_from(&self) -> Result<(SocketAddr, Bytes), TransportError>;

    /// Returns `Ok(None)` immediately when nothing is queued.
    fn try_recv_from(&self) -> Result<Option<(SocketAddr, Bytes)>, TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}

/// [`DatagramTransport`] over a tokio UDP socket.
pub struct UdpTransport {
    socket: UdpSocket,
    max_datagram_size: usize,
    datagrams_sent: AtomicU64,
    bytes_sent: AtomicU64,
    /// Scratch space for receives; datagrams are copied out at their exact length.
    scratch: Mutex<BytesMut>,
}

impl UdpTransport {
    /// Binds a UDP socket.
    ///
    /// `max_datagram_size` caps outgoing datagrams and sizes the receive
    /// buffer.  It is clamped to the largest UDP payload.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Bind`] if the address is unavailable.
    pub async fn bind(addr: SocketAddr, max_datagram_size: usize) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| TransportError::Bind { addr, source })?;
        let transport = Self::from_socket(socket, max_datagram_size);
        if let Ok(local) = transport.local_addr() {
            info!("datagram transport bound on {local}");
        }
        Ok(transport)
    }

    pub fn from_socket(socket: UdpSocket, max_datagram_size: usize) -> Self {
        let max_datagram_size = max_datagram_size.clamp(1, MAX_UDP_PAYLOAD);
        Self {
            socket,
            max_datagram_size,
            datagrams_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            scratch: Mutex::new(BytesMut::zeroed(max_datagram_size)),
        }
    }

    pub fn max_datagram_size(&self) -> usize {
        self.max_datagram_size
    }

    /// Number of datagrams handed to the OS so far.
    pub fn datagrams_sent(&self) -> u64 {
        self.datagrams_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl DatagramTransport for UdpTransport {
    async fn send_to(&self, endpoint: SocketAddr, datagram: &[u8]) -> Result<(), TransportError> {
        if datagram.len() > self.max_datagram_size {
            return Err(TransportError::Oversized {
                size: datagram.len(),
                max: self.max_datagram_size,
            });
        }
        let sent = self
            .socket
            .send_to(datagram, endpoint)
            .await
            .map_err(|source| TransportError::Send { endpoint, source })?;
        self.datagrams_sent.fetch_add(1, Ordering::Relaxed);
        self.bytes_sent.fetch_add(sent as u64, Ordering::Relaxed);
        Ok(())
    }

    async fn recv_from(&self) -> Result<(SocketAddr, Bytes), TransportError> {
        let mut scratch = self.scratch.lock().await;
        let (len, from) = self
            .socket
            .recv_from(&mut scratch[..])
            .await
            .map_err(TransportError::Recv)?;
        Ok((from, Bytes::copy_from_slice(&scratch[..len])))
    }

    fn try_recv_from(&self) -> Result<Option<(SocketAddr, Bytes)>, TransportError> {
        // A concurrent recv_from holds the scratch buffer; there is nothing to take.
        let Ok(mut scratch) = self.scratch.try_lock() else {
            return Ok(None);
        };
        match self.socket.try_recv_from(&mut scratch[..]) {
            Ok((len, from)) => Ok(Some((from, Bytes::copy_from_slice(&scratch[..len])))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => {
                debug!("try_recv_from failed: {e}");
                Err(TransportError::Recv(e))
            }
        }
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.socket.local_addr().map_err(TransportError::Recv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn loopback(max: usize) -> UdpTransport {
        UdpTransport::bind("127.0.0.1:0".parse().expect("addr"), max)
            .await
            .expect("bind")
    }

    #[tokio::test]
    async fn test_loopback_datagram_arrives_intact() {
        // Arrange
        let sender = loopback(1500).await;
        let receiver = loopback(1500).await;
        let target = receiver.local_addr().expect("addr");

        // Act
        tokio_test::assert_ok!(sender.send_to(target, b"chunk bytes").await);
        let (from, data) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from())
            .await
            .expect("timely")
            .expect("recv");

        // Assert
        assert_eq!(&data[..], b"chunk bytes");
        assert_eq!(from, sender.local_addr().expect("addr"));
        assert_eq!(sender.datagrams_sent(), 1);
        assert_eq!(sender.bytes_sent(), 11);
    }

    #[tokio::test]
    async fn test_oversized_datagram_is_refused_without_sending() {
        let sender = loopback(16).await;
        let target: SocketAddr = "127.0.0.1:9".parse().expect("addr");

        let err = sender.send_to(target, &[0u8; 17]).await.unwrap_err();

        assert!(matches!(err, TransportError::Oversized { size: 17, max: 16 }));
        assert_eq!(sender.datagrams_sent(), 0);
    }

    #[tokio::test]
    async fn test_received_datagram_owns_only_its_own_bytes() {
        // Arrange
        let sender = loopback(1500).await;
        let receiver = loopback(MAX_UDP_PAYLOAD).await;
        let target = receiver.local_addr().expect("addr");
        tokio_test::assert_ok!(sender.send_to(target, &[7u8; 100]).await);

        // Act
        let (_, data) = tokio::time::timeout(Duration::from_secs(2), receiver.recv_from())
            .await
            .expect("timely")
            .expect("recv");

        // Assert
        assert_eq!(data.len(), 100);
        let owned = data.try_into_mut().expect("sole owner");
        assert!(owned.capacity() < MAX_UDP_PAYLOAD, "capacity {}", owned.capacity());
    }

    #[tokio::test]
    async fn test_consecutive_receives_do_not_share_contents() {
        let sender = loopback(1500).await;
        let receiver = loopback(1500).await;
        let target = receiver.local_addr().expect("addr");

        sender.send_to(target, b"first datagram").await.expect("send");
        let (_, first) = receiver.recv_from().await.expect("recv");
        sender.send_to(target, b"second").await.expect("send");
        let (_, second) = receiver.recv_from().await.expect("recv");

        assert_eq!(&first[..], b"first datagram");
        assert_eq!(&second[..], b"second");
    }

    #[tokio::test]
    async fn test_try_recv_reports_empty_queue() {
        let receiver = loopback(1500).await;
        assert!(receiver.try_recv_from().expect("no error").is_none());
    }
}
