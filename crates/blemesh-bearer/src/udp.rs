// ============================================
// File: crates/blemesh-bearer/src/udp.rs
// ============================================
//! # UDP Bearer
//!
//! ## Creation Reason
//! Runs mesh nodes on ordinary hosts. Each network PDU becomes one UDP
//! datagram sent to every configured peer, which stands in for an
//! advertising bearer where every node in range hears every PDU.
//!
//! ## Main Functionality
//! - `UdpBearer::bind`: socket with address reuse via socket2
//! - `send_raw`: fan out to the peer list
//! - `recv`: next datagram, trimmed to the PDU
//!
//! ## ⚠️ Important Note for Next Developer
//! - UDP is connectionless - lost datagrams are lost PDUs, like radio
//! - Datagrams larger than `MAX_PDU_SIZE` are dropped on receive
//!
//! ## Last Modified
//! v0.1.0 - Initial UDP bearer

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, info, trace, warn};

use crate::error::{BearerError, Result};
use crate::traits::{Bearer, MAX_PDU_SIZE};

// ============================================
// UdpBearer
// ============================================

/// UDP datagram bearer.
pub struct UdpBearer {
    /// Underlying socket
    socket: UdpSocket,
    /// Local address we're bound to
    local_addr: SocketAddr,
    /// Every PDU is sent to each of these
    peers: Vec<SocketAddr>,
    /// Shutdown flag
    shutdown: AtomicBool,
}

impl UdpBearer {
    /// Binds to `addr` (e.g. "0.0.0.0:7700") and sends to `peers`.
    ///
    /// # Errors
    /// - `InvalidAddress`: unparsable address
    /// - `BindFailed`: socket creation or bind failure
    pub async fn bind(addr: impl AsRef<str>, peers: Vec<SocketAddr>) -> Result<Self> {
        let addr_str = addr.as_ref();
        let socket_addr: SocketAddr = addr_str.parse().map_err(|_| BearerError::InvalidAddress {
            addr: addr_str.to_string(),
        })?;
        Self::bind_addr(socket_addr, peers).await
    }

    /// Binds to a socket address.
    ///
    /// # Errors
    /// Returns error if binding fails.
    #[allow(clippy::unused_async)]
    pub async fn bind_addr(addr: SocketAddr, peers: Vec<SocketAddr>) -> Result<Self> {
        info!("Binding UDP bearer to {}", addr);

        let domain = if addr.is_ipv4() { Domain::IPV4 } else { Domain::IPV6 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| BearerError::io("creating UDP socket", e))?;
        socket
            .set_reuse_address(true)
            .map_err(|e| BearerError::io("setting SO_REUSEADDR", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| BearerError::io("setting non-blocking", e))?;
        socket
            .bind(&addr.into())
            .map_err(|e| BearerError::bind_failed(addr, e.to_string()))?;

        let std_socket: std::net::UdpSocket = socket.into();
        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| BearerError::io("converting to Tokio socket", e))?;
        let local_addr = socket
            .local_addr()
            .map_err(|e| BearerError::io("getting local address", e))?;

        info!(peers = peers.len(), "UDP bearer bound to {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            peers,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Local address the bearer is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Bearer for UdpBearer {
    async fn send_raw(&self, pdu: &[u8]) -> Result<()> {
        if !self.is_active() {
            return Err(BearerError::ShuttingDown);
        }
        if pdu.len() > MAX_PDU_SIZE {
            return Err(BearerError::PduTooLarge {
                max: MAX_PDU_SIZE,
                actual: pdu.len(),
            });
        }
        for peer in &self.peers {
            if let Err(e) = self.socket.send_to(pdu, peer).await {
                warn!(peer = %peer, error = %e, "UDP bearer send failed");
                return Err(BearerError::send_failed(e.to_string()));
            }
        }
        trace!(len = pdu.len(), peers = self.peers.len(), "PDU sent");
        Ok(())
    }

    async fn recv(&self) -> Result<Bytes> {
        let mut buf = [0u8; 64];
        loop {
            if !self.is_active() {
                return Err(BearerError::ShuttingDown);
            }
            let (len, from) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| BearerError::ReceiveFailed {
                    reason: e.to_string(),
                })?;
            if len > MAX_PDU_SIZE {
                debug!(len, from = %from, "Oversized datagram dropped");
                continue;
            }
            trace!(len, from = %from, "PDU received");
            return Ok(Bytes::copy_from_slice(&buf[..len]));
        }
    }

    async fn shutdown(&self) -> Result<()> {
        self.shutdown.store(true, Ordering::Release);
        info!("UDP bearer shutdown complete");
        Ok(())
    }

    fn is_active(&self) -> bool {
        !self.shutdown.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for UdpBearer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UdpBearer")
            .field("local_addr", &self.local_addr)
            .field("peers", &self.peers)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_recv_loopback() {
        let rx = UdpBearer::bind("127.0.0.1:0", vec![]).await.unwrap();
        let tx = UdpBearer::bind("127.0.0.1:0", vec![rx.local_addr()]).await.unwrap();

        tx.send_raw(&[0x68, 0x01, 0x02]).await.unwrap();
        assert_eq!(&rx.recv().await.unwrap()[..], &[0x68, 0x01, 0x02]);
    }

    #[tokio::test]
    async fn test_oversized_pdu_rejected() {
        let tx = UdpBearer::bind("127.0.0.1:0", vec![]).await.unwrap();
        let result = tx.send_raw(&[0u8; MAX_PDU_SIZE + 1]).await;
        assert!(matches!(result, Err(BearerError::PduTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_shutdown() {
        let bearer = UdpBearer::bind("127.0.0.1:0", vec![]).await.unwrap();
        assert!(bearer.is_active());
        bearer.shutdown().await.unwrap();
        assert!(!bearer.is_active());
        assert!(matches!(bearer.recv().await, Err(BearerError::ShuttingDown)));
    }

    #[tokio::test]
    async fn test_invalid_address() {
        let result = UdpBearer::bind("not-an-address", vec![]).await;
        assert!(matches!(result, Err(BearerError::InvalidAddress { .. })));
    }
}
