//! Datagram transport
//!
//! The node only needs two things from the wire: fire a datagram at an
//! address, and hand every received datagram to `Messaging::dispatch`.

use crate::error::{BlockchainError, Result};
use crate::network::Messaging;
use crate::utils::ShutdownToken;
use log::{debug, error, info};
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Largest datagram the receive loop accepts
pub const MAX_DATAGRAM_SIZE: usize = 65_536;

const READ_TIMEOUT_MILLIS: u64 = 100;

pub trait Transport: Send + Sync {
    /// Hand one datagram to the OS. Errors only on local failures; delivery is never confirmed.
    fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> Result<()>;

    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr) -> Result<UdpTransport> {
        let socket = UdpSocket::bind(addr)
            .map_err(|e| BlockchainError::Network(format!("Failed to bind to {addr}: {e}")))?;
        socket
            .set_read_timeout(Some(Duration::from_millis(READ_TIMEOUT_MILLIS)))
            .map_err(|e| BlockchainError::Network(format!("Failed to set read timeout: {e}")))?;
        let local_addr = socket.local_addr()?;
        info!("Listening on udp://{local_addr}");
        Ok(UdpTransport { socket, local_addr })
    }

    /// Start the single dispatch thread for this socket
    pub fn spawn_receiver(
        self: &Arc<Self>,
        messaging: Arc<Messaging>,
        token: ShutdownToken,
    ) -> Result<JoinHandle<()>> {
        let transport = Arc::clone(self);
        thread::Builder::new()
            .name(format!("udp-recv-{}", self.local_addr.port()))
            .spawn(move || transport.receive_loop(&messaging, &token))
            .map_err(|e| BlockchainError::Io(format!("Failed to spawn receiver: {e}")))
    }

    fn receive_loop(&self, messaging: &Messaging, token: &ShutdownToken) {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        while !token.is_shutdown() {
            match self.socket.recv_from(&mut buf) {
                Ok((len, sender)) => messaging.dispatch(&buf[..len], sender),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                // ICMP port unreachable from an earlier send surfaces here on some platforms
                Err(e) if e.kind() == ErrorKind::ConnectionReset => {
                    debug!("Ignoring connection reset on {}", self.local_addr)
                }
                Err(e) => {
                    error!("Receive failed on {}: {e}", self.local_addr);
                    token.sleep(Duration::from_millis(READ_TIMEOUT_MILLIS));
                }
            }
        }
        debug!("Receiver on {} stopped", self.local_addr);
    }
}

impl Transport for UdpTransport {
    fn send_to(&self, addr: SocketAddr, bytes: &[u8]) -> Result<()> {
        self.socket
            .send_to(bytes, addr)
            .map(|_| ())
            .map_err(|e| BlockchainError::Delivery(format!("{addr}: {e}")))
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
