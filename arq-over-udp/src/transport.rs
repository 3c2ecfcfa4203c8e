//! Datagram transport abstraction.
//!
//! [`Transport`] is the narrow seam between the ARQ sessions and the network:
//! send one datagram, receive one datagram.  It may lose datagrams but never
//! splices or truncates them.  Two implementations are provided:
//! - [`UdpTransport`]: a thin wrapper around `tokio::net::UdpSocket`.
//! - [`MemoryTransport`]: an in-process channel pair for tests and demos.
//!
//! Receive timeouts are applied by the caller with `tokio::time::timeout`, so
//! implementations only need a plain blocking receive.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;

use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// A datagram channel to a single peer.
pub trait Transport: Send + Sync + 'static {
    /// Send `datagram` to the peer.
    fn send(&self, datagram: &[u8]) -> impl Future<Output = io::Result<()>> + Send;

    /// Wait for the next datagram, copy it into `buf`, and return its length.
    fn recv(&self, buf: &mut [u8]) -> impl Future<Output = io::Result<usize>> + Send;
}

// ---------------------------------------------------------------------------
// UdpTransport
// ---------------------------------------------------------------------------

/// UDP socket bound locally, sending to a fixed or learned peer.
///
/// A sender knows its peer up front.  A receiver starts without one and
/// replies to whoever sent the most recent datagram, the way a listening
/// socket answers `recvfrom`'s source address.
#[derive(Debug)]
pub struct UdpTransport {
    /// Address this socket is bound to (filled in after the OS assigns a port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
    peer: Mutex<Option<SocketAddr>>,
}

impl UdpTransport {
    /// Bind to `local_addr` and send to `peer`.
    pub async fn connect(local_addr: SocketAddr, peer: SocketAddr) -> io::Result<Self> {
        let mut transport = Self::bind(local_addr).await?;
        transport.peer = Mutex::new(Some(peer));
        Ok(transport)
    }

    /// Bind to `local_addr`; the peer is learned from the first datagram.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> io::Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self {
            local_addr,
            inner,
            peer: Mutex::new(None),
        })
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer.lock().ok().and_then(|peer| *peer)
    }

    fn set_peer(&self, addr: SocketAddr) {
        if let Ok(mut peer) = self.peer.lock() {
            *peer = Some(addr);
        }
    }
}

impl Transport for UdpTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        let peer = self
            .peer()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no peer address yet"))?;
        self.inner.send_to(datagram, peer).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let (n, addr) = self.inner.recv_from(buf).await?;
        self.set_peer(addr);
        Ok(n)
    }
}

// ---------------------------------------------------------------------------
// MemoryTransport
// ---------------------------------------------------------------------------

/// One end of an in-process, lossless datagram link.
///
/// Dropping one end makes the other end's `recv` fail with
/// [`io::ErrorKind::ConnectionAborted`] and its `send` fail with
/// [`io::ErrorKind::BrokenPipe`].
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Vec<u8>>,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
}

impl MemoryTransport {
    /// Two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                tx: a_tx,
                rx: tokio::sync::Mutex::new(b_rx),
            },
            Self {
                tx: b_tx,
                rx: tokio::sync::Mutex::new(a_rx),
            },
        )
    }
}

impl Transport for MemoryTransport {
    async fn send(&self, datagram: &[u8]) -> io::Result<()> {
        self.tx
            .send(datagram.to_vec())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "peer end dropped"))
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        let datagram = self
            .rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| io::Error::new(io::ErrorKind::ConnectionAborted, "peer end dropped"))?;
        if datagram.len() > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "datagram larger than receive buffer",
            ));
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Ok(datagram.len())
    }
}
