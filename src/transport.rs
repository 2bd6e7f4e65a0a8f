//! Packet transports: UDP, TCP, and an in-memory MockLink for testing.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs, UdpSocket};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Recommended UDP port for datagram sessions.
pub const UDP_PORT: u16 = 7355;
/// Recommended TCP port for stream sessions (both variants).
pub const TCP_PORT: u16 = 7356;

/// A bidirectional byte/packet link. The session controller is the only
/// writer; `recv` returning `Ok(0)` means the peer closed an ordered
/// transport.
#[async_trait]
pub trait Transport: Send {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize>;

    async fn send(&mut self, data: &[u8]) -> Result<()>;

    /// Re-establish a dropped stream transport. Datagram transports have
    /// nothing to re-establish.
    async fn reconnect(&mut self) -> Result<()> {
        Err(Error::Unsupported("reconnect".into()))
    }

    /// Human-readable peer identity for logging.
    fn peer_label(&self) -> String;
}

// ---------------------------------------------------------------------------
// UDP
// ---------------------------------------------------------------------------

/// Connectionless datagram link. A receiver binds and learns its peer from
/// the first datagram; a sender connects outright.
pub struct UdpLink {
    socket: UdpSocket,
    peer: Option<SocketAddr>,
}

impl UdpLink {
    /// Bind a receiving socket, e.g. `0.0.0.0:7355`.
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        debug!(local = %socket.local_addr()?, "udp bound");
        Ok(Self { socket, peer: None })
    }

    /// Open a sending socket toward `peer`.
    pub async fn connect<A: ToSocketAddrs>(peer: A) -> Result<Self> {
        let socket = UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect(peer).await?;
        let peer = socket.peer_addr()?;
        debug!(%peer, "udp connected");
        Ok(Self {
            socket,
            peer: Some(peer),
        })
    }
}

#[async_trait]
impl Transport for UdpLink {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        let (n, from) = self.socket.recv_from(buf).await?;
        if self.peer.is_none() {
            info!(peer = %from, "sender appeared");
            self.peer = Some(from);
        }
        Ok(n)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        let peer = self.peer.ok_or(Error::NotConnected)?;
        self.socket.send_to(data, peer).await?;
        Ok(())
    }

    fn peer_label(&self) -> String {
        self.peer
            .map(|p| p.to_string())
            .unwrap_or_else(|| "udp:unbound-peer".into())
    }
}

// ---------------------------------------------------------------------------
// TCP
// ---------------------------------------------------------------------------

/// Ordered stream link. Links made with [`TcpLink::connect`] can re-dial
/// after a drop; accepted links cannot.
pub struct TcpLink {
    stream: TcpStream,
    peer: SocketAddr,
    dialed: bool,
}

impl TcpLink {
    pub async fn connect<A: ToSocketAddrs>(peer: A) -> Result<Self> {
        let stream = TcpStream::connect(peer).await?;
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        debug!(%peer, "tcp connected");
        Ok(Self {
            stream,
            peer,
            dialed: true,
        })
    }

    /// Wrap a stream accepted by a listener.
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        let peer = stream.peer_addr()?;
        Ok(Self {
            stream,
            peer,
            dialed: false,
        })
    }
}

#[async_trait]
impl Transport for TcpLink {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        Ok(self.stream.read(buf).await?)
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.stream.write_all(data).await?;
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        if !self.dialed {
            return Err(Error::Unsupported(
                "cannot re-dial an accepted connection".into(),
            ));
        }
        info!(peer = %self.peer, "re-dialing");
        let stream = TcpStream::connect(self.peer).await?;
        stream.set_nodelay(true)?;
        self.stream = stream;
        Ok(())
    }

    fn peer_label(&self) -> String {
        self.peer.to_string()
    }
}

// ---------------------------------------------------------------------------
// MockLink for testing
// ---------------------------------------------------------------------------

/// One direction of a mock link.
#[derive(Debug, Default)]
struct Pipe {
    queue: Mutex<VecDeque<Vec<u8>>>,
    notify: Notify,
    closed: AtomicBool,
}

impl Pipe {
    fn push(&self, data: Vec<u8>) {
        self.queue.lock().unwrap().push_back(data);
        self.notify.notify_one();
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_one();
    }

    fn reopen(&self) {
        self.queue.lock().unwrap().clear();
        self.closed.store(false, Ordering::Release);
    }
}

/// In-memory packet link. Queue inbound packets with `inject`, inspect what
/// was transmitted with `sent`, and simulate drops with `close`. Clone
/// handles share state, so a test can keep one while the session owns the
/// other.
#[derive(Clone, Default)]
pub struct MockLink {
    incoming: Arc<Pipe>,
    outgoing: Arc<Pipe>,
    sent: Arc<Mutex<Vec<Vec<u8>>>>,
    reconnectable: bool,
}

impl MockLink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A link whose `reconnect` succeeds by reopening the pipes.
    pub fn reconnectable() -> Self {
        Self {
            reconnectable: true,
            ..Self::default()
        }
    }

    /// Two cross-connected links: what one sends, the other receives.
    pub fn pair() -> (Self, Self) {
        let a = Arc::new(Pipe::default());
        let b = Arc::new(Pipe::default());
        let left = Self {
            incoming: a.clone(),
            outgoing: b.clone(),
            sent: Arc::new(Mutex::new(Vec::new())),
            reconnectable: false,
        };
        let right = Self {
            incoming: b,
            outgoing: a,
            sent: Arc::new(Mutex::new(Vec::new())),
            reconnectable: false,
        };
        (left, right)
    }

    /// Queue an inbound packet. Wakes any pending reader.
    pub fn inject(&self, data: &[u8]) {
        self.incoming.push(data.to_vec());
    }

    /// Every packet sent through this link, in order.
    pub fn sent(&self) -> Vec<Vec<u8>> {
        self.sent.lock().unwrap().clone()
    }

    /// All sent packets flattened into one byte stream.
    pub fn sent_bytes(&self) -> Vec<u8> {
        self.sent.lock().unwrap().concat()
    }

    /// Simulate the peer dropping the connection.
    pub fn close(&self) {
        self.incoming.close();
        self.outgoing.close();
    }
}

#[async_trait]
impl Transport for MockLink {
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize> {
        loop {
            if let Some(packet) = self.incoming.queue.lock().unwrap().pop_front() {
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
                return Ok(n);
            }
            if self.incoming.closed.load(Ordering::Acquire) {
                return Ok(0);
            }
            self.incoming.notify.notified().await;
        }
    }

    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.outgoing.closed.load(Ordering::Acquire) {
            return Err(Error::TransportClosed);
        }
        self.sent.lock().unwrap().push(data.to_vec());
        self.outgoing.push(data.to_vec());
        Ok(())
    }

    async fn reconnect(&mut self) -> Result<()> {
        if !self.reconnectable {
            return Err(Error::Unsupported("reconnect".into()));
        }
        self.incoming.reopen();
        self.outgoing.reopen();
        Ok(())
    }

    fn peer_label(&self) -> String {
        "mock".into()
    }
}
