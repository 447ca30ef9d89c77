// Discovery responder: UDP magic probe/reply.
//
// The host broadcasts a magic string; the device replies with the paired
// magic to the sender's address. Two dialects exist: the legacy magic
// advertises full-transfer-only hosts, the delta magic advertises hosts
// that can negotiate patch mode. Discovery is idempotent — the reply
// depends only on which magic arrived, never on call history.

use std::io;
use std::net::{SocketAddr, UdpSocket};

use log::debug;

/// Legacy (full-transfer only) probe and reply magics.
pub const LEGACY_RECV_MAGIC: &[u8] = b"3dsboot";
pub const LEGACY_SEND_MAGIC: &[u8] = b"boot3ds";

/// Delta-capable probe and reply magics.
pub const DELTA_RECV_MAGIC: &[u8] = b"3dsbootd";
pub const DELTA_SEND_MAGIC: &[u8] = b"boot3dsd";

/// Largest datagram the responder will examine.
const PROBE_CAPACITY: usize = 255;

// ---------------------------------------------------------------------------
// Dialect
// ---------------------------------------------------------------------------

/// Protocol dialect advertised by a discovery probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Full transfers only; no mode byte on the stream.
    Legacy,
    /// Supports delta-patch negotiation (mode byte precedes the name).
    Delta,
}

impl Dialect {
    /// The reply magic paired with this dialect's probe.
    pub fn reply_magic(self) -> &'static [u8] {
        match self {
            Dialect::Legacy => LEGACY_SEND_MAGIC,
            Dialect::Delta => DELTA_SEND_MAGIC,
        }
    }
}

/// Classify an inbound datagram by prefix match against the known magics.
///
/// The delta magic extends the legacy one, so it is tested first.
pub fn match_magic(datagram: &[u8]) -> Option<Dialect> {
    if datagram.starts_with(DELTA_RECV_MAGIC) {
        Some(Dialect::Delta)
    } else if datagram.starts_with(LEGACY_RECV_MAGIC) {
        Some(Dialect::Legacy)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Responder
// ---------------------------------------------------------------------------

/// Non-blocking UDP responder, polled from the session loop.
pub struct DiscoveryResponder {
    socket: UdpSocket,
    port: u16,
    /// Dialect offered by the most recent recognized probe.
    last_dialect: Option<Dialect>,
}

impl DiscoveryResponder {
    /// Bind the responder on the given port (any interface) and switch the
    /// socket to non-blocking mode.
    pub fn bind(port: u16) -> io::Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", port))?;
        socket.set_nonblocking(true)?;
        let port = socket.local_addr()?.port();
        Ok(Self {
            socket,
            port,
            last_dialect: None,
        })
    }

    /// The local address the responder is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Whether the most recent probe advertised the delta-capable dialect.
    pub fn peer_supports_delta(&self) -> bool {
        matches!(self.last_dialect, Some(Dialect::Delta))
    }

    /// The dialect negotiated by discovery so far (legacy if none seen).
    pub fn dialect(&self) -> Dialect {
        self.last_dialect.unwrap_or(Dialect::Legacy)
    }

    /// Service at most one probe: non-blocking receive, reply if the
    /// datagram matches a known magic. Returns the dialect replied to, if
    /// any. Unrecognized datagrams are dropped silently.
    pub fn poll(&mut self) -> io::Result<Option<Dialect>> {
        let mut buf = [0u8; PROBE_CAPACITY];
        let (len, mut peer) = match self.socket.recv_from(&mut buf) {
            Ok(r) => r,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(None),
            Err(e) => return Err(e),
        };

        let Some(dialect) = match_magic(&buf[..len]) else {
            return Ok(None);
        };

        // Reply goes back to the sender's address on the protocol port,
        // matching the original responder.
        peer.set_port(self.port);
        self.socket.send_to(dialect.reply_magic(), peer)?;
        debug!("discovery: {dialect:?} probe from {peer}, replied");

        self.last_dialect = Some(dialect);
        Ok(Some(dialect))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
