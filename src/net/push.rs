// Host-side sender: the companion that pushes an image to the device.
//
// Mirrors the device's session state machine from the other end. Delta
// pushes carry a fallback: if the device answers "checksum mismatch" it has
// already consumed the checksum and degraded to full mode, so the host
// re-sends the image as a zlib stream. A "no source" answer leaves the
// checksum bytes unread on the device's stream, which cannot be realigned;
// that push fails and the caller should retry in full mode.

use std::io::{self, Write};
use std::net::{SocketAddr, TcpStream, UdpSocket};
use std::time::Duration;

use flate2::Compression;
use flate2::write::ZlibEncoder;
use log::{debug, info};
use thiserror::Error;

use crate::delta::encoder::encode_delta;
use crate::delta::source::adler32;
use crate::net::discovery::Dialect;
use crate::net::framing::{FrameError, FramedChannel};
use crate::net::session::{
    STATUS_CHECKSUM_MISMATCH, STATUS_NO_SOURCE, STATUS_OK, STATUS_OPEN_FAILED,
};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum PushError {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("framing: {0}")]
    Frame(#[from] FrameError),
    #[error("device reported no source file; delta push cannot continue")]
    NoSource,
    #[error("device rejected the session with status {0}")]
    Rejected(i32),
    #[error("name longer than 255 bytes")]
    NameTooLong,
    #[error("delta push requires the delta-capable dialect")]
    WrongDialect,
}

// ---------------------------------------------------------------------------
// Push report
// ---------------------------------------------------------------------------

/// What mode the transfer actually used after negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferKind {
    Full,
    Delta,
    /// Delta was requested but the device degraded to a full transfer.
    DeltaFallback,
}

/// Summary of one completed push.
#[derive(Debug, Clone)]
pub struct PushReport {
    pub kind: TransferKind,
    /// Status the device sent before streaming.
    pub first_status: i32,
    /// Status the device sent after streaming (same value by protocol).
    pub final_status: i32,
    /// Payload bytes sent on the wire (compressed or patch form).
    pub bytes_sent: u64,
}

// ---------------------------------------------------------------------------
// Discovery (host side)
// ---------------------------------------------------------------------------

/// Send one discovery probe to `device` for the given dialect.
pub fn send_probe(socket: &UdpSocket, device: SocketAddr, dialect: Dialect) -> io::Result<()> {
    let magic: &[u8] = match dialect {
        Dialect::Legacy => super::discovery::LEGACY_RECV_MAGIC,
        Dialect::Delta => super::discovery::DELTA_RECV_MAGIC,
    };
    socket.send_to(magic, device)?;
    Ok(())
}

/// Broadcast probes on `port` and wait for a device reply.
///
/// The device replies to the sender's address with the port rewritten to
/// the protocol port, so the probing socket binds that port locally.
pub fn discover(port: u16, dialect: Dialect, timeout: Duration) -> io::Result<Option<SocketAddr>> {
    let socket = UdpSocket::bind(("0.0.0.0", port))?;
    socket.set_broadcast(true)?;
    socket.set_read_timeout(Some(timeout))?;

    send_probe(&socket, SocketAddr::from(([255, 255, 255, 255], port)), dialect)?;

    let mut buf = [0u8; 255];
    match socket.recv_from(&mut buf) {
        Ok((len, peer)) => {
            if buf[..len].starts_with(dialect.reply_magic()) {
                debug!("device at {peer} answered discovery");
                Ok(Some(peer))
            } else {
                Ok(None)
            }
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::TimedOut => {
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// PushClient
// ---------------------------------------------------------------------------

/// One TCP connection to a listening device.
pub struct PushClient {
    chan: FramedChannel<TcpStream>,
    dialect: Dialect,
    chunk_capacity: usize,
}

impl PushClient {
    /// Connect to the device. `dialect` must match the probe the device
    /// last saw, since it decides whether a mode byte is expected.
    pub fn connect(device: SocketAddr, dialect: Dialect, chunk_capacity: usize) -> io::Result<Self> {
        let stream = TcpStream::connect(device)?;
        stream.set_nodelay(true)?;
        Ok(Self {
            chan: FramedChannel::new(stream),
            dialect,
            chunk_capacity,
        })
    }

    fn send_name(&mut self, name: &str) -> Result<(), PushError> {
        if name.len() > 255 {
            return Err(PushError::NameTooLong);
        }
        self.chan.write_u32(name.len() as u32)?;
        self.chan.write_all_retry(name.as_bytes())?;
        Ok(())
    }

    fn send_payload_frames(&mut self, payload: &[u8]) -> Result<u64, PushError> {
        let mut sent = 0u64;
        for chunk in payload.chunks(self.chunk_capacity) {
            self.chan.write_frame(chunk)?;
            sent += chunk.len() as u64;
        }
        Ok(sent)
    }

    fn read_status(&mut self) -> Result<i32, PushError> {
        Ok(self.chan.read_u32()? as i32)
    }

    fn send_argument(&mut self, argument: &str) -> Result<(), PushError> {
        self.chan.write_u32(argument.len() as u32)?;
        self.chan.write_all_retry(argument.as_bytes())?;
        Ok(())
    }

    /// Push `target` as a full (zlib) transfer.
    pub fn push_full(
        &mut self,
        name: &str,
        target: &[u8],
        argument: &str,
    ) -> Result<PushReport, PushError> {
        if self.dialect == Dialect::Delta {
            self.chan.write_all_retry(&[0u8])?; // mode: full
        }
        self.send_name(name)?;
        self.chan.write_u32(target.len() as u32)?;

        let first_status = self.read_status()?;
        // Open failure still streams (into the device's null sink).
        if first_status != STATUS_OK && first_status != STATUS_OPEN_FAILED {
            return Err(PushError::Rejected(first_status));
        }

        let bytes_sent = self.stream_zlib(target)?;
        let final_status = self.read_status()?;
        self.send_argument(argument)?;

        info!("full push of {name}: {bytes_sent} compressed bytes");
        Ok(PushReport {
            kind: TransferKind::Full,
            first_status,
            final_status,
            bytes_sent,
        })
    }

    /// Push `target` as a delta against `source` (the image the device is
    /// believed to hold), falling back to a full stream if the device
    /// reports a checksum mismatch.
    pub fn push_delta(
        &mut self,
        name: &str,
        source: &[u8],
        target: &[u8],
        argument: &str,
    ) -> Result<PushReport, PushError> {
        if self.dialect != Dialect::Delta {
            return Err(PushError::WrongDialect);
        }

        self.chan.write_all_retry(&[1u8])?; // mode: delta
        self.send_name(name)?;
        self.chan.write_u32(target.len() as u32)?;
        self.chan.write_u32(adler32(source))?;

        let first_status = self.read_status()?;
        let (kind, payload) = match first_status {
            STATUS_OK | STATUS_OPEN_FAILED => {
                let patch = encode_delta(source, target, self.chunk_capacity)?;
                (TransferKind::Delta, patch)
            }
            STATUS_CHECKSUM_MISMATCH => {
                // The device consumed our checksum, degraded to full mode,
                // and now expects a zlib stream.
                debug!("device reports stale source; falling back to full transfer");
                let bytes_sent = self.stream_zlib(target)?;
                let final_status = self.read_status()?;
                self.send_argument(argument)?;
                return Ok(PushReport {
                    kind: TransferKind::DeltaFallback,
                    first_status,
                    final_status,
                    bytes_sent,
                });
            }
            STATUS_NO_SOURCE => return Err(PushError::NoSource),
            other => return Err(PushError::Rejected(other)),
        };

        let bytes_sent = self.send_payload_frames(&payload)?;
        let final_status = self.read_status()?;
        self.send_argument(argument)?;

        info!("delta push of {name}: {bytes_sent} patch bytes for {} target bytes", target.len());
        Ok(PushReport {
            kind,
            first_status,
            final_status,
            bytes_sent,
        })
    }

    /// Compress `target` and send it as a framed zlib stream.
    fn stream_zlib(&mut self, target: &[u8]) -> Result<u64, PushError> {
        let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
        enc.write_all(target).map_err(PushError::Io)?;
        let compressed = enc.finish().map_err(PushError::Io)?;
        self.send_payload_frames(&compressed)
    }
}
