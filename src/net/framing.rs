// Framed channel: length-prefixed binary frames over a duplex byte stream.
//
// The stream is expected to be non-blocking; reads busy-retry inline on
// WouldBlock until the requested count is collected or the peer disconnects
// (a zero-length read). Frame boundaries come only from the 4-byte length
// prefixes — transport packet boundaries mean nothing here.

use std::io::{self, Read, Write};

// ---------------------------------------------------------------------------
// Framing error
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum FrameError {
    Io(io::Error),
    /// Fewer bytes than requested before the connection closed.
    ShortRead { wanted: usize, got: usize },
    /// Declared payload length exceeds the working buffer capacity.
    Oversized { len: usize, capacity: usize },
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::ShortRead { wanted, got } => {
                write!(f, "short read: wanted {wanted} bytes, got {got}")
            }
            Self::Oversized { len, capacity } => {
                write!(f, "frame length {len} exceeds buffer capacity {capacity}")
            }
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// FramedChannel
// ---------------------------------------------------------------------------

/// Reliable frame reader/writer over a non-blocking duplex stream.
///
/// All protocol integers are little-endian, matching the original device's
/// raw-struct sends.
pub struct FramedChannel<S> {
    stream: S,
}

impl<S: Read + Write> FramedChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Consume the channel, returning the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Read exactly `buf.len()` bytes, retrying inline on WouldBlock.
    ///
    /// Returns the number of bytes collected; fewer than requested only when
    /// the connection is confirmed closed (zero-length read). There is no
    /// timeout — a silent peer blocks here indefinitely.
    pub fn read_exact_or_eof(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.stream.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    /// Read a 4-byte little-endian unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32, FrameError> {
        let mut raw = [0u8; 4];
        let got = self.read_exact_or_eof(&mut raw)?;
        if got != 4 {
            return Err(FrameError::ShortRead { wanted: 4, got });
        }
        Ok(u32::from_le_bytes(raw))
    }

    /// Read one length-prefixed frame into `buf`.
    ///
    /// The declared length is validated against `buf.len()` before any
    /// payload byte is read; an oversized declaration is rejected outright
    /// rather than truncated into the buffer. Returns the payload length.
    pub fn read_frame(&mut self, buf: &mut [u8]) -> Result<usize, FrameError> {
        let len = self.read_u32()? as usize;
        if len > buf.len() {
            return Err(FrameError::Oversized {
                len,
                capacity: buf.len(),
            });
        }
        let got = self.read_exact_or_eof(&mut buf[..len])?;
        if got != len {
            return Err(FrameError::ShortRead { wanted: len, got });
        }
        Ok(len)
    }

    /// Write a 4-byte little-endian status code.
    pub fn write_status(&mut self, status: i32) -> io::Result<()> {
        self.write_all_retry(&status.to_le_bytes())
    }

    /// Write a 4-byte little-endian unsigned integer.
    pub fn write_u32(&mut self, value: u32) -> io::Result<()> {
        self.write_all_retry(&value.to_le_bytes())
    }

    /// Write all of `data`, retrying inline on WouldBlock.
    pub fn write_all_retry(&mut self, data: &[u8]) -> io::Result<()> {
        let mut sent = 0;
        while sent < data.len() {
            match self.stream.write(&data[sent..]) {
                Ok(0) => {
                    return Err(io::Error::new(
                        io::ErrorKind::WriteZero,
                        "connection closed while writing",
                    ));
                }
                Ok(n) => sent += n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write one length-prefixed frame.
    pub fn write_frame(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_u32(payload.len() as u32)?;
        self.write_all_retry(payload)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
