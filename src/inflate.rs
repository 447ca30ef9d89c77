// Streaming zlib decoder for full-transfer payloads.
//
// Frames from the channel are fed in as compressed input; output is drained
// in fixed-size bursts into the destination sink. Completion is driven
// purely by the zlib stream's own end marker — the declared total length is
// progress reporting only.

use std::io::{self, Write};

use flate2::{Decompress, FlushDecompress, Status};

// ---------------------------------------------------------------------------
// Inflate error
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum InflateError {
    /// Malformed or corrupt zlib stream.
    Data(flate2::DecompressError),
    /// Sink write failure.
    Io(io::Error),
    /// The decoder made no progress on non-empty input.
    Stalled,
    /// Input arrived after the stream's logical end.
    TrailingInput,
}

impl std::fmt::Display for InflateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Data(e) => write!(f, "zlib stream error: {e}"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Stalled => write!(f, "inflate stalled on non-empty input"),
            Self::TrailingInput => write!(f, "input after end of zlib stream"),
        }
    }
}

impl std::error::Error for InflateError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Data(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<flate2::DecompressError> for InflateError {
    fn from(e: flate2::DecompressError) -> Self {
        Self::Data(e)
    }
}

impl From<io::Error> for InflateError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// InflateStream
// ---------------------------------------------------------------------------

/// Incremental zlib decoder with a fixed output burst buffer.
///
/// State persists across `push_chunk` calls; the burst buffer is allocated
/// once at the configured capacity and never resized.
pub struct InflateStream {
    decomp: Decompress,
    burst: Vec<u8>,
    bytes_out: u64,
    finished: bool,
}

impl InflateStream {
    /// Create a decoder expecting a zlib-wrapped stream (the original
    /// receiver uses `inflateInit`, i.e. zlib framing, not raw deflate).
    pub fn new(burst_capacity: usize) -> Self {
        Self {
            decomp: Decompress::new(true),
            burst: vec![0u8; burst_capacity],
            bytes_out: 0,
            finished: false,
        }
    }

    /// Total decompressed bytes written to the sink so far.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    /// Whether the stream has reached its logical end.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one frame of compressed input, draining all produced output
    /// into `sink`. Returns `true` once the zlib stream signals its end.
    ///
    /// Structural errors are fatal and must not be retried.
    pub fn push_chunk<W: Write>(
        &mut self,
        mut input: &[u8],
        sink: &mut W,
    ) -> Result<bool, InflateError> {
        if self.finished {
            return Err(InflateError::TrailingInput);
        }

        loop {
            let in_before = self.decomp.total_in();
            let out_before = self.decomp.total_out();

            let status = self
                .decomp
                .decompress(input, &mut self.burst, FlushDecompress::None)?;

            let consumed = (self.decomp.total_in() - in_before) as usize;
            let produced = (self.decomp.total_out() - out_before) as usize;
            input = &input[consumed..];

            if produced > 0 {
                sink.write_all(&self.burst[..produced])?;
                self.bytes_out += produced as u64;
            }

            match status {
                Status::StreamEnd => {
                    self.finished = true;
                    return Ok(true);
                }
                Status::Ok | Status::BufError => {
                    if input.is_empty() && produced == 0 {
                        // All input absorbed, nothing more to drain.
                        return Ok(false);
                    }
                    if consumed == 0 && produced == 0 {
                        return Err(InflateError::Stalled);
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
