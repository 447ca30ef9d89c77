// Frame-fed VCDIFF decoder.
//
// Input arrives as arbitrarily-split chunks pushed by the session loop.
// The decoder buffers until a complete window (header plus all three
// sections) is resident, decodes it in one pass, streams the target bytes
// to the sink, and drops the consumed input. Source bytes are pulled
// through a `PatchSource`, so the resident footprint is one window plus
// one source block.

use std::io::{self, Write};

use log::{debug, trace};

use super::address_cache::{AddressCache, AddressCacheError};
use super::code_table::{self, CodeTable, CodeTableEntry, OP_ADD, OP_CPY, OP_NOOP, OP_RUN};
use super::source::{PatchSource, adler32};
use super::varint::{self, VarIntError};
use super::window::{HeaderError, MAX_WINDOW_SIZE, PatchHeader, WindowHeader};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum DecodeError {
    /// Malformed or unsupported file/window header.
    Header(HeaderError),
    /// Instruction or data section malformed.
    Invalid(String),
    /// COPY address could not be decoded.
    Address(AddressCacheError),
    /// Reading from the source or writing to the sink failed.
    Io(io::Error),
    /// Window checksum did not match the reconstructed bytes.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Decoded output did not end at the declared length.
    LengthMismatch { expected: u64, actual: u64 },
    /// More bytes pushed after the stream completed.
    TrailingInput,
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Header(e) => write!(f, "{e}"),
            Self::Invalid(msg) => write!(f, "invalid delta stream: {msg}"),
            Self::Address(e) => write!(f, "{e}"),
            Self::Io(e) => write!(f, "i/o error: {e}"),
            Self::ChecksumMismatch { expected, actual } => write!(
                f,
                "window checksum mismatch: expected {expected:#010X}, got {actual:#010X}"
            ),
            Self::LengthMismatch { expected, actual } => write!(
                f,
                "decoded length mismatch: expected {expected}, got {actual}"
            ),
            Self::TrailingInput => write!(f, "input after end of delta stream"),
        }
    }
}

impl std::error::Error for DecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Header(e) => Some(e),
            Self::Address(e) => Some(e),
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HeaderError> for DecodeError {
    fn from(e: HeaderError) -> Self {
        Self::Header(e)
    }
}

impl From<AddressCacheError> for DecodeError {
    fn from(e: AddressCacheError) -> Self {
        Self::Address(e)
    }
}

impl From<io::Error> for DecodeError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<VarIntError> for DecodeError {
    fn from(e: VarIntError) -> Self {
        Self::Invalid(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Decoder
// ---------------------------------------------------------------------------

/// Incremental VCDIFF decoder driven by pushed chunks.
pub struct PatchDecoder {
    /// Unconsumed input. Compacted after every decoded window.
    input: Vec<u8>,
    /// Set once the file header has been parsed.
    header: Option<PatchHeader>,
    code_table: &'static CodeTable,
    /// Declared length of the reconstructed file.
    expected_len: u64,
    /// Bytes emitted to the sink so far.
    bytes_out: u64,
    windows: u64,
    finished: bool,
}

impl PatchDecoder {
    /// `expected_len` is the final file length announced by the peer; the
    /// stream is complete once exactly that many bytes have been produced.
    pub fn new(expected_len: u64) -> Self {
        Self {
            input: Vec::new(),
            header: None,
            code_table: code_table::default_code_table(),
            expected_len,
            bytes_out: 0,
            windows: 0,
            finished: false,
        }
    }

    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    pub fn windows(&self) -> u64 {
        self.windows
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Feed one chunk of patch bytes, decoding every window that becomes
    /// complete. Returns `Ok(true)` once the declared output length has
    /// been reached.
    pub fn push_chunk<S, W>(
        &mut self,
        chunk: &[u8],
        source: &mut S,
        sink: &mut W,
    ) -> Result<bool, DecodeError>
    where
        S: PatchSource,
        W: Write,
    {
        if self.finished {
            if chunk.is_empty() {
                return Ok(true);
            }
            return Err(DecodeError::TrailingInput);
        }

        self.input.extend_from_slice(chunk);

        if self.header.is_none() {
            match PatchHeader::parse(&self.input)? {
                Some((hdr, consumed)) => {
                    trace!("file header parsed, hdr_ind={:#04X}", hdr.hdr_ind);
                    self.header = Some(hdr);
                    self.input.drain(..consumed);
                }
                None => return Ok(false),
            }
        }

        // Decode complete windows; stop when input holds only a partial one.
        loop {
            if self.bytes_out == self.expected_len {
                if !self.input.is_empty() {
                    return Err(DecodeError::TrailingInput);
                }
                self.finished = true;
                return Ok(true);
            }

            let Some((hdr, hdr_len)) = WindowHeader::parse(&self.input)? else {
                return Ok(false);
            };

            let sections_len = hdr.sections_len();
            if sections_len > 2 * MAX_WINDOW_SIZE {
                return Err(DecodeError::Invalid(format!(
                    "section lengths total {sections_len}"
                )));
            }
            let total = hdr_len as u64 + sections_len;
            if (self.input.len() as u64) < total {
                return Ok(false);
            }

            let consumed = self.decode_window(&hdr, hdr_len, source, sink)?;
            self.input.drain(..consumed);
        }
    }

    /// Decode one fully-buffered window. Returns bytes consumed from input.
    fn decode_window<S, W>(
        &mut self,
        hdr: &WindowHeader,
        hdr_len: usize,
        source: &mut S,
        sink: &mut W,
    ) -> Result<usize, DecodeError>
    where
        S: PatchSource,
        W: Write,
    {
        let data_end = hdr_len + hdr.data_len as usize;
        let inst_end = data_end + hdr.inst_len as usize;
        let addr_end = inst_end + hdr.addr_len as usize;

        let data_sec = &self.input[hdr_len..data_end];
        let inst_sec = &self.input[data_end..inst_end];
        let addr_sec = &self.input[inst_end..addr_end];

        let mut target = Vec::with_capacity(hdr.target_window_len as usize);
        let mut cache = AddressCache::new();
        cache.init();

        let mut data_pos = 0usize;
        let mut inst_pos = 0usize;
        let mut addr_pos = 0usize;

        while inst_pos < inst_sec.len() {
            let opcode = inst_sec[inst_pos];
            inst_pos += 1;
            let entry: CodeTableEntry = self.code_table[opcode as usize];

            for (itype, isize) in [(entry.type1, entry.size1), (entry.type2, entry.size2)] {
                if itype == OP_NOOP {
                    continue;
                }

                let size = if isize != 0 {
                    isize as u32
                } else {
                    let (val, n) = varint::read_u32(&inst_sec[inst_pos..])?;
                    inst_pos += n;
                    val
                };

                if target.len() as u64 + size as u64 > hdr.target_window_len {
                    return Err(DecodeError::Invalid(format!(
                        "instruction overruns target window ({} + {size} > {})",
                        target.len(),
                        hdr.target_window_len
                    )));
                }

                match itype {
                    OP_ADD => {
                        let end = data_pos + size as usize;
                        let bytes = data_sec.get(data_pos..end).ok_or_else(|| {
                            DecodeError::Invalid("data section underflow in ADD".to_string())
                        })?;
                        target.extend_from_slice(bytes);
                        data_pos = end;
                    }
                    OP_RUN => {
                        let &byte = data_sec.get(data_pos).ok_or_else(|| {
                            DecodeError::Invalid("data section underflow in RUN".to_string())
                        })?;
                        data_pos += 1;
                        target.resize(target.len() + size as usize, byte);
                    }
                    _ => {
                        // OP_CPY + mode
                        let mode = itype - OP_CPY;
                        let here = hdr.copy_window_len + target.len() as u64;
                        let (addr, n) = cache.decode(mode, &addr_sec[addr_pos..], here)?;
                        addr_pos += n;
                        self.copy_bytes(hdr, addr, size, source, &mut target)?;
                    }
                }
            }
        }

        if target.len() as u64 != hdr.target_window_len {
            return Err(DecodeError::Invalid(format!(
                "window produced {} bytes, header declared {}",
                target.len(),
                hdr.target_window_len
            )));
        }
        if data_pos != data_sec.len() || addr_pos != addr_sec.len() {
            return Err(DecodeError::Invalid(
                "section bytes left over after last instruction".to_string(),
            ));
        }

        if let Some(expected) = hdr.adler32 {
            let actual = adler32(&target);
            if actual != expected {
                return Err(DecodeError::ChecksumMismatch { expected, actual });
            }
        }

        sink.write_all(&target)?;
        self.bytes_out += target.len() as u64;
        self.windows += 1;
        if self.bytes_out > self.expected_len {
            return Err(DecodeError::LengthMismatch {
                expected: self.expected_len,
                actual: self.bytes_out,
            });
        }
        debug!(
            "window {} decoded: {} bytes ({}/{} total)",
            self.windows,
            target.len(),
            self.bytes_out,
            self.expected_len
        );

        Ok(hdr_len + hdr.sections_len() as usize)
    }

    /// Execute one COPY. The address space is the source copy window
    /// followed by the target produced so far; a copy may start in the
    /// source and run into the target, and target copies may overlap
    /// their own output (RFC 3284 run semantics).
    fn copy_bytes<S: PatchSource>(
        &self,
        hdr: &WindowHeader,
        addr: u64,
        len: u32,
        source: &mut S,
        target: &mut Vec<u8>,
    ) -> Result<(), DecodeError> {
        let mut addr = addr;
        let mut remaining = len as u64;
        let mut scratch = [0u8; 4096];

        while remaining > 0 {
            if addr < hdr.copy_window_len {
                let src_off = hdr.copy_window_offset + addr;
                let span = remaining.min(hdr.copy_window_len - addr);
                let want = (span as usize).min(scratch.len());
                let got = source.read_at(src_off, &mut scratch[..want])?;
                if got == 0 {
                    return Err(DecodeError::Invalid(format!(
                        "copy past end of source (offset {src_off})"
                    )));
                }
                target.extend_from_slice(&scratch[..got]);
                addr += got as u64;
                remaining -= got as u64;
            } else {
                // Self-referencing target copy; byte-at-a-time so an
                // overlapping range replicates already-written output.
                let mut pos = (addr - hdr.copy_window_len) as usize;
                if pos >= target.len() {
                    return Err(DecodeError::Invalid(
                        "copy address beyond produced target".to_string(),
                    ));
                }
                for _ in 0..remaining {
                    let byte = target[pos];
                    target.push(byte);
                    pos += 1;
                }
                remaining = 0;
            }
        }

        Ok(())
    }

    /// Verify the stream ended exactly at the declared length.
    pub fn finish(&self) -> Result<(), DecodeError> {
        if self.finished && self.input.is_empty() {
            Ok(())
        } else {
            Err(DecodeError::LengthMismatch {
                expected: self.expected_len,
                actual: self.bytes_out,
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::super::encoder::encode_delta;
    use super::super::window::{VCD_ADLER32, VCD_SOURCE, VCDIFF_MAGIC};
    use super::*;

    fn decode_all(patch: &[u8], source: &[u8], expected_len: u64) -> Result<Vec<u8>, DecodeError> {
        decode_chunked(patch, source, expected_len, patch.len().max(1))
    }

    fn decode_chunked(
        patch: &[u8],
        source: &[u8],
        expected_len: u64,
        chunk_size: usize,
    ) -> Result<Vec<u8>, DecodeError> {
        let mut decoder = PatchDecoder::new(expected_len);
        let mut out = Vec::new();
        let mut src = source;
        let mut done = false;
        for chunk in patch.chunks(chunk_size) {
            done = decoder.push_chunk(chunk, &mut src, &mut out)?;
        }
        assert!(done, "stream should be complete");
        decoder.finish()?;
        Ok(out)
    }

    /// Hand-built patch: one window, ADD "hello " then COPY 5 bytes from
    /// source offset 0.
    fn handmade_patch(with_checksum: bool) -> (Vec<u8>, Vec<u8>, Vec<u8>) {
        let source = b"world!".to_vec();
        let target = b"hello world".to_vec();

        let data_sec = b"hello ".to_vec();
        let mut inst_sec = Vec::new();
        inst_sec.push(1 + 6); // ADD size=6
        inst_sec.push(19 + 5 - 3); // COPY mode 0, size=5
        let addr_sec = vec![0x00]; // address 0, VCD_SELF

        let mut win_ind = VCD_SOURCE;
        if with_checksum {
            win_ind |= VCD_ADLER32;
        }
        let hdr = WindowHeader {
            win_ind,
            copy_window_len: source.len() as u64,
            copy_window_offset: 0,
            enc_len: 0,
            target_window_len: target.len() as u64,
            del_ind: 0,
            data_len: data_sec.len() as u64,
            inst_len: inst_sec.len() as u64,
            addr_len: addr_sec.len() as u64,
            adler32: with_checksum.then(|| adler32(&target)),
        };
        let hdr = WindowHeader {
            enc_len: hdr.compute_enc_len(),
            ..hdr
        };

        let mut patch = Vec::new();
        PatchHeader { hdr_ind: 0 }.encode(&mut patch).unwrap();
        hdr.encode(&mut patch).unwrap();
        patch.extend_from_slice(&data_sec);
        patch.extend_from_slice(&inst_sec);
        patch.extend_from_slice(&addr_sec);

        (patch, source, target)
    }

    #[test]
    fn decodes_handmade_window() {
        let (patch, source, target) = handmade_patch(true);
        let out = decode_all(&patch, &source, target.len() as u64).unwrap();
        assert_eq!(out, target);
    }

    #[test]
    fn every_chunk_split_decodes_identically() {
        let (patch, source, target) = handmade_patch(true);
        for chunk_size in 1..=patch.len() {
            let out = decode_chunked(&patch, &source, target.len() as u64, chunk_size).unwrap();
            assert_eq!(out, target, "failed at chunk size {chunk_size}");
        }
    }

    #[test]
    fn checksum_mismatch_detected() {
        let (mut patch, source, target) = handmade_patch(true);
        // Corrupt a literal inside the data section (sections are laid out
        // data/inst/addr, so it sits 9 bytes from the end). The window
        // still reconstructs; the Adler-32 gate has to catch it.
        let idx = patch.len() - 9;
        assert_eq!(patch[idx], b'h');
        patch[idx] ^= 0xFF;
        let err = decode_all(&patch, &source, target.len() as u64).unwrap_err();
        assert!(matches!(err, DecodeError::ChecksumMismatch { .. }), "{err}");
    }

    #[test]
    fn bad_magic_rejected() {
        let mut decoder = PatchDecoder::new(10);
        let mut src: &[u8] = &[];
        let mut out = Vec::new();
        let err = decoder
            .push_chunk(b"NOTAPATCH", &mut src, &mut out)
            .unwrap_err();
        assert!(matches!(err, DecodeError::Header(_)));
    }

    #[test]
    fn truncated_stream_reports_not_finished() {
        let (patch, source, target) = handmade_patch(false);
        let mut decoder = PatchDecoder::new(target.len() as u64);
        let mut src = &source[..];
        let mut out = Vec::new();
        let done = decoder
            .push_chunk(&patch[..patch.len() - 3], &mut src, &mut out)
            .unwrap();
        assert!(!done);
        assert!(decoder.finish().is_err());
    }

    #[test]
    fn trailing_bytes_after_completion_rejected() {
        let (mut patch, source, target) = handmade_patch(false);
        patch.push(0xAA);
        let err = decode_all(&patch, &source, target.len() as u64).unwrap_err();
        assert!(matches!(err, DecodeError::TrailingInput));
    }

    #[test]
    fn run_instruction_expands() {
        // RUN of 20 zero bytes, no source window.
        let data_sec = vec![0u8];
        let mut inst_sec = Vec::new();
        inst_sec.push(0); // RUN, size follows
        varint::write_u32(&mut inst_sec, 20).unwrap();

        let hdr = WindowHeader {
            win_ind: 0,
            target_window_len: 20,
            data_len: 1,
            inst_len: inst_sec.len() as u64,
            addr_len: 0,
            ..Default::default()
        };
        let hdr = WindowHeader {
            enc_len: hdr.compute_enc_len(),
            ..hdr
        };

        let mut patch = Vec::new();
        patch.extend_from_slice(&VCDIFF_MAGIC);
        patch.push(0);
        hdr.encode(&mut patch).unwrap();
        patch.extend_from_slice(&data_sec);
        patch.extend_from_slice(&inst_sec);

        let out = decode_all(&patch, &[], 20).unwrap();
        assert_eq!(out, vec![0u8; 20]);
    }

    #[test]
    fn overlapping_target_copy_replicates() {
        // ADD "ab", then COPY len=6 from target start: classic overlap
        // producing "abababab".
        let data_sec = b"ab".to_vec();
        let mut inst_sec = Vec::new();
        inst_sec.push(1 + 2); // ADD size=2
        inst_sec.push(19 + 6 - 3); // COPY mode 0 size=6
        let addr_sec = vec![0x00];

        let hdr = WindowHeader {
            win_ind: 0,
            target_window_len: 8,
            data_len: 2,
            inst_len: inst_sec.len() as u64,
            addr_len: 1,
            ..Default::default()
        };
        let hdr = WindowHeader {
            enc_len: hdr.compute_enc_len(),
            ..hdr
        };

        let mut patch = Vec::new();
        patch.extend_from_slice(&VCDIFF_MAGIC);
        patch.push(0);
        hdr.encode(&mut patch).unwrap();
        patch.extend_from_slice(&data_sec);
        patch.extend_from_slice(&inst_sec);
        patch.extend_from_slice(&addr_sec);

        let out = decode_all(&patch, &[], 8).unwrap();
        assert_eq!(out, b"abababab");
    }

    #[test]
    fn encoder_decoder_roundtrip() {
        let source: Vec<u8> = (0..50_000u32).map(|i| (i % 253) as u8).collect();
        let mut target = source.clone();
        // Mutate a few regions and append a tail.
        for chunk in target.chunks_mut(7000) {
            chunk[0] ^= 0x55;
        }
        target.extend_from_slice(&[9u8; 1234]);

        let patch = encode_delta(&source, &target, 16 * 1024).unwrap();
        assert!(patch.len() < target.len(), "delta should be smaller");

        for chunk_size in [1usize, 37, 1024, 16 * 1024] {
            let out = decode_chunked(&patch, &source, target.len() as u64, chunk_size).unwrap();
            assert_eq!(out, target, "chunk size {chunk_size}");
        }
    }

    #[test]
    fn empty_target_decodes_from_header_alone() {
        let mut patch = Vec::new();
        patch.extend_from_slice(&VCDIFF_MAGIC);
        patch.push(0);
        let out = decode_all(&patch, &[], 0).unwrap();
        assert!(out.is_empty());
    }
}
