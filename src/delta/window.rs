// VCDIFF file header and per-window header (RFC 3284).
//
// Parsing is slice-based and resumable: a header truncated by a frame
// boundary yields `Ok(None)` (wait for more input) rather than an error,
// which lets the patch decoder restart the parse once the next frame
// arrives. The encode side is used by the companion-host sender.

use std::io::{self, Write};

use super::varint::{self, VarIntError};

// ---------------------------------------------------------------------------
// Magic and indicator bits
// ---------------------------------------------------------------------------

pub const VCDIFF_MAGIC: [u8; 4] = [0xD6, 0xC3, 0xC4, 0x00];

// Header indicator flags (hdr_ind).
pub const VCD_SECONDARY: u8 = 1 << 0;
pub const VCD_CODETABLE: u8 = 1 << 1;
pub const VCD_APPHEADER: u8 = 1 << 2;
/// Mask for invalid header indicator bits.
pub const VCD_INVHDR: u8 = !0x07;

// Window indicator flags (win_ind).
pub const VCD_SOURCE: u8 = 1 << 0;
pub const VCD_TARGET: u8 = 1 << 1;
pub const VCD_ADLER32: u8 = 1 << 2;
/// Mask for invalid window indicator bits.
pub const VCD_INVWIN: u8 = !0x07;

/// Mask for invalid delta indicator bits (secondary compression flags).
pub const VCD_INVDEL: u8 = !0x07;

/// Maximum decoded window size. Deliberately far below xdelta3's 16 MiB
/// hard max: a hostile header must not balloon memory on a handheld.
pub const MAX_WINDOW_SIZE: u64 = 1 << 20; // 1 MiB

// ---------------------------------------------------------------------------
// Header error
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum HeaderError {
    Invalid(String),
    Unsupported(String),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Invalid(msg) => write!(f, "invalid header: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
        }
    }
}

impl std::error::Error for HeaderError {}

// ---------------------------------------------------------------------------
// Slice cursor
// ---------------------------------------------------------------------------

/// Resumable parse cursor: `None` propagates "need more input".
struct SliceCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> SliceCursor<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn byte(&mut self) -> Option<u8> {
        let b = *self.data.get(self.pos)?;
        self.pos += 1;
        Some(b)
    }

    fn bytes(&mut self, n: usize) -> Option<&'a [u8]> {
        let end = self.pos.checked_add(n)?;
        let s = self.data.get(self.pos..end)?;
        self.pos = end;
        Some(s)
    }

    fn varint(&mut self) -> Result<Option<u64>, HeaderError> {
        match varint::read_u64(&self.data[self.pos..]) {
            Ok((val, consumed)) => {
                self.pos += consumed;
                Ok(Some(val))
            }
            Err(VarIntError::Underflow) => Ok(None),
            Err(VarIntError::Overflow) => Err(HeaderError::Invalid("varint overflow".into())),
        }
    }
}

// ---------------------------------------------------------------------------
// File header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF file header.
///
/// This receiver supports only the plain profile: default code table, no
/// secondary compression. An application header is accepted and skipped.
#[derive(Debug, Clone, Default)]
pub struct PatchHeader {
    pub hdr_ind: u8,
}

impl PatchHeader {
    /// Parse from the start of `data`.
    ///
    /// Returns `Ok(Some((header, consumed)))`, or `Ok(None)` when `data` is
    /// a valid but incomplete prefix.
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, HeaderError> {
        let mut cur = SliceCursor::new(data);

        let Some(magic) = cur.bytes(4) else {
            return Ok(None);
        };
        if magic[..3] != VCDIFF_MAGIC[..3] {
            return Err(HeaderError::Invalid(format!(
                "bad VCDIFF magic: {:02X} {:02X} {:02X}",
                magic[0], magic[1], magic[2]
            )));
        }
        if magic[3] != 0x00 {
            return Err(HeaderError::Unsupported(format!(
                "VCDIFF version {:#04X}",
                magic[3]
            )));
        }

        let Some(hdr_ind) = cur.byte() else {
            return Ok(None);
        };
        if hdr_ind & VCD_INVHDR != 0 {
            return Err(HeaderError::Invalid(format!(
                "header indicator bits {hdr_ind:#04X}"
            )));
        }
        if hdr_ind & VCD_SECONDARY != 0 {
            return Err(HeaderError::Unsupported(
                "secondary compression".to_string(),
            ));
        }
        if hdr_ind & VCD_CODETABLE != 0 {
            return Err(HeaderError::Unsupported("custom code table".to_string()));
        }

        if hdr_ind & VCD_APPHEADER != 0 {
            let Some(len) = cur.varint()? else {
                return Ok(None);
            };
            if cur.bytes(len as usize).is_none() {
                return Ok(None);
            }
        }

        Ok(Some((Self { hdr_ind }, cur.pos)))
    }

    /// Encode the file header (host side).
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&VCDIFF_MAGIC)?;
        w.write_all(&[self.hdr_ind])
    }
}

// ---------------------------------------------------------------------------
// Per-window header
// ---------------------------------------------------------------------------

/// Parsed VCDIFF per-window header.
#[derive(Debug, Clone, Default)]
pub struct WindowHeader {
    /// Window indicator byte.
    pub win_ind: u8,
    /// Length of the source copy window.
    pub copy_window_len: u64,
    /// Offset into the source for the copy window.
    pub copy_window_offset: u64,
    /// Total length of the delta encoding (redundancy check field).
    pub enc_len: u64,
    /// Length of the target window to reconstruct.
    pub target_window_len: u64,
    /// Delta indicator; must be zero (no secondary compression).
    pub del_ind: u8,
    /// Section lengths.
    pub data_len: u64,
    pub inst_len: u64,
    pub addr_len: u64,
    /// Adler-32 of the target window (if VCD_ADLER32).
    pub adler32: Option<u32>,
}

impl WindowHeader {
    #[inline]
    pub fn has_source(&self) -> bool {
        self.win_ind & VCD_SOURCE != 0
    }

    #[inline]
    pub fn has_checksum(&self) -> bool {
        self.win_ind & VCD_ADLER32 != 0
    }

    /// Total byte length of the three sections.
    #[inline]
    pub fn sections_len(&self) -> u64 {
        self.data_len + self.inst_len + self.addr_len
    }

    /// Parse a window header from the start of `data`.
    ///
    /// `Ok(None)` means the input is an incomplete prefix; retry with more
    /// bytes. End-of-stream detection is the caller's job (an empty slice
    /// also returns `None`).
    pub fn parse(data: &[u8]) -> Result<Option<(Self, usize)>, HeaderError> {
        let mut cur = SliceCursor::new(data);

        let Some(win_ind) = cur.byte() else {
            return Ok(None);
        };
        if win_ind & VCD_INVWIN != 0 {
            return Err(HeaderError::Invalid(format!(
                "window indicator bits {win_ind:#04X}"
            )));
        }
        if win_ind & VCD_TARGET != 0 {
            // Copies from earlier target windows would require keeping the
            // whole reconstructed output resident.
            return Err(HeaderError::Unsupported("VCD_TARGET windows".to_string()));
        }

        let (copy_window_len, copy_window_offset) = if win_ind & VCD_SOURCE != 0 {
            let Some(len) = cur.varint()? else {
                return Ok(None);
            };
            let Some(off) = cur.varint()? else {
                return Ok(None);
            };
            (len, off)
        } else {
            (0, 0)
        };

        let Some(enc_len) = cur.varint()? else {
            return Ok(None);
        };
        let Some(target_window_len) = cur.varint()? else {
            return Ok(None);
        };
        if target_window_len > MAX_WINDOW_SIZE {
            return Err(HeaderError::Invalid(format!(
                "target window {target_window_len} exceeds max {MAX_WINDOW_SIZE}"
            )));
        }

        let Some(del_ind) = cur.byte() else {
            return Ok(None);
        };
        if del_ind & VCD_INVDEL != 0 {
            return Err(HeaderError::Invalid(format!(
                "delta indicator bits {del_ind:#04X}"
            )));
        }
        if del_ind != 0 {
            return Err(HeaderError::Unsupported(
                "secondary-compressed sections".to_string(),
            ));
        }

        let Some(data_len) = cur.varint()? else {
            return Ok(None);
        };
        let Some(inst_len) = cur.varint()? else {
            return Ok(None);
        };
        let Some(addr_len) = cur.varint()? else {
            return Ok(None);
        };

        let adler32 = if win_ind & VCD_ADLER32 != 0 {
            let Some(raw) = cur.bytes(4) else {
                return Ok(None);
            };
            Some(u32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]))
        } else {
            None
        };

        let hdr = WindowHeader {
            win_ind,
            copy_window_len,
            copy_window_offset,
            enc_len,
            target_window_len,
            del_ind,
            data_len,
            inst_len,
            addr_len,
            adler32,
        };

        // Redundancy check.
        let expected = hdr.compute_enc_len();
        if enc_len != expected {
            return Err(HeaderError::Invalid(format!(
                "enc_len mismatch: header says {enc_len}, computed {expected}"
            )));
        }

        Ok(Some((hdr, cur.pos)))
    }

    /// Compute the expected `enc_len` from the current field values.
    pub fn compute_enc_len(&self) -> u64 {
        let mut len = 0u64;
        len += varint::sizeof_u64(self.target_window_len) as u64;
        len += 1; // del_ind
        len += varint::sizeof_u64(self.data_len) as u64;
        len += varint::sizeof_u64(self.inst_len) as u64;
        len += varint::sizeof_u64(self.addr_len) as u64;
        len += self.sections_len();
        if self.has_checksum() {
            len += 4;
        }
        len
    }

    /// Encode a per-window header (host side).
    pub fn encode<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&[self.win_ind])?;

        if self.has_source() {
            varint::write_u64(w, self.copy_window_len)?;
            varint::write_u64(w, self.copy_window_offset)?;
        }

        varint::write_u64(w, self.enc_len)?;
        varint::write_u64(w, self.target_window_len)?;
        w.write_all(&[self.del_ind])?;
        varint::write_u64(w, self.data_len)?;
        varint::write_u64(w, self.inst_len)?;
        varint::write_u64(w, self.addr_len)?;

        if self.has_checksum()
            && let Some(cksum) = self.adler32
        {
            w.write_all(&cksum.to_be_bytes())?;
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
