// VCDIFF address cache (RFC 3284, Section 5.3).
//
// NEAR and SAME caches used to compactly encode COPY addresses. The cache
// is reset at every window boundary; encoder and decoder share the update
// rule so both sides stay in lockstep.

use super::varint;

/// Absolute address.
pub const VCD_SELF: u8 = 0;
/// Address relative to "here" (current position in address space).
pub const VCD_HERE: u8 = 1;

// ---------------------------------------------------------------------------
// Address cache
// ---------------------------------------------------------------------------

/// NEAR/SAME address cache.
///
/// Default configuration (s_near=4, s_same=3) gives 9 address modes:
///   0      VCD_SELF  — absolute
///   1      VCD_HERE  — here - value
///   2..5   NEAR      — near\[mode-2\] + value
///   6..8   SAME      — same\[(mode-6)*256 + byte\]
#[derive(Clone)]
pub struct AddressCache {
    s_near: usize,
    s_same: usize,
    near: Vec<u64>,
    same: Vec<u64>,
    next_slot: usize,
}

impl AddressCache {
    /// Default RFC 3284 cache: s_near=4, s_same=3.
    pub fn new() -> Self {
        Self {
            s_near: 4,
            s_same: 3,
            near: vec![0; 4],
            same: vec![0; 3 * 256],
            next_slot: 0,
        }
    }

    /// Reset cache state to initial (all zeros).
    /// Called at the start of each window.
    pub fn init(&mut self) {
        self.near.fill(0);
        self.same.fill(0);
        self.next_slot = 0;
    }

    /// The first SAME mode index (2 + s_near).
    #[inline]
    fn same_start(&self) -> usize {
        2 + self.s_near
    }

    /// Update the cache after encoding or decoding an address.
    #[inline]
    pub fn update(&mut self, addr: u64) {
        if self.s_near > 0 {
            self.near[self.next_slot] = addr;
            self.next_slot = (self.next_slot + 1) % self.s_near;
        }
        if self.s_same > 0 {
            let idx = addr as usize % (self.s_same * 256);
            self.same[idx] = addr;
        }
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encode an address, selecting the best mode.
    ///
    /// Returns `(mode, encoded_bytes)`. For SELF/HERE/NEAR modes the encoded
    /// bytes are a varint; for SAME modes a single raw byte. `here` is the
    /// current cumulative position in the combined address space (source
    /// window length + target bytes emitted so far).
    pub fn encode(&mut self, addr: u64, here: u64) -> (u8, EncodedAddr) {
        debug_assert!(addr < here);

        let mut best_d = addr;
        let mut best_m: u8 = VCD_SELF;

        // Early exit once a candidate fits a single varint byte; later
        // candidates cannot encode shorter.
        macro_rules! smallest_int {
            ($d:expr) => {
                if $d <= 127 {
                    best_d = $d;
                    let r = self.emit_non_same(best_d, best_m);
                    self.update(addr);
                    return r;
                }
            };
        }

        smallest_int!(best_d);

        // VCD_HERE
        let d = here - addr;
        if d < best_d {
            best_d = d;
            best_m = VCD_HERE;
            smallest_int!(best_d);
        }

        // NEAR modes
        for i in 0..self.s_near {
            if addr >= self.near[i] {
                let d = addr - self.near[i];
                if d < best_d {
                    best_d = d;
                    best_m = (i as u8) + 2;
                    smallest_int!(best_d);
                }
            }
        }

        // SAME mode
        if self.s_same > 0 {
            let d_idx = addr as usize % (self.s_same * 256);
            if self.same[d_idx] == addr {
                let byte_val = (d_idx % 256) as u8;
                let mode = (self.same_start() + d_idx / 256) as u8;
                self.update(addr);
                return (mode, EncodedAddr::SameByte(byte_val));
            }
        }

        let r = self.emit_non_same(best_d, best_m);
        self.update(addr);
        r
    }

    fn emit_non_same(&self, val: u64, mode: u8) -> (u8, EncodedAddr) {
        let mut buf = [0u8; varint::MAX_VARINT_LEN];
        let len = varint::encode_u64(val, &mut buf);
        let mut out = [0u8; varint::MAX_VARINT_LEN];
        out[..len].copy_from_slice(&buf[varint::MAX_VARINT_LEN - len..]);
        (mode, EncodedAddr::VarInt { bytes: out, len })
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Decode an address given the mode and the address section data.
    ///
    /// Returns `(address, bytes_consumed)` or an error.
    pub fn decode(
        &mut self,
        mode: u8,
        addr_data: &[u8],
        here: u64,
    ) -> Result<(u64, usize), AddressCacheError> {
        let mode = mode as usize;
        let same_start = self.same_start();

        let (addr, consumed) = if mode < same_start {
            // SELF, HERE, or NEAR: read a varint.
            let (raw, consumed) =
                varint::read_u64(addr_data).map_err(|_| AddressCacheError::AddrUnderflow)?;

            let addr = match mode {
                0 => raw, // VCD_SELF
                1 => here
                    .checked_sub(raw)
                    .ok_or(AddressCacheError::InvalidAddr)?, // VCD_HERE
                _ => self.near[mode - 2]
                    .checked_add(raw)
                    .ok_or(AddressCacheError::InvalidAddr)?, // NEAR
            };
            (addr, consumed)
        } else {
            // SAME mode: read a single raw byte.
            if addr_data.is_empty() {
                return Err(AddressCacheError::AddrUnderflow);
            }
            let slot = mode - same_start;
            let byte = addr_data[0] as usize;
            let addr = self.same[slot * 256 + byte];
            (addr, 1)
        };

        // Addresses always refer to already-materialized bytes.
        if addr >= here {
            return Err(AddressCacheError::InvalidAddr);
        }

        self.update(addr);
        Ok((addr, consumed))
    }
}

impl Default for AddressCache {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Encoded address bytes
// ---------------------------------------------------------------------------

/// Encoded COPY address for the address section.
#[derive(Debug, Clone, Copy)]
pub enum EncodedAddr {
    VarInt {
        bytes: [u8; varint::MAX_VARINT_LEN],
        len: usize,
    },
    SameByte(u8),
}

impl EncodedAddr {
    /// Append the encoded bytes to the address section.
    pub fn write_to(&self, out: &mut Vec<u8>) {
        match *self {
            EncodedAddr::VarInt { bytes, len } => out.extend_from_slice(&bytes[..len]),
            EncodedAddr::SameByte(b) => out.push(b),
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressCacheError {
    /// Address section exhausted mid-value.
    AddrUnderflow,
    /// Decoded address is outside the valid address space.
    InvalidAddr,
}

impl std::fmt::Display for AddressCacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AddrUnderflow => write!(f, "address section underflow"),
            Self::InvalidAddr => write!(f, "invalid copy address"),
        }
    }
}

impl std::error::Error for AddressCacheError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
