// VCDIFF encoder (host side).
//
// `WindowEncoder` assembles one window's three sections, packing adjacent
// instructions into double opcodes where the default code table allows.
// `encode_delta` is the greedy block matcher the companion sender uses:
// it indexes the source in fixed-size grains and emits COPY for every
// grain-aligned match, ADD for everything else.

use std::collections::HashMap;
use std::io::{self, Write};

use log::debug;

use super::address_cache::AddressCache;
use super::code_table::{InstructionInfo, OP_ADD, OP_CPY, OP_RUN, choose_instruction};
use super::source::adler32;
use super::varint;
use super::window::{
    MAX_WINDOW_SIZE, PatchHeader, VCD_ADLER32, VCD_SOURCE, WindowHeader,
};

// ---------------------------------------------------------------------------
// Window encoder
// ---------------------------------------------------------------------------

/// Builds the data, instruction, and address sections for one window.
pub struct WindowEncoder {
    copy_window_len: u64,
    copy_window_offset: u64,
    data: Vec<u8>,
    inst: Vec<u8>,
    addr: Vec<u8>,
    cache: AddressCache,
    target_len: u64,
    /// Last queued instruction, held back for double-opcode packing.
    pending: Option<InstructionInfo>,
}

impl WindowEncoder {
    pub fn new(copy_window_len: u64, copy_window_offset: u64) -> Self {
        Self {
            copy_window_len,
            copy_window_offset,
            data: Vec::new(),
            inst: Vec::new(),
            addr: Vec::new(),
            cache: AddressCache::new(),
            target_len: 0,
            pending: None,
        }
    }

    /// Queue an ADD of literal bytes.
    pub fn add(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.data.extend_from_slice(bytes);
        self.push_instruction(InstructionInfo {
            itype: OP_ADD,
            size: bytes.len() as u32,
        });
        self.target_len += bytes.len() as u64;
    }

    /// Queue a RUN of `len` repetitions of `byte`.
    pub fn run(&mut self, byte: u8, len: u32) {
        if len == 0 {
            return;
        }
        self.data.push(byte);
        self.push_instruction(InstructionInfo {
            itype: OP_RUN,
            size: len,
        });
        self.target_len += u64::from(len);
    }

    /// Queue a COPY of `len` bytes at `addr` in the combined address space
    /// (source copy window, then target produced so far). The address mode
    /// is chosen automatically.
    pub fn copy(&mut self, addr: u64, len: u32) {
        if len == 0 {
            return;
        }
        let here = self.copy_window_len + self.target_len;
        let (mode, encoded) = self.cache.encode(addr, here);
        encoded.write_to(&mut self.addr);
        self.push_instruction(InstructionInfo {
            itype: OP_CPY + mode,
            size: len,
        });
        self.target_len += u64::from(len);
    }

    fn push_instruction(&mut self, inst: InstructionInfo) {
        let chosen = choose_instruction(self.pending.as_ref(), &inst);
        if let Some(code2) = chosen.code2 {
            // Both halves have table-embedded sizes.
            self.inst.push(code2);
            self.pending = None;
        } else {
            if let Some(prev) = self.pending.take() {
                self.emit_single(&prev);
            }
            self.pending = Some(inst);
        }
    }

    /// Emit one instruction as a single opcode, with the size as a varint
    /// when the opcode leaves it open.
    fn emit_single(&mut self, inst: &InstructionInfo) {
        let chosen = choose_instruction(None, inst);
        self.inst.push(chosen.code1);

        let size_embedded = match inst.itype {
            OP_RUN => false,
            OP_ADD => inst.size <= 17,
            _ => (4..=18).contains(&inst.size),
        };
        if !size_embedded {
            // Section buffers are Vecs; the write cannot fail.
            let _ = varint::write_u32(&mut self.inst, inst.size);
        }
    }

    /// Finish the window: flush the pending instruction, build the header,
    /// and append header plus sections to `out`. `target_window` is the
    /// reconstructed window content, used for the embedded checksum.
    pub fn finish<W: Write>(mut self, target_window: &[u8], w: &mut W) -> io::Result<()> {
        if let Some(prev) = self.pending.take() {
            self.emit_single(&prev);
        }
        debug_assert_eq!(self.target_len, target_window.len() as u64);

        let mut win_ind = VCD_ADLER32;
        if self.copy_window_len > 0 {
            win_ind |= VCD_SOURCE;
        }
        let hdr = WindowHeader {
            win_ind,
            copy_window_len: self.copy_window_len,
            copy_window_offset: self.copy_window_offset,
            enc_len: 0,
            target_window_len: self.target_len,
            del_ind: 0,
            data_len: self.data.len() as u64,
            inst_len: self.inst.len() as u64,
            addr_len: self.addr.len() as u64,
            adler32: Some(adler32(target_window)),
        };
        let hdr = WindowHeader {
            enc_len: hdr.compute_enc_len(),
            ..hdr
        };

        hdr.encode(w)?;
        w.write_all(&self.data)?;
        w.write_all(&self.inst)?;
        w.write_all(&self.addr)
    }
}

// ---------------------------------------------------------------------------
// Greedy block matcher
// ---------------------------------------------------------------------------

/// Grain size for source indexing. Matches shorter than this are emitted
/// as literals.
const GRAIN: usize = 16;

/// Encode `target` against `source` as a complete VCDIFF stream.
///
/// `window_size` caps the bytes reconstructed per window; it must not
/// exceed [`MAX_WINDOW_SIZE`].
pub fn encode_delta(source: &[u8], target: &[u8], window_size: usize) -> io::Result<Vec<u8>> {
    let window_size = window_size.min(MAX_WINDOW_SIZE as usize).max(GRAIN);

    // Index every grain-aligned source block. Last writer wins, which
    // biases matches toward later occurrences; harmless for correctness.
    let mut index: HashMap<&[u8], usize> = HashMap::new();
    let mut off = 0;
    while off + GRAIN <= source.len() {
        index.insert(&source[off..off + GRAIN], off);
        off += GRAIN;
    }

    let mut out = Vec::new();
    PatchHeader { hdr_ind: 0 }.encode(&mut out)?;

    for window in target.chunks(window_size) {
        let mut enc = WindowEncoder::new(source.len() as u64, 0);

        let mut pos = 0usize;
        let mut lit_start = 0usize;
        while pos + GRAIN <= window.len() {
            if let Some(&src_off) = index.get(&window[pos..pos + GRAIN]) {
                // Extend the match forward past the grain.
                let mut match_len = GRAIN;
                while pos + match_len < window.len()
                    && src_off + match_len < source.len()
                    && window[pos + match_len] == source[src_off + match_len]
                {
                    match_len += 1;
                }

                enc.add(&window[lit_start..pos]);
                enc.copy(src_off as u64, match_len as u32);
                pos += match_len;
                lit_start = pos;
            } else {
                pos += 1;
            }
        }
        enc.add(&window[lit_start..]);

        enc.finish(window, &mut out)?;
    }

    debug!(
        "encoded {} target bytes against {} source bytes into {} patch bytes",
        target.len(),
        source.len(),
        out.len()
    );
    Ok(out)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
