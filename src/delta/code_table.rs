// VCDIFF default code table (RFC 3284, Section 5.6).
//
// The patch streams this crate consumes use only the default table; the
// generated table has exactly 256 entries. Instruction types follow the
// RFC: NOOP, ADD, RUN, and COPY with the address mode folded into the type.

/// Instruction type constants. COPY modes are `OP_CPY + mode` (0..9 for the
/// default table).
pub const OP_NOOP: u8 = 0;
pub const OP_ADD: u8 = 1;
pub const OP_RUN: u8 = 2;
pub const OP_CPY: u8 = 3;

/// Minimum match length for COPY instructions (RFC 3284).
pub const MIN_MATCH: u8 = 4;

/// A single entry in the 256-element code table.
///
/// Each opcode encodes one or two instructions. When `type2 == OP_NOOP` the
/// opcode is a single instruction. When a size field is 0, the actual size
/// follows as a varint in the instruction section.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CodeTableEntry {
    pub type1: u8,
    pub size1: u8,
    pub type2: u8,
    pub size2: u8,
}

/// The complete 256-entry code table.
pub type CodeTable = [CodeTableEntry; 256];

/// Build the default RFC 3284 code table.
pub fn build_default_code_table() -> CodeTable {
    let mut tbl = [CodeTableEntry::default(); 256];
    let mut idx: usize = 0;

    // Default-table descriptor constants.
    const ADD_SIZES: u8 = 17;
    const NEAR_MODES: usize = 4;
    const SAME_MODES: usize = 3;
    const CPY_SIZES: u8 = 15;
    const ADDCOPY_ADD_MAX: u8 = 4;
    const ADDCOPY_NEAR_CPY_MAX: u8 = 6;
    const ADDCOPY_SAME_CPY_MAX: u8 = 4;
    const COPYADD_ADD_MAX: u8 = 1;
    const COPYADD_NEAR_CPY_MAX: u8 = 4;
    const COPYADD_SAME_CPY_MAX: u8 = 4;
    const CPY_MODES: usize = 2 + NEAR_MODES + SAME_MODES; // 9

    // Index 0: RUN size=0
    tbl[idx] = CodeTableEntry {
        type1: OP_RUN,
        size1: 0,
        type2: OP_NOOP,
        size2: 0,
    };
    idx += 1;

    // Index 1: ADD size=0
    tbl[idx] = CodeTableEntry {
        type1: OP_ADD,
        size1: 0,
        type2: OP_NOOP,
        size2: 0,
    };
    idx += 1;

    // Indices 2..18: ADD size=1..17
    for size1 in 1..=ADD_SIZES {
        tbl[idx] = CodeTableEntry {
            type1: OP_ADD,
            size1,
            type2: OP_NOOP,
            size2: 0,
        };
        idx += 1;
    }

    // COPY instructions: for each mode, size=0 then sizes 4..18.
    for mode in 0..CPY_MODES as u8 {
        tbl[idx] = CodeTableEntry {
            type1: OP_CPY + mode,
            size1: 0,
            type2: OP_NOOP,
            size2: 0,
        };
        idx += 1;

        for size1 in MIN_MATCH..MIN_MATCH + CPY_SIZES {
            tbl[idx] = CodeTableEntry {
                type1: OP_CPY + mode,
                size1,
                type2: OP_NOOP,
                size2: 0,
            };
            idx += 1;
        }
    }

    // ADD+COPY double instructions.
    for mode in 0..CPY_MODES as u8 {
        let near_limit = 2 + NEAR_MODES as u8;
        let cpy_max = if mode < near_limit {
            ADDCOPY_NEAR_CPY_MAX
        } else {
            ADDCOPY_SAME_CPY_MAX
        };

        for add_size in 1..=ADDCOPY_ADD_MAX {
            for cpy_size in MIN_MATCH..=cpy_max {
                tbl[idx] = CodeTableEntry {
                    type1: OP_ADD,
                    size1: add_size,
                    type2: OP_CPY + mode,
                    size2: cpy_size,
                };
                idx += 1;
            }
        }
    }

    // COPY+ADD double instructions.
    for mode in 0..CPY_MODES as u8 {
        let near_limit = 2 + NEAR_MODES as u8;
        let cpy_max = if mode < near_limit {
            COPYADD_NEAR_CPY_MAX
        } else {
            COPYADD_SAME_CPY_MAX
        };

        for cpy_size in MIN_MATCH..=cpy_max {
            for add_size in 1..=COPYADD_ADD_MAX {
                tbl[idx] = CodeTableEntry {
                    type1: OP_CPY + mode,
                    size1: cpy_size,
                    type2: OP_ADD,
                    size2: add_size,
                };
                idx += 1;
            }
        }
    }

    debug_assert_eq!(idx, 256, "code table must have exactly 256 entries");
    tbl
}

/// Return a reference to the lazily-initialized default code table.
pub fn default_code_table() -> &'static CodeTable {
    use std::sync::LazyLock;
    static TABLE: LazyLock<CodeTable> = LazyLock::new(build_default_code_table);
    &TABLE
}

// ---------------------------------------------------------------------------
// Instruction chooser (encoder side)
// ---------------------------------------------------------------------------

/// Result of `choose_instruction`: the single-instruction opcode and an
/// optional double opcode that merges the *previous* instruction with this
/// one.
#[derive(Debug, Clone, Copy)]
pub struct ChosenInstruction {
    pub code1: u8,
    pub code2: Option<u8>,
}

/// Instruction descriptor passed to `choose_instruction`.
#[derive(Debug, Clone, Copy)]
pub struct InstructionInfo {
    /// OP_ADD, OP_RUN, or OP_CPY + mode.
    pub itype: u8,
    /// Instruction size.
    pub size: u32,
}

/// Choose opcode(s) for an instruction, potentially forming a double
/// instruction with `prev` (the previously queued instruction).
pub fn choose_instruction(
    prev: Option<&InstructionInfo>,
    inst: &InstructionInfo,
) -> ChosenInstruction {
    match inst.itype {
        OP_RUN => ChosenInstruction {
            code1: 0,
            code2: None,
        },

        OP_ADD => {
            let mut code1 = 1u8;
            let mut code2 = None;

            if inst.size <= 17 {
                code1 += inst.size as u8; // codes 2..18

                if inst.size == 1
                    && let Some(prev) = prev
                    && prev.size == 4
                    && prev.itype >= OP_CPY
                {
                    // COPY(4,mode)+ADD(1) double
                    code2 = Some(247 + (prev.itype - OP_CPY));
                }
            }

            ChosenInstruction { code1, code2 }
        }

        _ => {
            // OP_CPY + mode
            let mode = inst.itype - OP_CPY;
            let mut code1 = 19 + 16 * mode; // base for this mode, size=0
            let mut code2 = None;

            if inst.size >= 4 && inst.size <= 18 {
                code1 += (inst.size as u8) - 3; // size 4 -> +1, ... size 18 -> +15

                if let Some(prev) = prev
                    && prev.itype == OP_ADD
                    && prev.size <= 4
                {
                    if inst.size <= 6 && mode <= 5 {
                        // ADD(1..4)+COPY(4..6) for modes 0..5
                        code2 = Some(
                            163 + (mode * 12)
                                + (3 * ((prev.size as u8) - 1))
                                + ((inst.size as u8) - 4),
                        );
                    } else if inst.size == 4 && mode >= 6 {
                        // ADD(1..4)+COPY(4) for modes 6..8
                        code2 = Some(235 + ((mode - 6) * 4) + ((prev.size as u8) - 1));
                    }
                }
            }

            ChosenInstruction { code1, code2 }
        }
    }
}

// ---------------------------------------------------------------------------
// High-level instruction type
// ---------------------------------------------------------------------------

/// Decoded delta instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Append `len` literal bytes from the data section.
    Add { len: u32 },
    /// Repeat one data-section byte `len` times.
    Run { len: u32 },
    /// Copy `len` bytes from the combined source/target address space.
    Copy { len: u32, addr: u64, mode: u8 },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
