//! A64 instruction records and the classification the relocator relies on.
//!
//! Only ADR and ADRP are recognised. Every other word is opaque and copied
//! verbatim, which is only safe for encodings whose behaviour does not depend
//! on their own address.

use crate::arch::arm64::writer::Reg;

/// Every A64 instruction is one 32-bit little-endian word.
pub const INSN_LEN: usize = 4;

const ADR_MASK: u32 = 0x9F00_0000;
const ADR_BITS: u32 = 0x1000_0000;
const ADRP_BITS: u32 = 0x9000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdrKind {
    /// Byte-granular displacement from the PC.
    Adr,
    /// 4 KiB page-granular displacement from the PC.
    Adrp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsnKind {
    Unknown(u32),
    AddressRelative { kind: AdrKind, reg: Reg, raw: u32 },
}

impl InsnKind {
    pub fn raw(&self) -> u32 {
        match *self {
            InsnKind::Unknown(raw) => raw,
            InsnKind::AddressRelative { raw, .. } => raw,
        }
    }

    pub fn is_address_relative(&self) -> bool {
        matches!(self, InsnKind::AddressRelative { .. })
    }
}

/// One decoded instruction waiting in the relocation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Arm64Insn {
    /// Byte offset of the instruction within the input view.
    pub offset: usize,
    /// Address the instruction executes at in its original location.
    pub pc: u64,
    pub length: usize,
    pub kind: InsnKind,
}

/// Classify one instruction word.
///
/// The Rd of ADR/ADRP is a data operand, so field value 31 names XZR. It is
/// carried as [`Reg::SP`], the shared encoding, and re-encodes as XZR in the
/// LDR (literal) the rewrite emits.
pub fn classify(raw: u32) -> InsnKind {
    let kind = match raw & ADR_MASK {
        ADR_BITS => AdrKind::Adr,
        ADRP_BITS => AdrKind::Adrp,
        _ => return InsnKind::Unknown(raw),
    };

    InsnKind::AddressRelative {
        kind,
        reg: Reg::from_index(raw),
        raw,
    }
}

fn sign_extend(value: i64, bits: u32) -> i64 {
    let shift = 64 - bits;
    (value << shift) >> shift
}

/// Reassemble immhi:immlo into the raw 21-bit field, without sign extension.
fn decode_imm21(raw: u32) -> i64 {
    let immlo = ((raw >> 29) & 0x3) as i64;
    let immhi = ((raw >> 5) & 0x7ffff) as i64;
    (immhi << 2) | immlo
}

/// Signed displacement an ADR/ADRP adds to its base address.
pub fn adr_distance(kind: AdrKind, raw: u32) -> i64 {
    let imm = decode_imm21(raw);
    match kind {
        AdrKind::Adr => sign_extend(imm, 21),
        // Shift first, then extend from bit 32 of the 33-bit page offset.
        AdrKind::Adrp => sign_extend(imm << 12, 33),
    }
}

/// Worst-case bytes the rewrite engine emits for one record.
pub fn estimated_size(kind: &InsnKind) -> usize {
    match kind {
        InsnKind::Unknown(_) => INSN_LEN,
        // LDR Xd, [PC, #8]; B +12; .quad target
        InsnKind::AddressRelative { .. } => 16,
    }
}
