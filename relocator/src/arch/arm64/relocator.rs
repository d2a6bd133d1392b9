use log::{debug, trace};

use crate::arch::arm64::insn::{
    adr_distance, classify, estimated_size, AdrKind, Arm64Insn, InsnKind, INSN_LEN,
};
use crate::arch::arm64::window::InsnWindow;
use crate::arch::arm64::writer::{Arm64Writer, CodeBackend, Reg};
use crate::code::input::InputCode;
use crate::config::RelocatorConfig;
use crate::types::RelocateError;

/// Streams instructions out of an input view and writes them, rewritten where
/// they depend on their own address, to a code backend.
///
/// Reads and writes are decoupled by an [`InsnWindow`]: `read_one` decodes
/// ahead, `skip_one`/`write_one` consume in order. A relocator is bound to one
/// input and one output at a time; `reset` rebinds it and keeps the window
/// storage.
pub struct Arm64Relocator<'a, W: CodeBackend + ?Sized> {
    input: InputCode<'a>,
    input_cur: usize,
    input_pc: u64,
    output: &'a mut W,
    window: InsnWindow,
    align_adrp_page: bool,
    eob: bool,
    eoi: bool,
}

impl<'a, W: CodeBackend + ?Sized> Arm64Relocator<'a, W> {
    pub fn new(input: InputCode<'a>, output: &'a mut W) -> Self {
        Self::with_config(input, output, &RelocatorConfig::default())
    }

    pub fn with_config(input: InputCode<'a>, output: &'a mut W, config: &RelocatorConfig) -> Self {
        Self {
            input,
            input_cur: 0,
            input_pc: input.pc(),
            output,
            window: InsnWindow::with_capacity(config.window_capacity.max(1)),
            align_adrp_page: config.align_adrp_page,
            eob: false,
            eoi: false,
        }
    }

    pub fn reset(&mut self, input: InputCode<'a>, output: &'a mut W) {
        self.input = input;
        self.input_cur = 0;
        self.input_pc = input.pc();
        self.output = output;
        self.window.clear();
        self.eob = false;
        self.eoi = false;
    }

    /// Bytes consumed from the input since it was bound.
    pub fn input_pos(&self) -> usize {
        self.input_cur
    }

    pub fn read_count(&self) -> usize {
        self.window.read_count()
    }

    pub fn write_count(&self) -> usize {
        self.window.write_count()
    }

    pub fn window_capacity(&self) -> usize {
        self.window.capacity()
    }

    pub fn eob(&self) -> bool {
        self.eob
    }

    pub fn eoi(&self) -> bool {
        self.eoi
    }

    pub fn set_eob(&mut self, eob: bool) {
        self.eob = eob;
    }

    pub fn set_eoi(&mut self, eoi: bool) {
        self.eoi = eoi;
    }

    /// Decode the next instruction into the window.
    ///
    /// Returns the total number of input bytes consumed so far, or 0 once the
    /// input is exhausted (end-of-instructions set, or less than one
    /// instruction left in the view).
    pub fn read_one(&mut self) -> usize {
        if self.eoi {
            return 0;
        }

        let Some(raw) = self.input.read_u32_le(self.input_cur) else {
            trace!("end of input at {:#x} after {} bytes", self.input_pc, self.input_cur);
            self.eoi = true;
            return 0;
        };

        let insn = Arm64Insn {
            offset: self.input_cur,
            pc: self.input_pc,
            length: INSN_LEN,
            kind: classify(raw),
        };
        trace!("read {:#010x} at {:#x}: {:?}", raw, insn.pc, insn.kind);

        self.window.push(insn);

        self.input_cur += insn.length;
        self.input_pc = self.input_pc.wrapping_add(insn.length as u64);

        self.input_cur
    }

    /// Oldest instruction read but not yet skipped or written.
    pub fn peek_next_write_insn(&self) -> Option<&Arm64Insn> {
        self.window.peek()
    }

    /// Drop the next pending instruction without emitting anything.
    ///
    /// Panics if nothing is pending.
    pub fn skip_one(&mut self) {
        let insn = self.window.advance();
        trace!("skipped {:#010x} at {:#x}", insn.kind.raw(), insn.pc);
    }

    /// Write the next pending instruction. Returns `false` only when the
    /// window is empty.
    pub fn write_one(&mut self) -> bool {
        let Some(insn) = self.window.take_next() else {
            return false;
        };

        let rewritten = match insn.kind {
            InsnKind::AddressRelative { kind, reg, raw } => {
                self.rewrite_adr(&insn, kind, reg, raw);
                true
            }
            InsnKind::Unknown(_) => false,
        };

        if !rewritten {
            self.output.put_bytes(self.input.slice(insn.offset, insn.length));
        }

        true
    }

    /// Write every pending instruction. Panics if there was nothing to write.
    pub fn write_all(&mut self) {
        let mut count = 0usize;
        while self.write_one() {
            count += 1;
        }
        assert!(count > 0, "write_all drained no instructions");
        assert_eq!(self.window.write_count(), self.window.read_count());
    }

    /// Upper bound on the bytes `write_all` would emit right now.
    pub fn estimated_output_size(&self) -> usize {
        self.window
            .pending_iter()
            .map(|insn| estimated_size(&insn.kind))
            .sum()
    }

    /// Read whole instructions until at least `min_bytes` have been consumed.
    /// Returns the consumed count, or `None` if the input ran out first.
    pub fn read_at_least(&mut self, min_bytes: usize) -> Option<usize> {
        loop {
            let reloc_bytes = self.read_one();
            if reloc_bytes == 0 {
                return None;
            }
            if reloc_bytes >= min_bytes {
                return Some(reloc_bytes);
            }
        }
    }

    fn rewrite_adr(&mut self, insn: &Arm64Insn, kind: AdrKind, reg: Reg, raw: u32) {
        // The base is the instruction's own PC unless page alignment is
        // requested; architectural ADRP uses `pc & !0xfff`.
        let base = match kind {
            AdrKind::Adrp if self.align_adrp_page => insn.pc & !0xfffu64,
            _ => insn.pc,
        };
        let target = (base as i64).wrapping_add(adr_distance(kind, raw)) as u64;

        // Rd is a data operand here, so 31 is XZR, not SP.
        debug!(
            "rewriting {:?} x{} at {:#x} -> {:#x}",
            kind, reg as u8, insn.pc, target
        );

        self.output.put_ldr_reg_address(reg, target);
    }
}

/// The drivers hold every record until `write_all`, so the window has to fit
/// the whole request, but never more instructions than the input holds.
fn driver_config(base: &RelocatorConfig, input: &InputCode<'_>, min_bytes: usize) -> RelocatorConfig {
    let needed = min_bytes
        .div_ceil(INSN_LEN)
        .min(input.len() / INSN_LEN + 1);
    RelocatorConfig {
        window_capacity: base.window_capacity.max(needed),
        ..base.clone()
    }
}

/// Check that at least `min_bytes` of whole instructions can be read from
/// `input` before it runs out.
pub fn can_relocate(input: InputCode<'_>, min_bytes: usize) -> bool {
    // The feasibility check only decodes.
    let mut scratch = [0u8; 0];
    let mut cw = Arm64Writer::new(&mut scratch, input.pc());
    let config = driver_config(&RelocatorConfig::default(), &input, min_bytes);
    let mut rl = Arm64Relocator::with_config(input, &mut cw, &config);

    let ok = rl.read_at_least(min_bytes).is_some();
    debug!(
        "can_relocate {:#x} min_bytes={}: {} ({} bytes available)",
        input.pc(),
        min_bytes,
        ok,
        rl.input_pos()
    );
    ok
}

/// Relocate at least `min_bytes` of whole instructions from `input` into
/// `output` and return the number of input bytes consumed.
///
/// The input must hold enough instructions; check with [`can_relocate`]
/// first. Running out is a caller bug and panics.
pub fn relocate<W: CodeBackend + ?Sized>(
    input: InputCode<'_>,
    min_bytes: usize,
    output: &mut W,
) -> usize {
    let config = driver_config(&RelocatorConfig::default(), &input, min_bytes);
    let mut rl = Arm64Relocator::with_config(input, output, &config);

    let Some(reloc_bytes) = rl.read_at_least(min_bytes) else {
        panic!(
            "relocate: input at {:#x} exhausted after {} bytes, need {}",
            input.pc(),
            rl.input_pos(),
            min_bytes
        );
    };

    rl.write_all();

    debug!("relocated {} bytes from {:#x}", reloc_bytes, input.pc());
    reloc_bytes
}

/// Like [`relocate`], but reports a short input or an undersized output as an
/// error instead of panicking. Nothing is written on error.
pub fn try_relocate<W: CodeBackend + ?Sized>(
    input: InputCode<'_>,
    min_bytes: usize,
    output: &mut W,
    config: &RelocatorConfig,
) -> Result<usize, RelocateError> {
    let config = driver_config(config, &input, min_bytes);
    let mut rl = Arm64Relocator::with_config(input, output, &config);

    let Some(reloc_bytes) = rl.read_at_least(min_bytes) else {
        debug!("try_relocate {:#x}: only {} bytes", input.pc(), rl.input_pos());
        return Err(RelocateError::InsufficientInput {
            available: rl.input_pos(),
            required: min_bytes,
        });
    };

    let required = rl.estimated_output_size();
    let available = rl.output.remaining();
    if available < required {
        return Err(RelocateError::OutputTooSmall { available, required });
    }

    rl.write_all();

    debug!("relocated {} bytes from {:#x}", reloc_bytes, input.pc());
    Ok(reloc_bytes)
}
