/// General-purpose register number as encoded in Rd/Rt/Rn fields.
///
/// Encoding 31 is SP for address operands and XZR for data operands such as
/// the Rt of an LDR (literal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    X0 = 0,
    X1 = 1,
    X2 = 2,
    X3 = 3,
    X4 = 4,
    X5 = 5,
    X6 = 6,
    X7 = 7,
    X8 = 8,
    X9 = 9,
    X10 = 10,
    X11 = 11,
    X12 = 12,
    X13 = 13,
    X14 = 14,
    X15 = 15,
    X16 = 16,
    X17 = 17,
    X18 = 18,
    X19 = 19,
    X20 = 20,
    X21 = 21,
    X22 = 22,
    X23 = 23,
    X24 = 24,
    X25 = 25,
    X26 = 26,
    X27 = 27,
    X28 = 28,
    X29 = 29,
    X30 = 30,
    SP = 31,
}

impl Reg {
    const ALL: [Reg; 32] = [
        Reg::X0,
        Reg::X1,
        Reg::X2,
        Reg::X3,
        Reg::X4,
        Reg::X5,
        Reg::X6,
        Reg::X7,
        Reg::X8,
        Reg::X9,
        Reg::X10,
        Reg::X11,
        Reg::X12,
        Reg::X13,
        Reg::X14,
        Reg::X15,
        Reg::X16,
        Reg::X17,
        Reg::X18,
        Reg::X19,
        Reg::X20,
        Reg::X21,
        Reg::X22,
        Reg::X23,
        Reg::X24,
        Reg::X25,
        Reg::X26,
        Reg::X27,
        Reg::X28,
        Reg::X29,
        Reg::X30,
        Reg::SP,
    ];

    /// Register for a 5-bit field value. Bits above the field are ignored.
    pub fn from_index(n: u32) -> Reg {
        Self::ALL[(n & 0x1f) as usize]
    }
}

/// What the relocator needs from a code-emission backend.
///
/// The backend owns the output buffer and its cursor; the relocator only
/// appends through these calls.
pub trait CodeBackend {
    /// Append raw bytes unchanged.
    fn put_bytes(&mut self, bytes: &[u8]);

    /// Append a position-independent sequence that loads `address` into `reg`.
    fn put_ldr_reg_address(&mut self, reg: Reg, address: u64);

    /// Bytes that can still be appended.
    fn remaining(&self) -> usize;
}

/// ARM64 code writer over a caller-owned buffer.
///
/// `pc` tracks where the next emitted byte will execute. Writing past the end
/// of the buffer is a caller bug and panics.
#[derive(Debug)]
pub struct Arm64Writer<'a> {
    buf: &'a mut [u8],
    offset: usize,
    base_pc: u64,
}

impl<'a> Arm64Writer<'a> {
    pub fn new(buf: &'a mut [u8], pc: u64) -> Self {
        Self {
            buf,
            offset: 0,
            base_pc: pc,
        }
    }

    pub fn pc(&self) -> u64 {
        self.base_pc.wrapping_add(self.offset as u64)
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes emitted so far.
    pub fn code(&self) -> &[u8] {
        &self.buf[..self.offset]
    }

    fn can_write(&self, bytes: usize) -> bool {
        self.offset + bytes <= self.buf.len()
    }

    fn reserve(&mut self, bytes: usize) -> &mut [u8] {
        assert!(
            self.can_write(bytes),
            "arm64 writer overflow: {} + {} > {}",
            self.offset,
            bytes,
            self.buf.len()
        );
        let start = self.offset;
        self.offset += bytes;
        &mut self.buf[start..start + bytes]
    }

    fn put_u32(&mut self, insn: u32) {
        self.reserve(4).copy_from_slice(&insn.to_le_bytes());
    }

    fn put_u64(&mut self, value: u64) {
        self.reserve(8).copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len()).copy_from_slice(bytes);
    }

    pub fn put_br_reg(&mut self, reg: Reg) {
        let n = reg as u32;
        self.put_u32(0xD61F0000 | (n << 5));
    }

    pub fn put_b_imm(&mut self, target: u64) {
        let imm = (target as i64).wrapping_sub(self.pc() as i64) >> 2;
        let imm26 = (imm as u32) & 0x03FF_FFFF;
        self.put_u32(0x1400_0000 | imm26);
    }

    pub fn put_ldr_br_address(&mut self, reg: Reg, addr: u64) {
        // Sequence:
        //   LDR Xt, [PC, #8]
        //   BR  Xt
        //   .quad addr
        //
        // LDR (literal, 64-bit): op=01, imm19<<5, Rt.
        let rt = reg as u32;
        let imm19 = 2u32; // 2 * 4 = 8 bytes
        self.put_u32(0x5800_0000 | (imm19 << 5) | rt);
        self.put_br_reg(reg);
        self.put_u64(addr);
    }

    pub fn put_ldr_reg_address(&mut self, reg: Reg, addr: u64) {
        // Sequence:
        //   LDR Xt, [PC, #8]
        //   B   +12
        //   .quad addr
        //
        // Loads an absolute value into Xt and continues execution after the literal.
        let rt = reg as u32;
        let imm19 = 2u32; // 8 bytes
        self.put_u32(0x5800_0000 | (imm19 << 5) | rt);

        // Skip over literal.
        self.put_b_imm(self.pc() + 12);

        self.put_u64(addr);
    }
}

impl CodeBackend for Arm64Writer<'_> {
    fn put_bytes(&mut self, bytes: &[u8]) {
        Arm64Writer::put_bytes(self, bytes);
    }

    fn put_ldr_reg_address(&mut self, reg: Reg, address: u64) {
        Arm64Writer::put_ldr_reg_address(self, reg, address);
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_u32(buf: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(buf[offset..offset + 4].try_into().unwrap())
    }

    fn read_u64(buf: &[u8], offset: usize) -> u64 {
        u64::from_le_bytes(buf[offset..offset + 8].try_into().unwrap())
    }

    #[test]
    fn encode_b_forward() {
        let mut buf = [0u8; 16];
        let mut w = Arm64Writer::new(&mut buf, 0x1000);
        w.put_b_imm(0x1100);
        // PC-relative offset = (0x1100 - 0x1000) / 4 = 0x40
        assert_eq!(read_u32(w.code(), 0), 0x1400_0040);
    }

    #[test]
    fn encode_b_backward() {
        let mut buf = [0u8; 16];
        let mut w = Arm64Writer::new(&mut buf, 0x1000);
        w.put_b_imm(0x0ff8);
        // imm26 = -2
        assert_eq!(read_u32(w.code(), 0), 0x17FF_FFFE);
    }

    #[test]
    fn encode_br_x16() {
        let mut buf = [0u8; 16];
        let mut w = Arm64Writer::new(&mut buf, 0x1000);
        w.put_br_reg(Reg::X16);
        assert_eq!(read_u32(w.code(), 0), 0xD61F0000 | (16 << 5));
    }

    #[test]
    fn encode_ldr_br_literal() {
        let mut buf = [0u8; 32];
        let addr = 0xDEAD_BEEF_CAFE_BABEu64;
        let mut w = Arm64Writer::new(&mut buf, 0x1000);
        w.put_ldr_br_address(Reg::X16, addr);
        assert_eq!(w.offset(), 16);
        assert_eq!(read_u32(&buf, 0), 0x5800_0000 | (2 << 5) | 16);
        assert_eq!(read_u32(&buf, 4), 0xD61F_0000 | (16 << 5));
        assert_eq!(read_u64(&buf, 8), addr);
    }

    #[test]
    fn encode_ldr_reg_address_literal() {
        let mut buf = [0u8; 32];
        let addr = 0x0123_4567_89AB_CDEFu64;
        let mut w = Arm64Writer::new(&mut buf, 0x1000);
        w.put_ldr_reg_address(Reg::X17, addr);
        assert_eq!(w.pc(), 0x1010);
        assert_eq!(read_u32(&buf, 0), 0x5800_0000 | (2 << 5) | 17);
        // B from 0x1004 to 0x1010 => imm26 = 3
        assert_eq!(read_u32(&buf, 4), 0x1400_0003);
        assert_eq!(read_u64(&buf, 8), addr);
    }

    #[test]
    fn put_bytes_advances_pc() {
        let mut buf = [0u8; 8];
        let mut w = Arm64Writer::new(&mut buf, 0x2000);
        w.put_bytes(&[0x1f, 0x20, 0x03, 0xd5]);
        assert_eq!(w.pc(), 0x2004);
        assert_eq!(CodeBackend::remaining(&w), 4);
        assert_eq!(w.code(), &[0x1f, 0x20, 0x03, 0xd5]);
    }

    #[test]
    #[should_panic(expected = "arm64 writer overflow")]
    fn overflow_panics() {
        let mut buf = [0u8; 12];
        let mut w = Arm64Writer::new(&mut buf, 0);
        w.put_ldr_reg_address(Reg::X0, 0);
    }

    #[test]
    fn reg_from_index_masks_field() {
        assert_eq!(Reg::from_index(0), Reg::X0);
        assert_eq!(Reg::from_index(17), Reg::X17);
        assert_eq!(Reg::from_index(31), Reg::SP);
        assert_eq!(Reg::from_index(0x23), Reg::X3);
    }
}
