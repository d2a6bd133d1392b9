/// Borrowed, read-only view of the code being relocated.
///
/// `pc` is the address the first byte executes at in its original location.
/// All reads are bounds-checked against the view; running off the end is
/// reported as `None`, never as an over-read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputCode<'a> {
    bytes: &'a [u8],
    pc: u64,
}

impl<'a> InputCode<'a> {
    pub fn new(bytes: &'a [u8], pc: u64) -> Self {
        Self { bytes, pc }
    }

    /// View `len` bytes of live code at `ptr`, using the pointer value as the PC.
    ///
    /// # Safety
    /// `ptr` must be valid for reads of `len` bytes for `'a`, and the memory
    /// must not be written while the view exists.
    pub unsafe fn from_raw(ptr: *const u8, len: usize) -> Self {
        Self {
            bytes: core::slice::from_raw_parts(ptr, len),
            pc: ptr as u64,
        }
    }

    pub fn pc(&self) -> u64 {
        self.pc
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn read_u32_le(&self, offset: usize) -> Option<u32> {
        let end = offset.checked_add(4)?;
        let word = self.bytes.get(offset..end)?;
        Some(u32::from_le_bytes(word.try_into().ok()?))
    }

    /// Panics if the range lies outside the view.
    pub fn slice(&self, offset: usize, len: usize) -> &'a [u8] {
        &self.bytes[offset..offset + len]
    }
}
