use crate::arch::arm64::insn::Arm64Insn;

/// Bounded queue of decoded instructions that have not been written yet.
///
/// `read_count` and `write_count` only grow; slot `n % capacity` holds record
/// `n`. Pushing into a full window would overwrite a pending record, so it
/// panics instead.
#[derive(Debug)]
pub struct InsnWindow {
    slots: Vec<Option<Arm64Insn>>,
    read_count: usize,
    write_count: usize,
}

impl InsnWindow {
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "relocation window needs at least one slot");
        Self {
            slots: vec![None; capacity],
            read_count: 0,
            write_count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn read_count(&self) -> usize {
        self.read_count
    }

    pub fn write_count(&self) -> usize {
        self.write_count
    }

    pub fn pending(&self) -> usize {
        self.read_count - self.write_count
    }

    pub fn is_empty(&self) -> bool {
        self.read_count == self.write_count
    }

    /// Forget every record and restart both counters, keeping the storage.
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.read_count = 0;
        self.write_count = 0;
    }

    pub fn push(&mut self, insn: Arm64Insn) {
        assert!(
            self.pending() < self.capacity(),
            "relocation window overrun: {} instructions pending, capacity {}",
            self.pending(),
            self.capacity()
        );
        let slot = self.read_count % self.capacity();
        self.slots[slot] = Some(insn);
        self.read_count += 1;
        assert!(self.read_count > self.write_count);
    }

    /// Oldest pending record, or `None` once everything read has been written.
    pub fn peek(&self) -> Option<&Arm64Insn> {
        if self.is_empty() {
            return None;
        }
        self.slots[self.write_count % self.capacity()].as_ref()
    }

    /// Consume the oldest pending record.
    pub fn take_next(&mut self) -> Option<Arm64Insn> {
        if self.is_empty() {
            return None;
        }
        let slot = self.write_count % self.capacity();
        let insn = self.slots[slot].take();
        self.write_count += 1;
        assert!(self.write_count <= self.read_count);
        insn
    }

    /// Consume the oldest pending record, which must exist.
    pub fn advance(&mut self) -> Arm64Insn {
        match self.take_next() {
            Some(insn) => insn,
            None => panic!(
                "relocation window is empty (read {}, written {})",
                self.read_count, self.write_count
            ),
        }
    }

    /// Pending records, oldest first.
    pub fn pending_iter(&self) -> impl Iterator<Item = &Arm64Insn> + '_ {
        (self.write_count..self.read_count)
            .filter_map(move |n| self.slots[n % self.capacity()].as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::arm64::insn::{classify, INSN_LEN};

    fn insn_at(offset: usize) -> Arm64Insn {
        Arm64Insn {
            offset,
            pc: 0x1000 + offset as u64,
            length: INSN_LEN,
            kind: classify(0xD503_201F),
        }
    }

    #[test]
    fn fifo_order() {
        let mut w = InsnWindow::with_capacity(4);
        assert!(w.peek().is_none());
        w.push(insn_at(0));
        w.push(insn_at(4));
        assert_eq!(w.pending(), 2);
        assert_eq!(w.peek().map(|i| i.offset), Some(0));
        assert_eq!(w.advance().offset, 0);
        assert_eq!(w.take_next().map(|i| i.offset), Some(4));
        assert!(w.take_next().is_none());
        assert_eq!(w.read_count(), 2);
        assert_eq!(w.write_count(), 2);
    }

    #[test]
    fn wraps_around_capacity() {
        let mut w = InsnWindow::with_capacity(2);
        for round in 0..5 {
            w.push(insn_at(round * 8));
            w.push(insn_at(round * 8 + 4));
            assert_eq!(w.advance().offset, round * 8);
            assert_eq!(w.advance().offset, round * 8 + 4);
        }
        assert_eq!(w.read_count(), 10);
        assert!(w.is_empty());
    }

    #[test]
    fn pending_iter_yields_oldest_first() {
        let mut w = InsnWindow::with_capacity(3);
        w.push(insn_at(0));
        w.push(insn_at(4));
        w.advance();
        w.push(insn_at(8));
        w.push(insn_at(12));
        let offsets: Vec<usize> = w.pending_iter().map(|i| i.offset).collect();
        assert_eq!(offsets, vec![4, 8, 12]);
    }

    #[test]
    fn clear_keeps_storage() {
        let mut w = InsnWindow::with_capacity(3);
        w.push(insn_at(0));
        w.clear();
        assert_eq!(w.capacity(), 3);
        assert_eq!(w.read_count(), 0);
        assert!(w.peek().is_none());
    }

    #[test]
    #[should_panic(expected = "relocation window overrun")]
    fn overrun_panics() {
        let mut w = InsnWindow::with_capacity(2);
        w.push(insn_at(0));
        w.push(insn_at(4));
        w.push(insn_at(8));
    }

    #[test]
    #[should_panic(expected = "relocation window is empty")]
    fn advance_on_empty_panics() {
        let mut w = InsnWindow::with_capacity(2);
        w.advance();
    }
}
