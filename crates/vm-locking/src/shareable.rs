//! Per-chunk "shared mapping" markers.
//!
//! A chunk is 64 KiB. When a chunk aliases a canonical region (a shared memory block mapped at
//! several addresses), every address inside it is folded to its low 16 bits before being compared
//! against the administrative lock word, so two mirrors of the same bytes conflict with each other.

use crate::sync::AtomicU8;
use crate::word::AddressRange;
use std::sync::atomic::Ordering;

/// log2 of the chunk size.
pub const CHUNK_SHIFT: u32 = 16;
/// Chunk size in bytes.
pub const CHUNK_SIZE: u64 = 1 << CHUNK_SHIFT;
/// Mask applied to addresses inside a shareable chunk.
pub const FOLD_MASK: u32 = (CHUNK_SIZE - 1) as u32;

pub struct ShareableTable {
    chunks: Box<[AtomicU8]>,
}

impl ShareableTable {
    pub fn new(chunk_count: usize) -> Self {
        Self {
            chunks: (0..chunk_count).map(|_| AtomicU8::new(0)).collect(),
        }
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    #[inline]
    fn entry(&self, addr: u32) -> Option<&AtomicU8> {
        self.chunks.get((addr >> CHUNK_SHIFT) as usize)
    }

    #[inline]
    pub fn is_shareable(&self, addr: u32) -> bool {
        self.entry(addr)
            .is_some_and(|chunk| chunk.load(Ordering::Acquire) != 0)
    }

    /// Address used for conflict comparison.
    #[inline]
    pub fn fold(&self, addr: u32) -> u64 {
        if self.is_shareable(addr) {
            (addr & FOLD_MASK) as u64
        } else {
            addr as u64
        }
    }

    /// Marks every chunk touched by `range` as shareable.
    ///
    /// Callers must hold an administrative lock of kind [`crate::LockKind::Sharing`] over the range.
    pub(crate) fn mark(&self, range: AddressRange) {
        self.store(range, 1);
    }

    pub(crate) fn unmark(&self, range: AddressRange) {
        self.store(range, 0);
    }

    fn store(&self, range: AddressRange, value: u8) {
        if range.is_empty() {
            return;
        }
        let first = (range.begin >> CHUNK_SHIFT) as usize;
        let last = ((range.end() - 1) >> CHUNK_SHIFT) as usize;
        assert!(
            last < self.chunks.len(),
            "shareable range {range} lies outside the address space"
        );
        for chunk in &self.chunks[first..=last] {
            chunk.store(value, Ordering::Release);
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn unmarked_chunks_do_not_fold() {
        let table = ShareableTable::new(0x10000);
        assert!(!table.is_shareable(0x2_1234));
        assert_eq!(table.fold(0x2_1234), 0x2_1234);
    }

    #[test]
    fn marked_chunk_folds_to_low_sixteen_bits() {
        let table = ShareableTable::new(0x10000);
        table.mark(AddressRange::new(0x2_0000, 0x10));
        assert!(table.is_shareable(0x2_ffff));
        assert!(!table.is_shareable(0x3_0000));
        assert_eq!(table.fold(0x2_1234), 0x1234);
    }

    #[test]
    fn mark_covers_every_touched_chunk() {
        let table = ShareableTable::new(0x10000);
        table.mark(AddressRange::new(0x2_fff0, 0x20));
        assert!(table.is_shareable(0x2_0000));
        assert!(table.is_shareable(0x3_0000));
        assert!(!table.is_shareable(0x4_0000));

        table.unmark(AddressRange::new(0x2_0000, 0x2_0000));
        assert!(!table.is_shareable(0x2_0000));
        assert!(!table.is_shareable(0x3_0000));
    }

    #[test]
    fn addresses_beyond_a_small_table_are_never_shareable() {
        let table = ShareableTable::new(4);
        assert_eq!(table.chunk_count(), 4);
        assert!(!table.is_shareable(0x10_0000));
        assert_eq!(table.fold(0x10_0000), 0x10_0000);
    }
}
