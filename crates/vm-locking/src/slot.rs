//! Accessor slots and the optimistic range-lock fast path.
//!
//! Protocol (accessor side):
//! 1) Snapshot the lock word and the accessor's stall indicator.
//! 2) If the snapshot cannot conflict, publish the range into the slot.
//! 3) Re-snapshot. If the word is idle or unchanged and nothing asked the accessor to stall, the
//!    range is held until [`RangeSlot::release`]. Otherwise withdraw and take the slow path.
//!
//! The administrative side installs its word first and scans the slots afterwards. Both sides use
//! `SeqCst` for the store followed by the load of the other party's cell, so at least one of them
//! observes the other.

use crate::shareable::ShareableTable;
use crate::sync::{test_yield, AtomicU64};
use crate::word::{AddressRange, GlobalLockWord, LockWord};
use std::sync::atomic::Ordering;

/// Low bits of a stall indicator that, when non-zero, force accessors onto the slow path.
pub const STALL_MASK: u64 = 127;

/// One accessor's published intent, padded to its own cache line so disjoint accessors never
/// share a line on the hot path.
#[repr(align(64))]
pub struct RangeSlot {
    bits: AtomicU64,
}

impl RangeSlot {
    /// Slots are only created by the registry; callers borrow them through an accessor or a
    /// [`crate::RangeSlotHandle`].
    pub(crate) fn new() -> Self {
        Self {
            bits: AtomicU64::new(0),
        }
    }

    /// The currently published range, if any.
    #[inline]
    pub fn load(&self) -> Option<AddressRange> {
        match self.bits.load(Ordering::SeqCst) {
            0 => None,
            bits => Some(AddressRange::from_slot_bits(bits)),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits.load(Ordering::SeqCst) == 0
    }

    #[inline]
    pub(crate) fn raw(&self) -> u64 {
        self.bits.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn publish(&self, range: AddressRange) {
        self.bits.store(range.to_slot_bits(), Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn withdraw(&self) {
        self.bits.store(0, Ordering::Release);
    }

    /// Clears the slot. Releasing a slot that holds nothing is a contract violation.
    #[inline]
    pub fn release(&self) {
        let previous = self.bits.swap(0, Ordering::Release);
        debug_assert_ne!(previous, 0, "released a range lock that is not held");
    }

    /// Clears the slot whatever it holds; for tearing down a foreign accessor.
    pub(crate) fn force_clear(&self) -> Option<AddressRange> {
        match self.bits.swap(0, Ordering::AcqRel) {
            0 => None,
            bits => Some(AddressRange::from_slot_bits(bits)),
        }
    }
}

#[inline]
pub(crate) fn stall_bits(res: Option<&AtomicU64>) -> u64 {
    match res {
        Some(res) => res.load(Ordering::SeqCst) & STALL_MASK,
        None => 0,
    }
}

/// Whether an access to `[begin, begin + size)` collides with `lock`.
///
/// Addresses are folded only against `Locked` words, whose begin is stored folded when it lies in
/// a shareable chunk; the other kinds are compared on raw addresses.
#[inline]
pub(crate) fn conflicts(lock: LockWord, shareable: &ShareableTable, begin: u32, size: u32) -> bool {
    let addr = if lock.kind().is_blocking() {
        shareable.fold(begin)
    } else {
        begin as u64
    };
    lock.overlaps(addr, size)
}

/// Attempts to acquire `[begin, begin + size)` without blocking.
///
/// Returns `true` with the range published in `slot`, or `false` with `slot` empty.
#[inline]
pub(crate) fn try_range_lock(
    word: &GlobalLockWord,
    shareable: &ShareableTable,
    res: Option<&AtomicU64>,
    slot: &RangeSlot,
    begin: u32,
    size: u32,
) -> bool {
    let lock = word.load();
    let stalled = stall_bits(res);

    let addr = shareable.fold(begin);

    if (!lock.kind().is_blocking() || !lock.overlaps(addr, size)) && stalled == 0 {
        slot.publish(AddressRange::new(begin, size));
        test_yield();

        let new_lock = word.load();
        let new_stalled = stall_bits(res);

        if new_stalled == 0 && (new_lock.is_idle() || new_lock == lock) {
            return true;
        }

        slot.withdraw();
    }

    false
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::word::LockKind;

    fn fixture() -> (GlobalLockWord, ShareableTable, RangeSlot) {
        (GlobalLockWord::new(), ShareableTable::new(0x10000), RangeSlot::new())
    }

    #[test]
    fn uncontended_acquire_publishes_range() {
        let (word, table, slot) = fixture();
        assert!(try_range_lock(&word, &table, None, &slot, 0x1000, 0x100));
        assert_eq!(slot.load(), Some(AddressRange::new(0x1000, 0x100)));
        slot.release();
        assert!(slot.is_empty());
    }

    #[test]
    fn overlapping_locked_word_refuses_and_leaves_slot_empty() {
        let (word, table, slot) = fixture();
        word.install(LockWord::new(AddressRange::new(0x1000, 0x80), LockKind::Locked));
        assert!(!try_range_lock(&word, &table, None, &slot, 0x1040, 0x10));
        assert!(slot.is_empty());
    }

    #[test]
    fn disjoint_locked_word_does_not_interfere() {
        let (word, table, slot) = fixture();
        word.install(LockWord::new(AddressRange::new(0x1000, 0x80), LockKind::Locked));
        assert!(try_range_lock(&word, &table, None, &slot, 0x2000, 0x10));
    }

    #[test]
    fn non_blocking_kinds_let_stable_accessors_through() {
        let (word, table, slot) = fixture();
        word.install(LockWord::new(
            AddressRange::new(0x1000, 0x1000),
            LockKind::Deallocation,
        ));
        assert!(try_range_lock(&word, &table, None, &slot, 0x1000, 0x10));
    }

    #[test]
    fn pending_stall_forces_slow_path() {
        let (word, table, slot) = fixture();
        let res = AtomicU64::new(1);
        assert!(!try_range_lock(&word, &table, Some(&res), &slot, 0x1000, 0x10));
        assert!(slot.is_empty());

        // Bits above the stall mask are a counter and don't stall anyone.
        res.store(128, Ordering::SeqCst);
        assert!(try_range_lock(&word, &table, Some(&res), &slot, 0x1000, 0x10));
    }

    #[test]
    fn shareable_chunk_folds_before_comparison() {
        let (word, table, slot) = fixture();
        word.install(LockWord::new(AddressRange::new(0x0000, 0x80), LockKind::Locked));

        assert!(try_range_lock(&word, &table, None, &slot, 0x3_0000, 0x10));
        slot.release();

        table.mark(AddressRange::new(0x3_0000, 0x10));
        assert!(!try_range_lock(&word, &table, None, &slot, 0x3_0000, 0x10));
    }

    #[test]
    fn conflicts_folds_only_against_locked_words() {
        let table = ShareableTable::new(0x10000);
        table.mark(AddressRange::new(0x3_0000, 0x10));

        let locked = LockWord::new(AddressRange::new(0x0000, 0x80), LockKind::Locked);
        assert!(conflicts(locked, &table, 0x3_0040, 0x10));

        let dealloc = LockWord::new(AddressRange::new(0x3_0000, 0x1000), LockKind::Deallocation);
        assert!(conflicts(dealloc, &table, 0x3_0040, 0x10));
        assert!(!conflicts(dealloc, &table, 0x0040, 0x10));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not held")]
    fn double_release_is_detected() {
        let slot = RangeSlot::new();
        slot.publish(AddressRange::new(0x1000, 0x10));
        slot.release();
        slot.release();
    }

    #[test]
    fn slot_occupies_a_full_cache_line() {
        assert_eq!(std::mem::align_of::<RangeSlot>(), 64);
        assert_eq!(std::mem::size_of::<RangeSlot>(), 64);
    }
}
