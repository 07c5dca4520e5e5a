//! Scoped acquisition handles.
//!
//! These are the only sanctioned way to obtain whole-space or range exclusivity. Every guard
//! releases what it holds exactly once when dropped, including during unwinding.

use crate::registry::Accessor;
use crate::slot::RangeSlot;
use crate::space::{AddressSpace, WaitMark};
use crate::sync::AtomicU64;
use crate::word::{AddressRange, LockKind, LockWord};
use std::time::Duration;
use tracing::debug;

/// One held range lock; released on drop.
#[must_use = "the range is unlocked as soon as the guard is dropped"]
pub struct RangeLockGuard<'a> {
    space: &'a AddressSpace,
    slot: &'a RangeSlot,
}

impl<'a> RangeLockGuard<'a> {
    pub(crate) fn new(space: &'a AddressSpace, slot: &'a RangeSlot) -> Self {
        Self { space, slot }
    }

    pub fn range(&self) -> AddressRange {
        self.slot.load().unwrap_or(AddressRange::new(0, 0))
    }
}

impl Drop for RangeLockGuard<'_> {
    fn drop(&mut self) {
        self.space.free_range_lock(self.slot);
    }
}

/// A range-lock slot owned by a thread that is not a passive reader (e.g. a DMA engine).
pub struct RangeSlotHandle<'a> {
    space: &'a AddressSpace,
    index: usize,
}

impl<'a> RangeSlotHandle<'a> {
    pub(crate) fn new(space: &'a AddressSpace, index: usize) -> Self {
        Self { space, index }
    }

    pub fn slot(&self) -> &'a RangeSlot {
        self.space.registry().slot(self.index)
    }

    /// Locks `[begin, begin + size)` in this slot.
    pub fn range_lock(&self, res: Option<&AtomicU64>, begin: u32, size: u32) -> RangeLockGuard<'a> {
        let slot = self.slot();
        self.space.range_lock(res, slot, begin, size);
        RangeLockGuard::new(self.space, slot)
    }
}

impl Drop for RangeSlotHandle<'_> {
    fn drop(&mut self) {
        let slot = self.slot();
        debug_assert!(slot.is_empty(), "range-lock slot freed while holding a range");
        slot.force_clear();
        self.space.registry().free_slot(self.index);
    }
}

/// Shared stake over the entire address space.
///
/// While held, no administrative lock can be granted. [`ReaderLock::upgrade`] escalates it to
/// exclusive access without dropping the stake.
#[must_use = "the stake is released as soon as the guard is dropped"]
pub struct ReaderLock<'a> {
    space: &'a AddressSpace,
    upgraded: bool,
}

impl<'a> ReaderLock<'a> {
    /// Takes the stake. A passive reader registered by the calling thread is marked as waiting
    /// while this blocks.
    pub fn new(space: &'a AddressSpace) -> Self {
        Self::acquire(space, None)
    }

    /// Takes the stake on behalf of `accessor`, which is marked as waiting while this blocks.
    pub fn for_accessor(space: &'a AddressSpace, accessor: &Accessor) -> Self {
        if let Some(slot) = accessor.range_slot() {
            debug_assert!(
                slot.is_empty(),
                "reader lock requested while holding a range lock"
            );
        }
        Self::acquire(space, Some(accessor))
    }

    fn acquire(space: &'a AddressSpace, accessor: Option<&Accessor>) -> Self {
        let _wait = WaitMark::enter(space, accessor);
        space.admin().lock_shared();
        Self {
            space,
            upgraded: false,
        }
    }

    pub fn upgrade(&mut self) {
        if self.upgraded {
            return;
        }
        self.space.admin().upgrade();
        debug_assert!(self.space.admin().is_held_exclusive_by_me());
        self.upgraded = true;
        debug!("reader lock upgraded");
    }

    pub fn is_upgraded(&self) -> bool {
        self.upgraded
    }
}

impl Drop for ReaderLock<'_> {
    fn drop(&mut self) {
        if self.upgraded {
            self.space.admin().downgrade();
        }
        self.space.admin().unlock_shared();
    }
}

/// Administrative lock over a range or over the whole address space.
///
/// Construction blocks until every accessor the lock excludes has drained. Dropping it clears the
/// global lock word and wakes blocked accessors.
///
/// The caller's own accessor (given explicitly, or the passive reader its thread registered) is
/// marked as waiting for the lifetime of the guard so the lock never waits on its own caller.
#[must_use = "the administrative lock is released as soon as the guard is dropped"]
pub struct WriterLock<'a> {
    space: &'a AddressSpace,
    word: LockWord,
    _wait: WaitMark,
}

impl<'a> WriterLock<'a> {
    /// `addr == 0` locks the whole address space; any other address locks the writer granule
    /// containing it.
    pub fn new(space: &'a AddressSpace, addr: u32) -> Self {
        Self::acquire(space, None, Self::target(space, addr))
    }

    /// Like [`WriterLock::new`], for a thread that is itself a registered accessor.
    pub fn for_accessor(space: &'a AddressSpace, accessor: &Accessor, addr: u32) -> Self {
        if let Some(slot) = accessor.range_slot() {
            assert!(
                slot.is_empty(),
                "deadlock: administrative lock requested while holding a range lock"
            );
        }
        Self::acquire(space, Some(accessor), Self::target(space, addr))
    }

    /// Administrative lock of `kind` over an explicit range.
    ///
    /// Ranges too large for the lock word lock the whole space.
    pub fn with_range(space: &'a AddressSpace, range: AddressRange, kind: LockKind) -> Self {
        Self::acquire(space, None, space.admin_word(range, kind))
    }

    /// Gives up with `None` if the admin mutex cannot be taken within `timeout`.
    ///
    /// For callers that may already be part of a lock cycle and prefer backing off over
    /// blocking. Once the mutex is taken, draining accessors is not bounded by `timeout`.
    pub fn try_new(space: &'a AddressSpace, addr: u32, timeout: Duration) -> Option<Self> {
        let word = Self::target(space, addr);
        let wait = WaitMark::enter(space, None);
        space.try_lock_administrative(word, timeout).then(|| Self {
            space,
            word,
            _wait: wait,
        })
    }

    fn acquire(space: &'a AddressSpace, accessor: Option<&Accessor>, word: LockWord) -> Self {
        let wait = WaitMark::enter(space, accessor);
        space.lock_administrative(word);
        Self {
            space,
            word,
            _wait: wait,
        }
    }

    fn target(space: &AddressSpace, addr: u32) -> LockWord {
        if addr == 0 {
            return LockWord::whole(LockKind::Locked);
        }
        let granule = space.config().writer_granule;
        let begin = addr & !(granule - 1);
        space.admin_word(AddressRange::new(begin, granule), LockKind::Locked)
    }

    /// The installed lock word.
    pub fn word(&self) -> LockWord {
        self.word
    }

    pub fn is_whole(&self) -> bool {
        self.word.is_whole()
    }
}

impl Drop for WriterLock<'_> {
    fn drop(&mut self) {
        // The wait mark is cleared afterwards, when the field drops.
        self.space.unlock_administrative(self.word);
    }
}

impl std::fmt::Debug for WriterLock<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriterLock").field("word", &self.word).finish()
    }
}
