//! Memory accessors and the registry that enumerates them.
//!
//! Each emulated CPU thread owns one [`Accessor`]. The registry owns the accessor slots (a fixed
//! array handed out through an allocation bitmap) and keeps non-owning references to the accessors
//! currently registered as passive readers, so whole-space writers can ask them to yield.

use crate::error::LockError;
use crate::guard::{RangeLockGuard, ReaderLock, WriterLock};
use crate::slot::RangeSlot;
use crate::space::AddressSpace;
use crate::sync::AtomicU64;
use bitflags::bitflags;
use std::sync::atomic::{AtomicU32, AtomicU64 as StdAtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

bitflags! {
    /// Accessor state visible to other threads.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessorFlags: u32 {
        /// The accessor holds no passive stake and must re-register before touching memory.
        /// Set by `temporary_unlock`, and by whole-space writers asking the accessor to yield.
        const MEMORY = 1 << 0;
        /// The accessor is blocked or suspended and is not touching memory; writers skip it.
        const WAIT = 1 << 1;
    }
}

const NO_SLOT: usize = usize::MAX;

/// Per-thread memory access context.
///
/// Owned by the emulated CPU thread object; the registry only holds a `Weak` to it.
pub struct Accessor {
    space: Arc<AddressSpace>,
    this: Weak<Accessor>,
    id: u32,
    owner: StdAtomicU64,
    flags: AtomicU32,
    slot: AtomicUsize,
    reservation: AtomicU64,
}

impl Accessor {
    pub(crate) fn new(space: Arc<AddressSpace>, id: u32, this: Weak<Accessor>) -> Self {
        Self {
            space,
            this,
            id,
            owner: StdAtomicU64::new(0),
            flags: AtomicU32::new(AccessorFlags::MEMORY.bits()),
            slot: AtomicUsize::new(NO_SLOT),
            reservation: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn space(&self) -> &Arc<AddressSpace> {
        &self.space
    }

    pub(crate) fn weak(&self) -> Weak<Accessor> {
        self.this.clone()
    }

    pub fn flags(&self) -> AccessorFlags {
        AccessorFlags::from_bits_truncate(self.flags.load(Ordering::SeqCst))
    }

    pub(crate) fn set_flags(&self, flags: AccessorFlags) -> AccessorFlags {
        AccessorFlags::from_bits_truncate(self.flags.fetch_or(flags.bits(), Ordering::SeqCst))
    }

    pub(crate) fn clear_flags(&self, flags: AccessorFlags) -> AccessorFlags {
        AccessorFlags::from_bits_truncate(self.flags.fetch_and(!flags.bits(), Ordering::SeqCst))
    }

    /// Whether the accessor currently holds a passive stake.
    pub fn is_registered(&self) -> bool {
        self.slot_index().is_some() && !self.flags().contains(AccessorFlags::MEMORY)
    }

    /// The stall indicator consulted by the fast path. Its low 7 bits, when non-zero, push every
    /// range lock of this accessor onto the slow path until they clear.
    pub fn reservation(&self) -> &AtomicU64 {
        &self.reservation
    }

    pub fn range_slot(&self) -> Option<&RangeSlot> {
        self.slot_index()
            .map(|index| self.space.registry().slot(index))
    }

    pub(crate) fn slot_index(&self) -> Option<usize> {
        match self.slot.load(Ordering::Acquire) {
            NO_SLOT => None,
            index => Some(index),
        }
    }

    pub(crate) fn set_slot_index(&self, index: Option<usize>) {
        self.slot.store(index.unwrap_or(NO_SLOT), Ordering::Release);
    }

    /// Token of the thread that registered this accessor, 0 if unregistered.
    pub(crate) fn owner(&self) -> u64 {
        self.owner.load(Ordering::Acquire)
    }

    pub(crate) fn set_owner(&self, token: u64) {
        self.owner.store(token, Ordering::Release);
    }

    pub fn passive_lock(&self) -> Result<(), LockError> {
        self.space.passive_lock(self)
    }

    pub fn passive_unlock(&self) {
        self.space.passive_unlock(self)
    }

    pub fn temporary_unlock(&self) {
        self.space.temporary_unlock(self)
    }

    /// Poll point for the CPU engine: yields the passive stake if a writer asked for it.
    ///
    /// Returns `true` if the accessor had to re-register (and therefore may have observed an
    /// administrative change to the address space).
    pub fn check_state(&self) -> Result<bool, LockError> {
        self.space.check_state(self)
    }

    /// Locks `[begin, begin + size)` for one access using this accessor's slot.
    #[inline]
    pub fn range_lock(&self, begin: u32, size: u32) -> Result<RangeLockGuard<'_>, LockError> {
        let slot = self
            .range_slot()
            .ok_or(LockError::NotRegistered { id: self.id })?;
        self.space
            .range_lock_for(Some(self), Some(&self.reservation), slot, begin, size);
        Ok(RangeLockGuard::new(&self.space, slot))
    }

    pub fn reader_lock(&self) -> ReaderLock<'_> {
        ReaderLock::for_accessor(&self.space, self)
    }

    pub fn writer_lock(&self, addr: u32) -> WriterLock<'_> {
        WriterLock::for_accessor(&self.space, self, addr)
    }
}

impl Drop for Accessor {
    fn drop(&mut self) {
        self.space.release_accessor(self);
    }
}

impl std::fmt::Debug for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accessor")
            .field("id", &self.id)
            .field("flags", &self.flags())
            .field("slot", &self.slot_index())
            .finish()
    }
}

pub(crate) struct ThreadRegistry {
    slots: Box<[RangeSlot]>,
    /// Token of the thread using each slot, 0 when free.
    slot_owners: Box<[StdAtomicU64]>,
    /// One bit per slot, set while allocated.
    bitmap: Box<[StdAtomicU64]>,
    readers: Mutex<Vec<ReaderEntry>>,
}

/// A registered passive reader and the thread driving it.
pub(crate) struct ReaderEntry {
    pub(crate) owner: u64,
    pub(crate) accessor: Weak<Accessor>,
}

impl ReaderEntry {
    /// Whether this entry refers to `accessor` (works while `accessor` is being dropped).
    pub(crate) fn is(&self, accessor: &Accessor) -> bool {
        std::ptr::eq(self.accessor.as_ptr(), accessor)
    }
}

impl ThreadRegistry {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| RangeSlot::new()).collect(),
            slot_owners: (0..capacity).map(|_| StdAtomicU64::new(0)).collect(),
            bitmap: (0..capacity.div_ceil(64))
                .map(|_| StdAtomicU64::new(0))
                .collect(),
            readers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> &RangeSlot {
        &self.slots[index]
    }

    pub(crate) fn slots(&self) -> impl Iterator<Item = (usize, &RangeSlot)> {
        self.slots.iter().enumerate()
    }

    pub(crate) fn slot_owner(&self, index: usize) -> u64 {
        self.slot_owners[index].load(Ordering::Acquire)
    }

    pub(crate) fn set_slot_owner(&self, index: usize, token: u64) {
        self.slot_owners[index].store(token, Ordering::Release);
    }

    pub(crate) fn alloc_slot(&self, owner: u64) -> Result<usize, LockError> {
        let capacity = self.capacity();
        for (word_index, word) in self.bitmap.iter().enumerate() {
            let mut bits = word.load(Ordering::Relaxed);
            loop {
                let free = (!bits).trailing_zeros() as usize;
                let index = word_index * 64 + free;
                if free >= 64 || index >= capacity {
                    break;
                }
                match word.compare_exchange_weak(
                    bits,
                    bits | 1 << free,
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        debug_assert!(self.slots[index].is_empty());
                        self.set_slot_owner(index, owner);
                        return Ok(index);
                    }
                    Err(actual) => bits = actual,
                }
            }
        }
        Err(LockError::RegistryFull { capacity })
    }

    pub(crate) fn free_slot(&self, index: usize) {
        self.set_slot_owner(index, 0);
        let previous = self.bitmap[index / 64].fetch_and(!(1 << (index % 64)), Ordering::AcqRel);
        debug_assert!(
            previous & 1 << (index % 64) != 0,
            "freed accessor slot {index} that was not allocated"
        );
    }

    pub(crate) fn allocated_slots(&self) -> usize {
        self.bitmap
            .iter()
            .map(|word| word.load(Ordering::Acquire).count_ones() as usize)
            .sum()
    }

    /// Whether `slot` is one of this registry's slots.
    pub(crate) fn owns(&self, slot: &RangeSlot) -> bool {
        self.slots.as_ptr_range().contains(&(slot as *const RangeSlot))
    }

    pub(crate) fn readers(&self) -> MutexGuard<'_, Vec<ReaderEntry>> {
        self.readers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
