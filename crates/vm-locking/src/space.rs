//! The address space context: the one object every accessor and administrative locker shares.
//!
//! It owns the global lock word, the shareable table, the accessor registry and the admin mutex.
//! It is created once at emulator startup and handed to CPU threads through their [`Accessor`].

use crate::admin::AdminMutex;
use crate::config::AddressSpaceConfig;
use crate::error::{ConfigError, LockError};
use crate::guard::{RangeSlotHandle, ReaderLock, WriterLock};
use crate::registry::{Accessor, AccessorFlags, ReaderEntry, ThreadRegistry};
use crate::shareable::ShareableTable;
use crate::slot::{conflicts, stall_bits, try_range_lock, RangeSlot};
use crate::stats::{LockStats, LockStatsSnapshot};
use crate::sync::{current_thread_token, AtomicU64, Backoff};
use crate::word::{AddressRange, GlobalLockWord, LockKind, LockWord, RANGE_SIZE_MAX};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub struct AddressSpace {
    config: AddressSpaceConfig,
    lock_word: GlobalLockWord,
    shareable: ShareableTable,
    registry: ThreadRegistry,
    admin: AdminMutex,
    /// Signalled when the lock word is cleared or an accessor stops touching memory.
    events: Mutex<()>,
    events_cond: Condvar,
    stats: LockStats,
    next_accessor_id: AtomicU32,
}

impl AddressSpace {
    pub fn new(config: AddressSpaceConfig) -> Result<Arc<Self>, ConfigError> {
        config.validate()?;
        info!(
            size = config.address_space_size,
            max_accessors = config.max_accessors,
            writer_granule = config.writer_granule,
            "address space lock initialized"
        );
        Ok(Arc::new(Self {
            lock_word: GlobalLockWord::new(),
            shareable: ShareableTable::new(config.chunk_count()),
            registry: ThreadRegistry::new(config.max_accessors),
            admin: AdminMutex::new(),
            events: Mutex::new(()),
            events_cond: Condvar::new(),
            stats: LockStats::default(),
            next_accessor_id: AtomicU32::new(1),
            config,
        }))
    }

    pub fn config(&self) -> &AddressSpaceConfig {
        &self.config
    }

    /// Current administrative lock word.
    pub fn lock_word(&self) -> LockWord {
        self.lock_word.load()
    }

    pub fn shareable(&self) -> &ShareableTable {
        &self.shareable
    }

    pub fn stats(&self) -> LockStatsSnapshot {
        self.stats.snapshot()
    }

    pub(crate) fn registry(&self) -> &ThreadRegistry {
        &self.registry
    }

    pub(crate) fn admin(&self) -> &AdminMutex {
        &self.admin
    }

    /// Creates the per-thread context for a new emulated CPU thread.
    ///
    /// The accessor starts unregistered; call [`Accessor::passive_lock`] before touching memory.
    pub fn accessor(self: &Arc<Self>) -> Arc<Accessor> {
        let id = self.next_accessor_id.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|this| Accessor::new(self.clone(), id, this.clone()))
    }

    /// Allocates a bare range-lock slot for a thread that is not a passive reader.
    pub fn alloc_range_lock(&self) -> Result<RangeSlotHandle<'_>, LockError> {
        let index = self.registry.alloc_slot(current_thread_token())?;
        Ok(RangeSlotHandle::new(self, index))
    }

    pub fn reader_lock(&self) -> ReaderLock<'_> {
        ReaderLock::new(self)
    }

    pub fn writer_lock(&self, addr: u32) -> WriterLock<'_> {
        WriterLock::new(self, addr)
    }

    /// The passive reader registered by the calling thread, if any.
    pub(crate) fn current_accessor(&self) -> Option<Arc<Accessor>> {
        let me = current_thread_token();
        let weak = self
            .registry
            .readers()
            .iter()
            .find(|entry| entry.owner == me)
            .map(|entry| entry.accessor.clone())?;
        weak.upgrade()
    }

    // ---------------------------------------------------------------------------------------------
    // Range locks
    // ---------------------------------------------------------------------------------------------

    /// Locks `[begin, begin + size)` in `slot` for the duration of one access.
    ///
    /// `res` is the caller's stall indicator, if it has one. `slot` must come from this space
    /// (an accessor's slot or a [`RangeSlotHandle`]). Must be paired with
    /// [`AddressSpace::free_range_lock`].
    ///
    /// If the calling thread is a registered passive reader, it is marked as waiting while the
    /// slow path blocks.
    #[inline]
    pub fn range_lock(&self, res: Option<&AtomicU64>, slot: &RangeSlot, begin: u32, size: u32) {
        self.range_lock_for(None, res, slot, begin, size);
    }

    #[inline]
    pub(crate) fn range_lock_for(
        &self,
        waiter: Option<&Accessor>,
        res: Option<&AtomicU64>,
        slot: &RangeSlot,
        begin: u32,
        size: u32,
    ) {
        debug_assert!(size != 0, "range lock over an empty range");
        debug_assert!(
            AddressRange::new(begin, size).is_in_bounds(),
            "range lock [0x{begin:x}, +0x{size:x}) overflows the address space"
        );
        debug_assert!(slot.is_empty(), "range lock acquired on a slot already in use");
        debug_assert!(
            self.registry.owns(slot),
            "range-lock slot does not belong to this address space"
        );

        if try_range_lock(&self.lock_word, &self.shareable, res, slot, begin, size) {
            return;
        }

        self.range_lock_internal(waiter, res, slot, begin, size);
    }

    /// Releases a range lock taken by either path.
    #[inline]
    pub fn free_range_lock(&self, slot: &RangeSlot) {
        debug_assert!(
            self.registry.owns(slot),
            "range-lock slot does not belong to this address space"
        );
        slot.release();
    }

    #[cold]
    #[inline(never)]
    fn range_lock_internal(
        &self,
        waiter: Option<&Accessor>,
        res: Option<&AtomicU64>,
        slot: &RangeSlot,
        begin: u32,
        size: u32,
    ) {
        self.stats.slow_path_entered();
        trace!(begin, size, "range lock slow path");

        let wait = WaitMark::enter(self, waiter);
        let mut backoff = Backoff::new(self.config.spin_limit, self.config.park_timeout);

        loop {
            let lock = {
                let _stake = self.admin.shared();

                let lock = self.lock_word.load();
                if !conflicts(lock, &self.shareable, begin, size) && stall_bits(res) == 0 {
                    slot.publish(AddressRange::new(begin, size));

                    let new_lock = self.lock_word.load();
                    if stall_bits(res) == 0 && (new_lock.is_idle() || new_lock == lock) {
                        // Back to touching memory before the stake goes.
                        drop(wait);
                        return;
                    }

                    slot.withdraw();
                }
                lock
            };

            self.stats.slow_path_retried();
            self.wait_for_change(lock, &mut backoff);
        }
    }

    fn wait_for_change(&self, lock: LockWord, backoff: &mut Backoff) {
        if !backoff.is_exhausted() {
            backoff.snooze();
            return;
        }

        let guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        if self.lock_word.load() == lock {
            let _ = self
                .events_cond
                .wait_timeout(guard, self.config.park_timeout)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub(crate) fn notify_events(&self) {
        drop(self.events.lock().unwrap_or_else(PoisonError::into_inner));
        self.events_cond.notify_all();
    }

    fn park_on_events(&self) {
        let guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        let _ = self
            .events_cond
            .wait_timeout(guard, self.config.park_timeout)
            .unwrap_or_else(PoisonError::into_inner);
    }

    /// Whether two accesses alias once shareable chunks are folded.
    pub fn ranges_conflict(&self, a: AddressRange, b: AddressRange) -> bool {
        if a.is_empty() || b.is_empty() {
            return false;
        }
        let a_begin = self.shareable.fold(a.begin);
        let b_begin = self.shareable.fold(b.begin);
        a_begin < b_begin + b.size as u64 && b_begin < a_begin + a.size as u64
    }

    /// Number of accessor slots currently publishing a range that aliases `range`.
    pub fn probe(&self, range: AddressRange) -> usize {
        self.registry
            .slots()
            .filter_map(|(_, slot)| slot.load())
            .filter(|held| self.ranges_conflict(*held, range))
            .count()
    }

    // ---------------------------------------------------------------------------------------------
    // Passive readers
    // ---------------------------------------------------------------------------------------------

    /// Registers `accessor` as an active memory accessor on the calling thread.
    ///
    /// Blocks while a whole-space administrative lock is held or pending. A no-op if the accessor is
    /// already registered.
    pub fn passive_lock(&self, accessor: &Accessor) -> Result<(), LockError> {
        let me = current_thread_token();
        if accessor.is_registered() {
            debug_assert_eq!(
                accessor.owner(),
                me,
                "passive_lock on an accessor registered by another thread"
            );
            return Ok(());
        }

        accessor.set_flags(AccessorFlags::WAIT);
        self.notify_events();

        let _stake = self.admin.shared();

        let index = match accessor.slot_index() {
            Some(index) => index,
            None => {
                let index = self.registry.alloc_slot(me).inspect_err(|_| {
                    accessor.clear_flags(AccessorFlags::WAIT);
                })?;
                accessor.set_slot_index(Some(index));
                index
            }
        };
        self.registry.set_slot_owner(index, me);
        accessor.set_owner(me);

        {
            let mut readers = self.registry.readers();
            match readers.iter_mut().find(|entry| entry.is(accessor)) {
                Some(entry) => entry.owner = me,
                None => readers.push(ReaderEntry {
                    owner: me,
                    accessor: accessor.weak(),
                }),
            }
        }

        accessor.clear_flags(AccessorFlags::MEMORY | AccessorFlags::WAIT);
        self.stats.registered();
        debug!(accessor = accessor.id(), slot = index, "accessor registered");
        Ok(())
    }

    /// Unregisters `accessor`. Must be called from the thread that registered it.
    pub fn passive_unlock(&self, accessor: &Accessor) {
        debug_assert!(
            matches!(accessor.owner(), 0) || accessor.owner() == current_thread_token(),
            "passive_unlock called from a thread that does not own the accessor"
        );
        self.unregister(accessor, false);
    }

    /// Unregisters a foreign thread's accessor during thread teardown.
    ///
    /// The owning thread must no longer be touching memory; any range lock it left behind is
    /// cleared.
    pub fn cleanup_unlock(&self, accessor: &Accessor) {
        self.unregister(accessor, true);
    }

    /// Declares that `accessor` is about to block for an unrelated reason.
    ///
    /// Its passive stake is dropped so administrative lockers do not wait on it; the next
    /// [`Accessor::check_state`] re-registers it.
    pub fn temporary_unlock(&self, accessor: &Accessor) {
        if let Some(slot) = accessor.range_slot() {
            debug_assert!(
                slot.is_empty(),
                "accessor {} suspended while holding a range lock",
                accessor.id()
            );
        }

        let previous = accessor.set_flags(AccessorFlags::WAIT);
        if !previous.contains(AccessorFlags::MEMORY) {
            self.registry.readers().retain(|entry| !entry.is(accessor));
            accessor.set_flags(AccessorFlags::MEMORY);
            trace!(accessor = accessor.id(), "accessor temporarily unlocked");
        }

        if !previous.contains(AccessorFlags::WAIT) {
            self.notify_events();
        }
    }

    /// Yields `accessor`'s passive stake if a whole-space writer asked for it, then re-registers.
    pub fn check_state(&self, accessor: &Accessor) -> Result<bool, LockError> {
        if !accessor.flags().contains(AccessorFlags::MEMORY) {
            return Ok(false);
        }
        if accessor.slot_index().is_some() && !accessor.flags().contains(AccessorFlags::WAIT) {
            self.stats.passive_yielded();
            trace!(accessor = accessor.id(), "accessor yielding to a whole-space writer");
        }
        self.temporary_unlock(accessor);
        self.passive_lock(accessor)?;
        Ok(true)
    }

    fn unregister(&self, accessor: &Accessor, foreign: bool) {
        self.registry.readers().retain(|entry| !entry.is(accessor));

        if let Some(index) = accessor.slot_index() {
            let slot = self.registry.slot(index);
            if foreign {
                if let Some(range) = slot.force_clear() {
                    warn!(
                        accessor = accessor.id(),
                        %range,
                        "cleared a range lock left behind by a terminated accessor"
                    );
                }
            } else {
                debug_assert!(
                    slot.is_empty(),
                    "accessor {} unregistered while holding a range lock",
                    accessor.id()
                );
            }
            accessor.set_slot_index(None);
            self.registry.free_slot(index);
        }

        accessor.set_owner(0);
        accessor.set_flags(AccessorFlags::MEMORY);
        accessor.clear_flags(AccessorFlags::WAIT);
        self.notify_events();
        debug!(accessor = accessor.id(), foreign, "accessor unregistered");
    }

    /// Called when an [`Accessor`] is dropped.
    pub(crate) fn release_accessor(&self, accessor: &Accessor) {
        if accessor.slot_index().is_some() {
            self.unregister(accessor, true);
        }
    }

    // ---------------------------------------------------------------------------------------------
    // Administrative locks
    // ---------------------------------------------------------------------------------------------

    /// Lock word an administrative locker installs for `range`.
    ///
    /// Ranges too large for the size field widen to the whole address space.
    pub(crate) fn admin_word(&self, range: AddressRange, kind: LockKind) -> LockWord {
        assert!(!range.is_empty(), "administrative lock over an empty range");
        assert!(range.is_in_bounds(), "administrative lock range {range} overflows");
        if range.size > RANGE_SIZE_MAX {
            return LockWord::whole(kind);
        }

        let begin = if kind.is_blocking() && self.shareable.is_shareable(range.begin) {
            range.begin & crate::shareable::FOLD_MASK
        } else {
            range.begin
        };
        LockWord::new(AddressRange::new(begin, range.size), kind)
    }

    /// Takes the admin mutex exclusively, installs `word` and waits until every accessor it
    /// excludes has drained.
    pub(crate) fn lock_administrative(&self, word: LockWord) {
        self.admin.lock_exclusive();
        self.install_and_drain(word);
    }

    /// Like [`AddressSpace::lock_administrative`], but gives up if the admin mutex cannot be taken
    /// within `timeout`.
    pub(crate) fn try_lock_administrative(&self, word: LockWord, timeout: std::time::Duration) -> bool {
        if !self.admin.lock_exclusive_timeout(timeout) {
            return false;
        }
        self.install_and_drain(word);
        true
    }

    fn install_and_drain(&self, word: LockWord) {
        self.lock_word.install(word);
        let section = AdminSection { space: self, word };
        self.stats.writer_locked();
        debug!(?word, "administrative lock installed");

        let me = current_thread_token();
        if word.is_whole() && word.kind().is_blocking() {
            self.quiesce_passive_readers(me);
        }
        self.drain_slots(word, me);
        // Handed over to the guard.
        std::mem::forget(section);
    }

    pub(crate) fn unlock_administrative(&self, word: LockWord) {
        self.lock_word.clear(word);
        self.admin.unlock_exclusive();
        debug!(?word, "administrative lock released");
        self.notify_events();
    }

    /// Asks every registered passive reader to yield and waits until each one has either
    /// unregistered or stopped touching memory.
    fn quiesce_passive_readers(&self, me: u64) {
        let started = Instant::now();
        let mut warned = false;

        loop {
            let readers: Vec<Arc<Accessor>> = {
                let mut readers = self.registry.readers();
                readers.retain(|entry| entry.accessor.strong_count() > 0);
                readers
                    .iter()
                    .filter_map(|entry| entry.accessor.upgrade())
                    .collect()
            };

            let mut pending = 0usize;
            for reader in &readers {
                let flags = reader.flags();
                if flags.contains(AccessorFlags::WAIT) {
                    continue;
                }
                assert!(
                    reader.owner() != me,
                    "deadlock: whole-space administrative lock requested by the thread driving \
                     accessor {}",
                    reader.id()
                );
                if !flags.contains(AccessorFlags::MEMORY) {
                    reader.set_flags(AccessorFlags::MEMORY);
                }
                pending += 1;
            }
            drop(readers);

            if pending == 0 {
                return;
            }

            if !warned && started.elapsed() >= self.config.stall_warning {
                warn!(
                    pending,
                    "whole-space administrative lock still waiting on passive readers"
                );
                warned = true;
            }
            self.park_on_events();
        }
    }

    /// Waits until no accessor slot holds an access excluded by `word`.
    ///
    /// A `Locked` word waits until nothing overlaps. Other kinds only wait for the accesses that
    /// were already in flight when the word went up; accesses that start afterwards are the unsafe
    /// accesses those kinds allow.
    fn drain_slots(&self, word: LockWord, me: u64) {
        let in_flight: Vec<(usize, u64)> = self
            .registry
            .slots()
            .map(|(index, slot)| (index, slot.raw()))
            .filter(|&(_, bits)| self.slot_conflicts(word, bits))
            .collect();
        if in_flight.is_empty() {
            return;
        }

        let blocking = word.kind().is_blocking();
        let started = Instant::now();
        let mut warned = false;
        let mut backoff = Backoff::new(self.config.spin_limit, self.config.park_timeout);

        loop {
            let busy = self.registry.slots().find_map(|(index, slot)| {
                let bits = slot.raw();
                let waiting = self.slot_conflicts(word, bits)
                    && (blocking || in_flight.contains(&(index, bits)));
                waiting.then_some((index, bits))
            });

            let Some((index, bits)) = busy else {
                return;
            };

            let range = AddressRange::from_slot_bits(bits);
            assert!(
                self.registry.slot_owner(index) != me,
                "deadlock: administrative lock {word:?} requested while this thread holds range \
                 lock {range}"
            );

            if !warned && started.elapsed() >= self.config.stall_warning {
                warn!(slot = index, %range, ?word, "administrative lock waiting on a stalled accessor");
                warned = true;
            }
            backoff.snooze();
        }
    }

    fn slot_conflicts(&self, word: LockWord, bits: u64) -> bool {
        if bits == 0 {
            return false;
        }
        let held = AddressRange::from_slot_bits(bits);
        conflicts(word, &self.shareable, held.begin, held.size)
    }

    // ---------------------------------------------------------------------------------------------
    // Shared mappings
    // ---------------------------------------------------------------------------------------------

    /// Marks every chunk touched by `[begin, begin + size)` as mirroring a shared block.
    pub fn share_range(&self, begin: u32, size: u32) {
        let range = AddressRange::new(begin, size);
        let _lock = WriterLock::with_range(self, range, LockKind::Sharing);
        self.shareable.mark(range);
        debug!(%range, "range registered as shared");
    }

    pub fn unshare_range(&self, begin: u32, size: u32) {
        let range = AddressRange::new(begin, size);
        let _lock = WriterLock::with_range(self, range, LockKind::Sharing);
        self.shareable.unmark(range);
        debug!(%range, "range no longer shared");
    }
}

impl std::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("lock_word", &self.lock_word.load())
            .field("allocated_slots", &self.registry.allocated_slots())
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

/// Installed administrative lock that has not reached its guard yet; released if draining unwinds.
struct AdminSection<'a> {
    space: &'a AddressSpace,
    word: LockWord,
}

impl Drop for AdminSection<'_> {
    fn drop(&mut self) {
        self.space.unlock_administrative(self.word);
    }
}

/// Marks an accessor as not touching memory while the current thread blocks on its behalf.
///
/// With no accessor given, the passive reader registered by the calling thread is marked.
pub(crate) struct WaitMark {
    accessor: Option<Arc<Accessor>>,
}

impl WaitMark {
    pub(crate) fn enter(space: &AddressSpace, accessor: Option<&Accessor>) -> Self {
        let accessor = match accessor {
            Some(accessor) => accessor.weak().upgrade(),
            None => space.current_accessor(),
        }
        .filter(|accessor| {
            !accessor
                .set_flags(AccessorFlags::WAIT)
                .contains(AccessorFlags::WAIT)
        });
        if accessor.is_some() {
            space.notify_events();
        }
        Self { accessor }
    }
}

impl Drop for WaitMark {
    fn drop(&mut self) {
        if let Some(accessor) = self.accessor.take() {
            accessor.clear_flags(AccessorFlags::WAIT);
        }
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::thread;
    use std::time::Duration;

    fn space() -> Arc<AddressSpace> {
        AddressSpace::new(AddressSpaceConfig::default()).unwrap()
    }

    #[test]
    fn passive_lock_is_idempotent() {
        let space = space();
        let accessor = space.accessor();
        assert!(!accessor.is_registered());
        assert!(accessor.flags().contains(AccessorFlags::MEMORY));

        accessor.passive_lock().unwrap();
        let slot = accessor.slot_index();
        accessor.passive_lock().unwrap();
        assert_eq!(accessor.slot_index(), slot);
        assert!(accessor.is_registered());
        assert_eq!(space.stats().registrations, 1);
        assert_eq!(space.registry().readers().len(), 1);

        accessor.passive_unlock();
        assert!(!accessor.is_registered());
        assert!(space.registry().readers().is_empty());
        assert_eq!(space.registry().allocated_slots(), 0);
    }

    #[test]
    fn temporary_unlock_drops_stake_until_check_state() {
        let space = space();
        let accessor = space.accessor();
        accessor.passive_lock().unwrap();

        accessor.temporary_unlock();
        assert!(accessor
            .flags()
            .contains(AccessorFlags::MEMORY | AccessorFlags::WAIT));
        assert!(!accessor.is_registered());
        assert!(space.registry().readers().is_empty());
        // The slot stays with the accessor while it is suspended.
        assert!(accessor.range_slot().is_some());

        assert!(accessor.check_state().unwrap());
        assert!(accessor.is_registered());
        assert!(accessor.flags().is_empty());
        assert!(!accessor.check_state().unwrap());
    }

    #[test]
    fn dropping_an_accessor_returns_its_slot() {
        let space = space();
        let accessor = space.accessor();
        accessor.passive_lock().unwrap();
        assert_eq!(space.registry().allocated_slots(), 1);
        drop(accessor);
        assert_eq!(space.registry().allocated_slots(), 0);
        assert!(space.registry().readers().is_empty());
    }

    #[test]
    fn registry_capacity_is_enforced() {
        let space = AddressSpace::new(AddressSpaceConfig {
            max_accessors: 1,
            ..Default::default()
        })
        .unwrap();
        let first = space.accessor();
        let second = space.accessor();
        first.passive_lock().unwrap();
        assert_eq!(
            second.passive_lock(),
            Err(LockError::RegistryFull { capacity: 1 })
        );
        assert!(!second.is_registered());
    }

    #[test]
    fn slow_path_waits_for_stall_indicator() {
        let space = space();
        let accessor = space.accessor();
        accessor.passive_lock().unwrap();
        accessor.reservation().store(1, Ordering::SeqCst);

        let done = Arc::new(AtomicBool::new(false));
        let worker = {
            let accessor = accessor.clone();
            let done = done.clone();
            thread::spawn(move || {
                let guard = accessor.range_lock(0x1000, 0x10).unwrap();
                done.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!done.load(Ordering::SeqCst));
        accessor.reservation().store(0, Ordering::SeqCst);
        worker.join().unwrap();
        assert!(done.load(Ordering::SeqCst));
        assert_eq!(space.stats().slow_path_entries, 1);
    }

    #[test]
    fn cleanup_unlock_clears_a_foreign_slot() {
        let space = space();
        let accessor = space.accessor();
        {
            let accessor = accessor.clone();
            thread::spawn(move || {
                accessor.passive_lock().unwrap();
                let guard = accessor.range_lock(0x2000, 0x40).unwrap();
                // Simulate the thread dying mid-access.
                std::mem::forget(guard);
            })
            .join()
            .unwrap();
        }
        assert_eq!(space.probe(AddressRange::new(0x2000, 1)), 1);

        space.cleanup_unlock(&accessor);
        assert_eq!(space.probe(AddressRange::new(0x2000, 1)), 0);
        assert!(!accessor.is_registered());
        assert_eq!(space.registry().allocated_slots(), 0);
    }

    #[test]
    fn admin_word_folds_locked_words_in_shared_chunks() {
        let space = space();
        space.share_range(0x2_0000, 0x1_0000);
        let word = space.admin_word(AddressRange::new(0x2_0100, 0x80), LockKind::Locked);
        assert_eq!(word.begin(), 0x0100);
        let word = space.admin_word(AddressRange::new(0x2_0100, 0x80), LockKind::Deallocation);
        assert_eq!(word.begin(), 0x2_0100);
    }

    #[test]
    fn admin_word_widens_oversized_ranges_to_the_whole_space() {
        let space = space();
        let word = space.admin_word(AddressRange::new(0x4000_0000, 0x4000_0000), LockKind::Locked);
        assert!(word.is_whole());
        assert_eq!(word.kind(), LockKind::Locked);
        let word = space.admin_word(AddressRange::new(0, RANGE_SIZE_MAX), LockKind::Sharing);
        assert!(!word.is_whole());
        assert_eq!(word.end(), RANGE_SIZE_MAX as u64);
    }

    #[test]
    fn current_accessor_follows_the_registering_thread() {
        let space = space();
        assert!(space.current_accessor().is_none());

        let accessor = space.accessor();
        accessor.passive_lock().unwrap();
        let found = space.current_accessor().unwrap();
        assert!(Arc::ptr_eq(&found, &accessor));
        drop(found);

        let elsewhere = {
            let space = space.clone();
            thread::spawn(move || space.current_accessor().is_none())
                .join()
                .unwrap()
        };
        assert!(elsewhere);

        accessor.passive_unlock();
        assert!(space.current_accessor().is_none());
    }

    #[test]
    fn slow_path_marks_the_calling_reader_as_waiting() {
        let space = space();
        let accessor = space.accessor();
        accessor.passive_lock().unwrap();
        let slot = accessor.range_slot().unwrap();
        accessor.reservation().store(1, Ordering::SeqCst);

        let watcher = {
            let accessor = accessor.clone();
            thread::spawn(move || {
                while !accessor.flags().contains(AccessorFlags::WAIT) {
                    thread::yield_now();
                }
                accessor.reservation().store(0, Ordering::SeqCst);
            })
        };

        space.range_lock(Some(accessor.reservation()), slot, 0x1000, 0x10);
        watcher.join().unwrap();
        assert!(!accessor.flags().contains(AccessorFlags::WAIT));
        assert!(accessor.is_registered());
        space.free_range_lock(slot);
    }
}
