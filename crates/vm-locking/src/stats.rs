//! Cold-path counters.
//!
//! Nothing here is touched by the fast path: a shared counter bumped by every access would put all
//! accessors on the same cache line.

use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Default)]
pub(crate) struct LockStats {
    slow_path_entries: AtomicU64,
    slow_path_retries: AtomicU64,
    writer_locks: AtomicU64,
    passive_yields: AtomicU64,
    registrations: AtomicU64,
}

/// Point-in-time copy of the address space's lock counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LockStatsSnapshot {
    /// Range-lock acquisitions that fell back to the slow path.
    pub slow_path_entries: u64,
    /// Validation rounds the slow path had to repeat.
    pub slow_path_retries: u64,
    /// Administrative locks granted.
    pub writer_locks: u64,
    /// Times a running passive reader gave up its stake because a whole-space writer asked it to.
    pub passive_yields: u64,
    /// Successful `passive_lock` registrations.
    pub registrations: u64,
}

impl LockStats {
    pub(crate) fn slow_path_entered(&self) {
        self.slow_path_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn slow_path_retried(&self) {
        self.slow_path_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn writer_locked(&self) {
        self.writer_locks.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn passive_yielded(&self) {
        self.passive_yields.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn registered(&self) {
        self.registrations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> LockStatsSnapshot {
        LockStatsSnapshot {
            slow_path_entries: self.slow_path_entries.load(Ordering::Relaxed),
            slow_path_retries: self.slow_path_retries.load(Ordering::Relaxed),
            writer_locks: self.writer_locks.load(Ordering::Relaxed),
            passive_yields: self.passive_yields.load(Ordering::Relaxed),
            registrations: self.registrations.load(Ordering::Relaxed),
        }
    }
}
