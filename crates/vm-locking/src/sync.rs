//! Atomic type shim and small spin helpers shared by the lock primitives.
//!
//! Under `cfg(all(feature = "loom", test))` the atomics used by the lock word, the shareable table
//! and the accessor slots come from Loom so the publication handshake can be model checked.

#[cfg(all(feature = "loom", test))]
pub(crate) use loom::sync::atomic::{AtomicU64, AtomicU8};
#[cfg(not(all(feature = "loom", test)))]
pub(crate) use std::sync::atomic::{AtomicU64, AtomicU8};

use std::time::Duration;

/// Returns a process-unique token for the calling OS thread.
///
/// Tokens are never reused and never zero, so `0` can be used as "no owner".
pub(crate) fn current_thread_token() -> u64 {
    use std::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering};

    static NEXT_TOKEN: StdAtomicU64 = StdAtomicU64::new(1);

    thread_local! {
        static TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
    }

    TOKEN.with(|token| *token)
}

/// Spin-then-yield-then-sleep backoff for loops polling state that is changed without a
/// notification (accessor slots are released on the hot path and never signal anyone).
pub(crate) struct Backoff {
    step: u32,
    spin_limit: u32,
    park: Duration,
}

impl Backoff {
    pub(crate) fn new(spin_limit: u32, park: Duration) -> Self {
        Self {
            step: 0,
            spin_limit,
            park,
        }
    }

    /// Whether the spin budget is exhausted and callers should block instead of polling.
    pub(crate) fn is_exhausted(&self) -> bool {
        self.step >= self.spin_limit
    }

    pub(crate) fn snooze(&mut self) {
        if self.step < self.spin_limit {
            for _ in 0..(1u32 << self.step.min(6)) {
                std::hint::spin_loop();
            }
        } else if self.step < self.spin_limit.saturating_mul(2) {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.park);
        }
        self.step = self.step.saturating_add(1);
    }
}

#[cfg(all(test, feature = "loom"))]
#[inline]
pub(crate) fn test_yield() {
    loom::thread::yield_now();
}

#[cfg(all(test, not(feature = "loom")))]
#[inline]
pub(crate) fn test_yield() {
    std::thread::yield_now();
}

#[cfg(not(test))]
#[inline]
pub(crate) fn test_yield() {}
