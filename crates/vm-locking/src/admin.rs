//! Blocking shared/exclusive lock guarding administrative changes to the address space.
//!
//! This is the "true" lock behind the slow path, passive registration and the scoped guards. It is
//! writer-preferring: once an exclusive locker is waiting, new shared lockers queue behind it.
//! Threads that already hold a shared stake may take another one without queueing, so a reader
//! that hits the slow path while a writer waits does not deadlock against it.
//!
//! Every blocking call checks the calling thread's own holdings first; acquisitions that could
//! only ever deadlock against the caller panic.

use crate::sync::current_thread_token;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Default)]
struct AdminState {
    /// Tokens of every shared holder, one entry per stake.
    shared: Vec<u64>,
    /// Token of the exclusive holder, 0 if none.
    writer: u64,
    writers_waiting: u32,
    /// Token of the shared holder that upgraded (or is upgrading), 0 if none.
    upgrader: u64,
    upgraded: bool,
}

impl AdminState {
    fn holds_shared(&self, token: u64) -> bool {
        self.shared.contains(&token)
    }
}

pub(crate) struct AdminMutex {
    state: Mutex<AdminState>,
    cond: Condvar,
}

impl AdminMutex {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(AdminState::default()),
            cond: Condvar::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, AdminState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, AdminState>) -> MutexGuard<'a, AdminState> {
        self.cond.wait(guard).unwrap_or_else(PoisonError::into_inner)
    }

    /// Takes a shared stake released when the returned value is dropped.
    pub(crate) fn shared(&self) -> SharedStake<'_> {
        self.lock_shared();
        SharedStake { admin: self }
    }

    pub(crate) fn lock_shared(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        assert!(
            st.writer != me,
            "deadlock: shared memory stake requested by the thread holding the administrative lock"
        );

        if !st.holds_shared(me) {
            while st.writer != 0 || st.writers_waiting > 0 || st.upgrader != 0 {
                st = self.wait(st);
            }
        }
        st.shared.push(me);
    }

    /// Non-blocking variant of [`AdminMutex::lock_shared`].
    #[cfg(test)]
    pub(crate) fn try_lock_shared(&self) -> bool {
        let me = current_thread_token();
        let mut st = self.state();
        if st.writer != 0 {
            return false;
        }
        if !st.holds_shared(me) && (st.writers_waiting > 0 || st.upgrader != 0) {
            return false;
        }
        st.shared.push(me);
        true
    }

    pub(crate) fn unlock_shared(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        match st.shared.iter().rposition(|&token| token == me) {
            Some(index) => {
                st.shared.swap_remove(index);
            }
            None => panic!("released a shared memory stake that this thread does not hold"),
        }
        drop(st);
        self.cond.notify_all();
    }

    pub(crate) fn lock_exclusive(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        assert!(
            st.writer != me,
            "deadlock: re-entrant administrative lock on the same thread"
        );
        assert!(
            !st.holds_shared(me),
            "deadlock: administrative lock requested while holding a shared memory stake"
        );

        st.writers_waiting += 1;
        while st.writer != 0 || st.upgrader != 0 || !st.shared.is_empty() {
            st = self.wait(st);
        }
        st.writers_waiting -= 1;
        st.writer = me;
    }

    /// Tries to take the lock exclusively, giving up after `timeout`.
    pub(crate) fn lock_exclusive_timeout(&self, timeout: Duration) -> bool {
        let me = current_thread_token();
        let mut st = self.state();
        assert!(
            st.writer != me && !st.holds_shared(me),
            "deadlock: administrative lock requested by a thread already holding a stake"
        );

        let deadline = std::time::Instant::now() + timeout;
        st.writers_waiting += 1;
        while st.writer != 0 || st.upgrader != 0 || !st.shared.is_empty() {
            let now = std::time::Instant::now();
            if now >= deadline {
                st.writers_waiting -= 1;
                drop(st);
                self.cond.notify_all();
                return false;
            }
            st = self
                .cond
                .wait_timeout(st, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        st.writers_waiting -= 1;
        st.writer = me;
        true
    }

    pub(crate) fn unlock_exclusive(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        debug_assert_eq!(
            st.writer, me,
            "administrative lock released by a thread that does not hold it"
        );
        st.writer = 0;
        drop(st);
        self.cond.notify_all();
    }

    /// Escalates the caller's shared stake to exclusive access without giving it up.
    ///
    /// Waits until every other shared holder is gone. Upgrades take precedence over waiting
    /// writers, which cannot proceed before this stake is released anyway.
    pub(crate) fn upgrade(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        assert!(
            st.holds_shared(me),
            "upgrade requested without holding a shared memory stake"
        );
        if st.upgrader == me {
            return;
        }
        assert!(
            st.upgrader == 0,
            "deadlock: two shared memory stakes upgrading at the same time"
        );

        st.upgrader = me;
        while st.shared.iter().any(|&token| token != me) {
            st = self.wait(st);
        }
        st.upgraded = true;
    }

    /// Drops the exclusive part of an upgraded stake. The shared part is released separately.
    pub(crate) fn downgrade(&self) {
        let me = current_thread_token();
        let mut st = self.state();
        debug_assert!(st.upgraded && st.upgrader == me);
        st.upgrader = 0;
        st.upgraded = false;
        drop(st);
        self.cond.notify_all();
    }

    /// Whether the calling thread holds the lock exclusively.
    pub(crate) fn is_held_exclusive_by_me(&self) -> bool {
        let me = current_thread_token();
        let st = self.state();
        st.writer == me || (st.upgraded && st.upgrader == me)
    }
}

pub(crate) struct SharedStake<'a> {
    admin: &'a AdminMutex,
}

impl Drop for SharedStake<'_> {
    fn drop(&mut self) {
        self.admin.unlock_shared();
    }
}
