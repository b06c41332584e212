//! # Condition Variable.
//!
//! A **Condition Variable** allows a thread to efficiently block until a
//! certain condition is met, without consuming CPU cycles. It is always used
//! in conjunction with a [`Mutex`] that guards access to shared data.
//!
//! ## `ConditionVariable` in Kern
//! Condition variable must work with the shared [`Mutex`]. To enforce this,
//! Kern's [`ConditionVariable`] api takes either [`Mutex`] or [`MutexGuard`] as
//! an argument. This enforces that the apis are called with a mutex, but does
//! not fully ensure that the mutex is the associated one.
//!
//! Kern's condition variables have Mesa semantics: a woken thread re-acquires
//! the mutex and competes with every other thread for it, so by the time it
//! runs the condition may be false again. [`ConditionVariable::wait`] may also
//! return when nobody signaled the condition the caller cares about (for
//! example when several conditions share one variable). Callers therefore
//! always re-check their predicate in a loop. [`ConditionVariable::wait_while`]
//! packages that loop:
//!
//! ```rust,ignore
//! let guard = condvar.wait_while(&mutex, |state| state.is_empty());
//! ```
//!
//! There are two signaling methods that takes the [`MutexGuard`]:
//! - [`ConditionVariable::signal`] wakes **one** waiting thread and
//! - [`ConditionVariable::broadcast`] wakes **all** waiting threads.
//!
//! Both release the guard. A waiter is queued before it releases the mutex,
//! so a signal sent by a mutex holder is never lost.

use super::mutex::{Mutex, MutexGuard};
use super::spinlock::SpinLock;
use crate::thread::{Current, ParkHandle};
use std::collections::VecDeque;

/// A Condition Variable
///
/// Condition variables represent the ability to block a thread such that it
/// consumes no CPU time while waiting for an event to occur. Condition
/// variables are typically associated with a boolean predicate (a condition)
/// and a mutex. The predicate is always verified inside of the mutex before
/// determining that a thread must block.
#[derive(Default)]
pub struct ConditionVariable {
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

impl ConditionVariable {
    /// Creates a new condition variable which is ready to be waited on and
    /// signaled.
    pub const fn new() -> Self {
        Self {
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Number of threads blocked on this condition variable.
    pub fn waiters(&self) -> usize {
        let waiters = self.waiters.lock();
        let len = waiters.len();
        waiters.unlock();
        len
    }

    /// Atomically releases `guard` and blocks until this condition variable
    /// is signaled, then re-acquires the mutex.
    ///
    /// The caller must re-check its predicate after this returns.
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        let mutex = guard.mutex();
        Current::park_with(|handle| {
            let mut waiters = self.waiters.lock();
            waiters.push_back(handle);
            waiters.unlock();
            guard.unlock();
        });
        mutex.lock()
    }

    /// Blocks the current thread while `predicate` returns `true`.
    ///
    /// This function takes reference of a [`Mutex`] and checks the
    /// predicate. If it returns `true`, the thread is blocked and the mutex is
    /// temporarily released. When the thread is signaled and wakes up, it
    /// reacquires the mutex and re-evaluates the predicate. This loop continues
    /// until the predicate returns `false`.
    ///
    /// There is **no need to check the predicate before calling** `wait_while`.
    pub fn wait_while<'a, T>(
        &self,
        mutex: &'a Mutex<T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        let mut guard = mutex.lock();
        while predicate(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes up one blocked thread on this condvar.
    ///
    /// If there is a blocked thread on this condition variable, then it will
    /// be woken up from its call to [`wait`]. Calls to `signal` are not
    /// buffered in any way.
    ///
    /// To wake up all threads, see [`broadcast`].
    ///
    /// [`broadcast`]: ConditionVariable::broadcast
    /// [`wait`]: ConditionVariable::wait
    pub fn signal<T>(&self, guard: MutexGuard<'_, T>) {
        let mut waiters = self.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        guard.unlock();
        if let Some(handle) = next {
            handle.unpark();
        }
    }

    /// Wakes up all blocked threads on this condvar.
    ///
    /// This method will ensure that any current waiters on the condition
    /// variable are awoken. Calls to `broadcast()` are not buffered in any
    /// way.
    ///
    /// To wake up only one thread, see [`signal`].
    ///
    /// [`signal`]: ConditionVariable::signal
    pub fn broadcast<T>(&self, guard: MutexGuard<'_, T>) {
        let mut waiters = self.waiters.lock();
        let woken = core::mem::take(&mut *waiters);
        waiters.unlock();
        guard.unlock();
        for handle in woken {
            handle.unpark();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::ThreadBuilder;
    use std::sync::Arc;

    #[test]
    fn signal_without_waiters() {
        let (mutex, cv) = (Mutex::new(()), ConditionVariable::new());
        cv.signal(mutex.lock());
        cv.broadcast(mutex.lock());
        assert!(!mutex.is_locked());
    }

    #[test]
    fn broadcast_wakes_everyone() {
        let state = Arc::new((Mutex::new(false), ConditionVariable::new()));
        let waiters = (0..6)
            .map(|_| {
                let state = state.clone();
                ThreadBuilder::new("waiter").spawn(move || {
                    let (mutex, cv) = &*state;
                    cv.wait_while(mutex, |ready| !*ready).unlock();
                })
            })
            .collect::<Vec<_>>();
        while state.1.waiters() != 6 {
            std::thread::yield_now();
        }
        let (mutex, cv) = &*state;
        let mut guard = mutex.lock();
        *guard = true;
        cv.broadcast(guard);
        for w in waiters {
            assert_eq!(w.join(), 0);
        }
    }
}
