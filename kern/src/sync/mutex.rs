//! # Mutex.
//!
//! Mutex is a synchronization primitive that allows **only one thread at a
//! time** to access a critical section of code, protecting shared resources
//! such as memory, files, or device state from concurrent modification.
//! Unlike the spin lock, it **blocks** threads trying to acquire it if another
//! thread already holds the lock.
//!
//! The [`Mutex`] maintains the list of threads sleeping on the mutex.
//! When unlocking, the kernel **wakes up** one of the waiting threads, which
//! then competes for the lock again. A thread sleeps by calling
//! [`Current::park_with`], which hands a [`ParkHandle`] to a closure before
//! falling asleep.
//!
//! |                | SpinLock                 | Mutex                      |
//! |----------------|--------------------------|----------------------------|
//! | Waiting thread | Spins (busy-waits)       | Sleeps                     |
//! | CPU usage      | High (wastes CPU cycles) | Low (no busy waiting)      |
//! | Overhead       | Low (fast if uncontended)| Higher (due to sleep/wake) |
//!
//! [`Current::park_with`]: crate::thread::Current::park_with

use super::spinlock::{SpinLock, SpinLockGuard, WouldBlock};
use crate::thread::{Current, ParkHandle};
use core::{
    marker::PhantomData,
    ops::{Deref, DerefMut},
};
use std::collections::VecDeque;

/// A mutual exclusion primitive useful for protecting shared data
///
/// This mutex will block threads waiting for the lock to become available.
/// The data can only be accessed through the guards returned from [`lock`]
/// and [`try_lock`], which guarantees that the data is only ever accessed when
/// the mutex is locked.
///
/// [`lock`]: Self::lock
/// [`try_lock`]: Self::try_lock
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use kern::sync::Mutex;
/// use kern::thread::ThreadBuilder;
///
/// let data = Arc::new(Mutex::new(0));
/// let workers = (0..4).map(|_| {
///     let data = Arc::clone(&data);
///     ThreadBuilder::new("work").spawn(move || {
///         let mut guard = data.lock();
///         *guard += 1;
///         // the lock must be "explicitly" unlocked.
///         guard.unlock();
///     })
/// }).collect::<Vec<_>>();
/// for w in workers {
///     w.join();
/// }
/// let guard = data.lock();
/// assert_eq!(*guard, 4);
/// guard.unlock();
/// ```
pub struct Mutex<T> {
    t: SpinLock<T>,
    waiters: SpinLock<VecDeque<ParkHandle>>,
}

unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    /// Creates a new mutex in an unlocked state ready for use.
    #[inline]
    pub const fn new(t: T) -> Mutex<T> {
        Mutex {
            t: SpinLock::new(t),
            waiters: SpinLock::new(VecDeque::new()),
        }
    }

    /// Acquires a mutex, blocking the current thread until it is able to do
    /// so.
    ///
    /// Upon returning, the thread is the only thread with the lock held. The
    /// returned guard must be released with [`MutexGuard::unlock`].
    ///
    /// Locking a mutex in the thread which already holds the lock never
    /// returns.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        loop {
            if let Ok(guard) = self.try_lock() {
                return guard;
            }

            // Retry under the waiter lock so that an unlock racing with us
            // either lets the retry succeed or finds us in the queue.
            let mut acquired = None;
            Current::park_with(|handle| {
                let mut waiters = self.waiters.lock();
                match self.t.try_lock() {
                    Ok(guard) => {
                        acquired = Some(guard);
                        handle.unpark();
                    }
                    Err(WouldBlock) => waiters.push_back(handle),
                }
                waiters.unlock();
            });
            if let Some(guard) = acquired {
                return MutexGuard::new(guard, self);
            }
        }
    }

    /// Attempts to acquire this lock.
    ///
    /// This function does not block.
    ///
    /// # Errors
    ///
    /// If the mutex could not be acquired because it is already locked, then
    /// this call will return the [`WouldBlock`] error.
    pub fn try_lock(&self) -> Result<MutexGuard<'_, T>, WouldBlock> {
        self.t.try_lock().map(|guard| MutexGuard::new(guard, self))
    }

    /// Returns true if some thread holds the mutex right now.
    pub fn is_locked(&self) -> bool {
        self.t.is_locked()
    }

    /// Consumes this mutex, returning the underlying data.
    pub fn into_inner(self) -> T
    where
        T: Sized,
    {
        self.t.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    /// Creates a `Mutex<T>`, with the `Default` value for T.
    fn default() -> Mutex<T> {
        Mutex::new(Default::default())
    }
}

/// An implementation of a "scoped lock" of a mutex. When this structure
/// is dropped (falls out of scope) without unlocking, the panic occurs.
///
/// The lock must be explicitly unlocked by [`unlock`] method.
///
/// This structure is created by the [`lock`] and [`try_lock`] methods on
/// [`Mutex`].
///
/// [`lock`]: Mutex::lock
/// [`try_lock`]: Mutex::try_lock
/// [`unlock`]: MutexGuard::unlock
pub struct MutexGuard<'a, T: 'a> {
    guard: Option<SpinLockGuard<'a, T>>,
    lock: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

unsafe impl<T: Sync> Sync for MutexGuard<'_, T> {}

impl<'a, T> MutexGuard<'a, T> {
    fn new(guard: SpinLockGuard<'a, T>, lock: &'a Mutex<T>) -> Self {
        Self {
            guard: Some(guard),
            lock,
            _not_send: PhantomData,
        }
    }

    /// The mutex this guard locks.
    pub fn mutex(&self) -> &'a Mutex<T> {
        self.lock
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            guard.unlock();
        }
        let mut waiters = self.lock.waiters.lock();
        let next = waiters.pop_front();
        waiters.unlock();
        if let Some(handle) = next {
            handle.unpark();
        }
    }

    /// Releases the underlying [`Mutex`].
    ///
    /// As the guard does **not** automatically release the lock on drop,
    /// the caller must explicitly invoke [`unlock`] to mark the lock
    /// as available again.
    ///
    /// [`unlock`]: MutexGuard::unlock
    pub fn unlock(mut self) {
        self.release();
        core::mem::forget(self);
    }
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut *self.guard.as_mut().unwrap()
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.release();
            return;
        }
        panic!("`.unlock()` must be explicitly called for MutexGuard.");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{ThreadBuilder, ThreadState, get_state_by_tid};
    use std::sync::Arc;

    #[test]
    fn contended_counter() {
        let counter = Arc::new(Mutex::new(0usize));
        let workers = (0..8)
            .map(|_| {
                let counter = counter.clone();
                ThreadBuilder::new("inc").spawn(move || {
                    for _ in 0..200 {
                        let mut guard = counter.lock();
                        *guard += 1;
                        guard.unlock();
                    }
                })
            })
            .collect::<Vec<_>>();
        for w in workers {
            assert_eq!(w.join(), 0);
        }
        assert_eq!(Arc::try_unwrap(counter).ok().unwrap().into_inner(), 1600);
    }

    #[test]
    fn blocked_thread_is_parked() {
        let mutex = Arc::new(Mutex::new(()));
        let guard = mutex.lock();
        let blockee = {
            let mutex = mutex.clone();
            ThreadBuilder::new("blockee").spawn(move || mutex.lock().unlock())
        };
        while get_state_by_tid(blockee.tid) != Ok(ThreadState::Parked) {
            std::thread::yield_now();
        }
        guard.unlock();
        assert_eq!(blockee.join(), 0);
    }
}
