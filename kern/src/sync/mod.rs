//! # Synchronization Primitives.
//!
//! An operating system kernel must coordinate access to shared resources among
//! multiple threads of execution. Kern provides the following primitives:
//!
//! | Primitive             | Blocks Thread? | Typical Use Case                                   |
//! |-----------------------|----------------|----------------------------------------------------|
//! | [`SpinLock`]          | No (busy wait) | Short, uncontended critical sections in the kernel |
//! | [`Mutex`]             | Yes            | Exclusive access to shared data                    |
//! | [`ConditionVariable`] | Yes            | Waiting for a condition to become true             |
//!
//! All lock guards in Kern must be released **explicitly** with `unlock()`.
//! Dropping a guard that is still held is a kernel bug and panics, unless the
//! thread is already being torn down by a fault.

pub mod atomic;
pub mod condition_variable;
pub mod mutex;
pub mod spinlock;

pub use condition_variable::ConditionVariable;
pub use mutex::{Mutex, MutexGuard};
pub use spinlock::{SpinLock, SpinLockGuard, WouldBlock};
