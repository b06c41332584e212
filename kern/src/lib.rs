//! # Kern: a hosted teaching kernel.
//!
//! **Kern** is the platform layer the synchronization projects run on. It
//! provides the primitives a kernel hands to its subsystems: threads that can
//! be parked and unparked, spin locks, sleeping mutexes, condition variables,
//! an errno-style error type and a console logger.
//!
//! Unlike a bare-metal kernel, Kern runs as an ordinary program on the host.
//! Every kernel thread is backed by an OS thread, and parking a kernel thread
//! parks the OS thread. This keeps the scheduling model of a preemptive SMP
//! kernel (threads really do run concurrently and can be interrupted at any
//! instruction) while letting the projects be built and graded with plain
//! `cargo`.
//!
//! ## Project Structure
//!
//! The projects built on top of Kern are:
//!
//! 1. **Traffic Synchronization** – An intersection admission controller that
//!    lets vehicles (threads) cross a shared 4-way intersection without
//!    collisions and without starving any direction.
//! 2. **Process Lifecycle** – The fork/exit/waitpid protocol between a parent
//!    process and its children.
//!
//! The controllers of both projects are state machines driven by their callers.
//! They block callers with the [`Mutex`] and [`ConditionVariable`] from [`sync`]
//! and never run threads of their own.
//!
//! ## Selectively run tests
//!
//! Each grader accepts the names of the test cases to run:
//!
//! ```bash
//! $ cargo run -- intersection::opposite_directions intersection::capacity
//! ```
//!
//! Without arguments, every test case runs. `cargo test` inside a grader runs
//! the whole suite and fails if any case fails.
//!
//! ## Logging
//!
//! Kern logs through the [`log`] facade. Call [`kprint::init`] once to
//! install the console logger; the `KERN_LOG` environment variable selects the
//! level (`off`, `error`, `warn`, `info`, `debug` or `trace`).
//!
//! [`Mutex`]: sync::Mutex
//! [`ConditionVariable`]: sync::ConditionVariable

#![deny(rustdoc::broken_intra_doc_links)]

pub mod kprint;
pub mod sync;
pub mod task;
pub mod thread;

use std::collections::BTreeSet;

pub use task::Task;

/// Represents errors that can occur in the kernel.
///
/// These errors are returned to callers of the kernel entry points to
/// indicate why a request could not be served. Each variant corresponds to
/// an errno value.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum KernelError {
    /// No such process. (ESRCH)
    NoSuchProcess,
    /// No child processes. (ECHILD)
    NoSuchChild,
    /// Resource temporarily unavailable. (EAGAIN)
    TryAgain,
    /// Bad address. (EFAULT)
    BadAddress,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
    /// Invalid system call number. (ENOSYS)
    NoSuchSyscall,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::NoSuchProcess => -3isize,
            KernelError::NoSuchChild => -10,
            KernelError::TryAgain => -11,
            KernelError::BadAddress => -14,
            KernelError::InvalidArgument => -22,
            KernelError::NoSuchSyscall => -38,
        }) as usize
    }
}

impl core::fmt::Display for KernelError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let msg = match self {
            KernelError::NoSuchProcess => "no such process",
            KernelError::NoSuchChild => "no child process with that pid",
            KernelError::TryAgain => "resource temporarily unavailable",
            KernelError::BadAddress => "bad address",
            KernelError::InvalidArgument => "invalid argument",
            KernelError::NoSuchSyscall => "invalid system call number",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for KernelError {}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -3 => Ok(Self::NoSuchProcess),
            -10 => Ok(Self::NoSuchChild),
            -11 => Ok(Self::TryAgain),
            -14 => Ok(Self::BadAddress),
            -22 => Ok(Self::InvalidArgument),
            -38 => Ok(Self::NoSuchSyscall),
            e => Err(TryFromError { e }),
        }
    }
}

// Test utilities
#[doc(hidden)]
pub trait TestCase
where
    Self: Sync + Send,
{
    fn name(&'static self) -> &'static str;
    fn run(&'static self, task: Box<dyn Task>) -> bool;
}

impl<T> TestCase for T
where
    T: Fn() + Send + Sync + 'static,
{
    fn name(&'static self) -> &'static str {
        core::any::type_name::<T>()
    }
    fn run(&'static self, task: Box<dyn Task>) -> bool {
        let name = core::any::type_name::<T>();
        let passed = thread::ThreadBuilder::new(name)
            .attach_task(task)
            .spawn(self)
            .join()
            == 0;
        println!("test {} ... {}", name, if passed { "ok" } else { "FAILED" });
        passed
    }
}

/// Outcome of a [`TestDriver`] run.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct TestReport {
    /// Number of test cases that ran.
    pub total: usize,
    /// Number of test cases that passed.
    pub passed: usize,
}

impl TestReport {
    /// Returns true if no test case failed.
    pub fn is_ok(&self) -> bool {
        self.total == self.passed
    }
}

/// A driver for running tests.
///
/// Every test case runs on its own kernel thread with a fresh `T` attached.
pub struct TestDriver<T: Task + Default + 'static> {
    _t: core::marker::PhantomData<T>,
}

impl<T: Task + Default + 'static> TestDriver<T> {
    /// Run the given tests, selected by the names in `filter`.
    ///
    /// A test is selected when its path, without the leading crate name,
    /// appears in `filter`. An empty filter selects every test.
    pub fn start<const TC: usize>(
        tests: [&'static dyn TestCase; TC],
        filter: &[String],
    ) -> TestReport {
        let tests = if filter.is_empty() {
            tests.iter().collect::<Vec<_>>()
        } else {
            let filter = filter.iter().map(String::as_str).collect::<BTreeSet<_>>();
            tests
                .iter()
                .filter(|test| {
                    let name = test.name();
                    let r = name.split("::").next().map(|n| n.len() + 2).unwrap_or(0);
                    filter.contains(&name[r.min(name.len())..])
                })
                .collect::<Vec<_>>()
        };
        let (total, mut passed) = (tests.len(), 0);
        println!(
            "Running {} test{}",
            total,
            if total == 1 { "" } else { "s" }
        );

        for test in tests {
            if test.run(Box::new(T::default())) {
                passed += 1;
            }
        }
        println!(
            "test result: {}. {} passed; {} failed",
            if total == passed { "ok" } else { "FAILED" },
            passed,
            total - passed
        );
        TestReport { total, passed }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_round_trip() {
        for e in [
            KernelError::NoSuchProcess,
            KernelError::NoSuchChild,
            KernelError::TryAgain,
            KernelError::BadAddress,
            KernelError::InvalidArgument,
            KernelError::NoSuchSyscall,
        ] {
            assert_eq!(KernelError::try_from(e.into_usize() as isize), Ok(e));
        }
        assert!(KernelError::try_from(-4095).is_err());
        // Errno values this kernel never reports.
        assert!(KernelError::try_from(-1).is_err());
        assert!(KernelError::try_from(-12).is_err());
    }

    #[test]
    fn errno_values() {
        assert_eq!(KernelError::NoSuchChild.into_usize() as isize, -10);
        assert_eq!(KernelError::InvalidArgument.into_usize() as isize, -22);
    }
}
