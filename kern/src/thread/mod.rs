//! Thread abstration, an abstraction of a cpu core.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with their
//! own stack and local state. In Kern every kernel thread is backed by a host
//! OS thread, so threads are preemptive and truly concurrent.
//!
//! A thread sleeps by *parking*: [`Current::park_with`] hands a one-shot
//! [`ParkHandle`] to a closure (which typically stores it in a wait queue) and
//! then blocks until somebody calls [`ParkHandle::unpark`]. Unparking a thread
//! that has not fallen asleep yet is not lost; the thread simply does not
//! sleep.
//!
//! A thread may carry a [`Task`], the per-thread state of a subsystem. The
//! task is notified when the thread starts and when it exits, whichever way
//! it exits.

use crate::{
    KernelError,
    sync::{SpinLock, atomic::AtomicU64},
    task::{Task, ThreadExit},
};
use std::{
    cell::RefCell,
    collections::BTreeMap,
    panic::AssertUnwindSafe,
    sync::{Arc, OnceLock, atomic::AtomicBool, atomic::Ordering},
};

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is runnable.
    Runnable,
    /// Thread is running.
    Running,
    /// Thread is exited with exitcode.
    Exited(i32),
    /// Thread is parked.
    Parked,
}

static NEXT_TID: AtomicU64 = AtomicU64::new(1);

/// Every thread that has not exited yet, by tid.
static THREADS: SpinLock<BTreeMap<u64, Arc<Thread>>> = SpinLock::new(BTreeMap::new());

thread_local! {
    static CURRENT: RefCell<Option<Arc<Thread>>> = const { RefCell::new(None) };
}

/// Unwinding payload of [`Current::exit`].
struct ExitRequest(i32);

/// Unwinding payload of [`Current::kill`].
struct KillRequest;

/// A kernel thread.
pub struct Thread {
    /// Thread id.
    pub tid: u64,
    /// Thread name.
    pub name: String,
    state: SpinLock<ThreadState>,
    wakeup: AtomicBool,
    os_thread: OnceLock<std::thread::Thread>,
}

impl Thread {
    fn new(name: String) -> Arc<Self> {
        Arc::new(Self {
            tid: NEXT_TID.fetch_add(1),
            name,
            state: SpinLock::new(ThreadState::Runnable),
            wakeup: AtomicBool::new(false),
            os_thread: OnceLock::new(),
        })
    }

    /// Current state of this thread.
    pub fn state(&self) -> ThreadState {
        let guard = self.state.lock();
        let state = *guard;
        guard.unlock();
        state
    }

    fn set_state(&self, state: ThreadState) {
        let mut guard = self.state.lock();
        *guard = state;
        guard.unlock();
    }

    fn register(self: &Arc<Self>) {
        let mut threads = THREADS.lock();
        threads.insert(self.tid, self.clone());
        threads.unlock();
    }

    fn unregister(&self) {
        let mut threads = THREADS.lock();
        threads.remove(&self.tid);
        threads.unlock();
    }
}

/// Get the state of the thread `tid`.
///
/// Returns [`KernelError::NoSuchProcess`] if no live thread has that id.
pub fn get_state_by_tid(tid: u64) -> Result<ThreadState, KernelError> {
    let threads = THREADS.lock();
    let state = threads.get(&tid).map(|th| th.state());
    threads.unlock();
    state.ok_or(KernelError::NoSuchProcess)
}

/// A handle to join thread.
pub struct JoinHandle {
    /// Thread id of this handle.
    pub tid: u64,
    th: Arc<Thread>,
    inner: std::thread::JoinHandle<()>,
}

impl JoinHandle {
    /// Join this handle and returns exit code.
    pub fn join(self) -> i32 {
        match (self.inner.join(), self.th.state()) {
            (Ok(()), ThreadState::Exited(code)) => code,
            _ => -1,
        }
    }

    /// Returns true if the thread has finished.
    pub fn is_finished(&self) -> bool {
        self.inner.is_finished()
    }
}

/// A handle that represent the parked thread.
pub struct ParkHandle {
    th: Arc<Thread>,
}

impl ParkHandle {
    /// Thread id of the parked thread.
    pub fn tid(&self) -> u64 {
        self.th.tid
    }

    /// Consume the handle and unpark the underlying thread.
    pub fn unpark(self) {
        self.th.set_state(ThreadState::Runnable);
        self.th.wakeup.store(true, Ordering::SeqCst);
        if let Some(os_thread) = self.th.os_thread.get() {
            os_thread.unpark();
        }
    }
}

/// Run a function `f` with current thread as an argument.
///
/// A host thread that was not created by [`ThreadBuilder`] (for example the
/// `main` thread) is adopted as a kernel thread on first use.
pub fn with_current<R>(f: impl FnOnce(&Arc<Thread>) -> R) -> R {
    let th = CURRENT.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| {
                let os_thread = std::thread::current();
                let th = Thread::new(os_thread.name().unwrap_or("adopted").to_owned());
                let _ = th.os_thread.set(os_thread);
                th.set_state(ThreadState::Running);
                th.register();
                th
            })
            .clone()
    });
    f(&th)
}

/// The opaque structure indicating the running thread on the current cpu.
pub struct Current {
    _p: (),
}

impl Current {
    /// Run a function `f` with [`ParkHandle`] for current thread, and then park
    /// the current thread.
    ///
    /// Returns once the handle given to `f` has been unparked.
    pub fn park_with(f: impl FnOnce(ParkHandle)) {
        let th = with_current(Arc::clone);
        th.set_state(ThreadState::Parked);
        f(ParkHandle { th: th.clone() });
        while !th.wakeup.swap(false, Ordering::SeqCst) {
            std::thread::park();
        }
        th.set_state(ThreadState::Running);
    }

    /// Exit the current thread with `exit_code`.
    ///
    /// The thread unwinds its stack and its [`Task`] observes
    /// [`ThreadExit::Exited`].
    pub fn exit(exit_code: i32) -> ! {
        std::panic::resume_unwind(Box::new(ExitRequest(exit_code)))
    }

    /// Kill the current thread as if it had faulted.
    ///
    /// The thread unwinds its stack and its [`Task`] observes
    /// [`ThreadExit::Killed`].
    pub fn kill() -> ! {
        std::panic::resume_unwind(Box::new(KillRequest))
    }

    /// Get the current thread's id.
    pub fn get_tid() -> u64 {
        with_current(|th| th.tid)
    }
}

/// A struct to build a new thread.
pub struct ThreadBuilder {
    th: Arc<Thread>,
    task: Box<dyn Task>,
}

impl ThreadBuilder {
    /// Create a new thread builder for thread `name`.
    pub fn new<I>(name: I) -> Self
    where
        String: From<I>,
    {
        Self {
            th: Thread::new(String::from(name)),
            task: Box::new(()),
        }
    }

    /// Attach a task to the thread.
    pub fn attach_task(mut self, task: Box<dyn Task>) -> Self {
        self.task = task;
        self
    }

    /// Get the thread id of this thread.
    pub fn get_tid(&self) -> u64 {
        self.th.tid
    }

    /// Spawn the thread.
    pub fn spawn<F: FnOnce() + Send + 'static>(self, thread_fn: F) -> JoinHandle {
        let Self { th, mut task } = self;
        th.register();

        let child = th.clone();
        let inner = std::thread::Builder::new()
            .name(th.name.clone())
            .spawn(move || {
                let _ = child.os_thread.set(std::thread::current());
                CURRENT.with(|current| *current.borrow_mut() = Some(child.clone()));
                child.set_state(ThreadState::Running);

                task.on_start(child.tid);
                let exit = match std::panic::catch_unwind(AssertUnwindSafe(thread_fn)) {
                    Ok(()) => ThreadExit::Exited(0),
                    Err(payload) => match payload.downcast::<ExitRequest>() {
                        Ok(request) => ThreadExit::Exited(request.0),
                        Err(_) => ThreadExit::Killed,
                    },
                };
                if std::panic::catch_unwind(AssertUnwindSafe(|| task.on_exit(exit))).is_err() {
                    log::error!(
                        "Thread {} ({}) panicked while exiting. Halting.",
                        child.tid,
                        child.name
                    );
                    std::process::abort();
                }
                drop(task);

                child.set_state(ThreadState::Exited(exit.code()));
                child.unregister();
                CURRENT.with(|current| current.borrow_mut().take());
            })
            .unwrap_or_else(|e| panic!("Failed to spawn thread `{}`: {e}", th.name));

        JoinHandle {
            tid: th.tid,
            th,
            inner,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ThreadBuilder::new("ret").spawn(|| {}).join(), 0);
        assert_eq!(ThreadBuilder::new("exit").spawn(|| Current::exit(7)).join(), 7);
        assert_eq!(ThreadBuilder::new("kill").spawn(|| Current::kill()).join(), -1);
    }

    #[test]
    fn unpark_before_park_is_not_lost() {
        Current::park_with(|handle| handle.unpark());
        assert_eq!(get_state_by_tid(Current::get_tid()), Ok(ThreadState::Running));
    }

    #[test]
    fn task_hooks_observe_exit() {
        struct Recorder(Arc<SpinLock<Option<ThreadExit>>>);
        impl Task for Recorder {
            fn on_exit(&mut self, exit: ThreadExit) {
                let mut slot = self.0.lock();
                *slot = Some(exit);
                slot.unlock();
            }
        }

        let seen = Arc::new(SpinLock::new(None));
        ThreadBuilder::new("hooked")
            .attach_task(Box::new(Recorder(seen.clone())))
            .spawn(|| Current::exit(3))
            .join();
        assert_eq!(seen.into_inner_shared(), Some(ThreadExit::Exited(3)));
    }

    #[test]
    fn exited_thread_is_forgotten() {
        let handle = ThreadBuilder::new("short").spawn(|| {});
        let tid = handle.tid;
        assert_eq!(handle.join(), 0);
        assert_eq!(get_state_by_tid(tid), Err(KernelError::NoSuchProcess));
    }
}
