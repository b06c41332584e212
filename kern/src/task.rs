//! Task trait for interact with the owner of a thread.

/// How a thread left its thread function.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadExit {
    /// The thread function returned, or the thread called
    /// [`Current::exit`] with the given code.
    ///
    /// [`Current::exit`]: crate::thread::Current::exit
    Exited(i32),
    /// The thread faulted (panicked) and was killed.
    Killed,
}

impl ThreadExit {
    /// The exit code observed by [`JoinHandle::join`].
    ///
    /// [`JoinHandle::join`]: crate::thread::JoinHandle::join
    pub fn code(self) -> i32 {
        match self {
            ThreadExit::Exited(code) => code,
            ThreadExit::Killed => -1,
        }
    }
}

/// Represents a **task** executed by a thread.
///
/// A task is the per-thread state a subsystem attaches to a thread, such as a
/// process. The kernel calls the hooks below on the thread that runs the task,
/// so a task can bind itself to the thread on start and tear itself down on
/// exit regardless of how the thread function ended.
pub trait Task: Send {
    /// Called on the new thread before the thread function runs.
    fn on_start(&mut self, _tid: u64) {}

    /// Called on the thread after the thread function finished.
    fn on_exit(&mut self, _exit: ThreadExit) {}
}

impl Task for () {}
