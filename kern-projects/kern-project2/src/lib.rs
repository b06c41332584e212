//! # Project 2: Process Lifecycle
//!
//! A process that creates children with `fork` eventually wants to learn how
//! they ended. A child reports its exit status when it exits, and the parent
//! collects it with `waitpid`. The two sides run concurrently: the child may
//! exit long before the parent asks, or the parent may ask long before the
//! child is done. Either way the parent must observe the status exactly once,
//! and neither side may block forever.
//!
//! This project builds the **lifecycle synchronizer** between a parent and its
//! children on top of [`kern::sync`]:
//!
//! - [`Process`] owns a fixed-size table of its children, guarded by a single
//!   [`Mutex`], and a [`ConditionVariable`] on which the parent sleeps while
//!   it waits for a child.
//! - A child names its parent only by [`Pid`] and resolves it through the
//!   process table, so a child never keeps its parent alive. When the parent
//!   is gone, the child's status is simply discarded.
//! - The [`syscall`] module binds processes to kernel threads and exposes the
//!   `fork`, `_exit`, `waitpid`, `getpid` and `kill` entry points.
//!
//! ## Getting Started
//!
//! To run the test suite, navigate to the `kern-project2/grader` directory and
//! run:
//!
//! ```bash
//! $ cargo run
//! ```
//!
//! [`Process`]: process::Process
//! [`Pid`]: process::Pid
//! [`Mutex`]: kern::sync::Mutex
//! [`ConditionVariable`]: kern::sync::ConditionVariable

#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod process;
pub mod syscall;

pub use process::{Pid, Process};
pub use syscall::{ProcessTask, WaitOptions, WaitStatus};
