//! # Processes and their children.
//!
//! Every [`Process`] keeps a [`ChildTable`] with one [`ChildSlot`] per child
//! it has spawned and not yet collected. A slot goes through three states:
//!
//! ```text
//!   spawn_child           child exits             wait_for_child
//! ──────────────▶ alive ───────────────▶ zombie ─────────────────▶ (free)
//! ```
//!
//! A *zombie* slot holds the exit status of a dead child until the parent
//! collects it. Collecting frees the slot, so a pid can be waited for only
//! once.
//!
//! ## Synchronization
//!
//! The child table, the parent's liveness and every status written into the
//! table are guarded by one [`Mutex`] per process. A child that exits takes
//! its parent's lock, stores its status and broadcasts on the parent's
//! [`ConditionVariable`] while still holding the lock. A waiting parent
//! re-checks the slot each time it wakes up. Since the status is written and
//! checked under the same lock, the status can neither be lost nor observed
//! half-written, whichever side comes first.
//!
//! ## Orphans
//!
//! A child only remembers the [`Pid`] of its parent and looks the parent up in
//! the process table when it exits. A parent that has exited is gone from the
//! table, and a parent that is exiting right now is marked dead under its lock
//! before it discards its table. Either way the child finds out and drops its
//! status.

use crate::syscall::{WaitOptions, WaitStatus};
use kern::{
    KernelError,
    sync::{ConditionVariable, Mutex, SpinLock, atomic::AtomicU64},
};
use std::{
    collections::BTreeMap,
    sync::{Arc, OnceLock},
};

/// Maximum number of uncollected children of a process.
pub const MAX_CHILDREN: usize = 16;

/// Maximum number of processes in the system.
pub const MAX_PROCESSES: usize = 1024;

/// A process id.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Pid(u64);

impl Pid {
    /// Wrap a raw process id.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw process id.
    pub const fn into_raw(self) -> u64 {
        self.0
    }
}

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A child as seen by its parent.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChildSlot {
    /// Pid of the child.
    pub pid: Pid,
    /// False once the child has exited.
    pub alive: bool,
    /// Exit code, or the signal that killed the child if `fatal` is set.
    /// Valid once `alive` is false.
    pub exit_code: i32,
    /// True if the child was killed.
    pub fatal: bool,
}

impl ChildSlot {
    fn status(&self) -> WaitStatus {
        WaitStatus {
            code: self.exit_code,
            fatal: self.fatal,
        }
    }
}

/// The fixed-size table of a process's children.
pub struct ChildTable {
    slots: [Option<ChildSlot>; MAX_CHILDREN],
}

impl ChildTable {
    /// Create an empty table.
    pub const fn new() -> Self {
        Self {
            slots: [None; MAX_CHILDREN],
        }
    }

    /// The slot of child `pid`.
    pub fn find(&self, pid: Pid) -> Option<&ChildSlot> {
        self.slots.iter().flatten().find(|slot| slot.pid == pid)
    }

    /// Record that child `pid` ended with `status`. Returns false if `pid`
    /// has no slot.
    fn mark_exited(&mut self, pid: Pid, status: WaitStatus) -> bool {
        match self.slots.iter_mut().flatten().find(|slot| slot.pid == pid) {
            Some(slot) => {
                slot.alive = false;
                slot.exit_code = status.code;
                slot.fatal = status.fatal;
                true
            }
            None => false,
        }
    }

    /// Returns true if no slot is free.
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Occupy the first free slot with the live child `pid`, returning the
    /// slot index.
    ///
    /// Returns [`KernelError::TryAgain`] if the table is full.
    pub fn insert(&mut self, pid: Pid) -> Result<usize, KernelError> {
        let (index, slot) = self
            .slots
            .iter_mut()
            .enumerate()
            .find(|(_, slot)| slot.is_none())
            .ok_or(KernelError::TryAgain)?;
        *slot = Some(ChildSlot {
            pid,
            alive: true,
            exit_code: 0,
            fatal: false,
        });
        Ok(index)
    }

    /// Free the slot of child `pid` if the child has exited.
    pub fn take_exited(&mut self, pid: Pid) -> Option<ChildSlot> {
        let slot = self
            .slots
            .iter_mut()
            .find(|slot| matches!(slot, Some(s) if s.pid == pid && !s.alive))?;
        slot.take()
    }

    /// Pids of every tracked child, in slot order.
    pub fn pids(&self) -> impl Iterator<Item = Pid> + '_ {
        self.slots.iter().flatten().map(|slot| slot.pid)
    }

    /// Number of tracked children.
    pub fn len(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Returns true if no child is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self) -> Vec<ChildSlot> {
        self.slots.iter_mut().filter_map(Option::take).collect()
    }
}

impl Default for ChildTable {
    fn default() -> Self {
        Self::new()
    }
}

/// State guarded by the children lock of a process.
struct Family {
    alive: bool,
    table: ChildTable,
}

/// A process.
pub struct Process {
    pid: Pid,
    parent: Option<Pid>,
    name: String,
    exit_status: OnceLock<WaitStatus>,
    children: Mutex<Family>,
    child_exited: ConditionVariable,
}

static NEXT_PID: AtomicU64 = AtomicU64::new(1);

static PROCESSES: SpinLock<BTreeMap<Pid, Arc<Process>>> = SpinLock::new(BTreeMap::new());

/// Look up a live process by pid.
pub fn lookup_process(pid: Pid) -> Option<Arc<Process>> {
    let table = PROCESSES.lock();
    let process = table.get(&pid).cloned();
    table.unlock();
    process
}

/// Number of processes that have not exited yet.
pub fn process_count() -> usize {
    let table = PROCESSES.lock();
    let count = table.len();
    table.unlock();
    count
}

fn register_process(process: &Arc<Process>) -> Result<(), KernelError> {
    let mut table = PROCESSES.lock();
    let result = if table.len() >= MAX_PROCESSES {
        Err(KernelError::TryAgain)
    } else {
        table.insert(process.pid, process.clone());
        Ok(())
    };
    table.unlock();
    result
}

fn unregister_process(pid: Pid) {
    let mut table = PROCESSES.lock();
    table.remove(&pid);
    table.unlock();
}

impl Process {
    fn new(name: String, parent: Option<Pid>) -> Arc<Self> {
        Arc::new(Self {
            pid: Pid(NEXT_PID.fetch_add(1)),
            parent,
            name,
            exit_status: OnceLock::new(),
            children: Mutex::new(Family {
                alive: true,
                table: ChildTable::new(),
            }),
            child_exited: ConditionVariable::new(),
        })
    }

    /// Create a process without a parent, such as the first user process.
    ///
    /// Returns [`KernelError::TryAgain`] if the process table is full.
    pub fn new_root<I>(name: I) -> Result<Arc<Self>, KernelError>
    where
        String: From<I>,
    {
        let process = Self::new(String::from(name), None);
        register_process(&process)?;
        log::debug!("process {} ({}) created", process.pid, process.name);
        Ok(process)
    }

    /// Pid of this process.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Pid of the parent, if this process was spawned by another.
    pub fn parent(&self) -> Option<Pid> {
        self.parent
    }

    /// Name of this process.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// How this process ended, once it has exited.
    pub fn exit_status(&self) -> Option<WaitStatus> {
        self.exit_status.get().copied()
    }

    /// Returns true until this process exits.
    pub fn is_alive(&self) -> bool {
        let family = self.children.lock();
        let alive = family.alive;
        family.unlock();
        alive
    }

    /// Pids of the children this process has not collected yet.
    pub fn children(&self) -> Vec<Pid> {
        let family = self.children.lock();
        let pids = family.table.pids().collect();
        family.unlock();
        pids
    }

    /// The slot of child `pid`.
    pub fn child(&self, pid: Pid) -> Option<ChildSlot> {
        let family = self.children.lock();
        let slot = family.table.find(pid).copied();
        family.unlock();
        slot
    }

    /// Create a child of this process.
    ///
    /// The child is registered in the process table and in this process's
    /// children table, or in neither.
    ///
    /// # Errors
    ///
    /// - [`KernelError::TryAgain`]: the children table or the process table is
    ///   full.
    /// - [`KernelError::NoSuchProcess`]: this process has already exited.
    pub fn spawn_child<I>(self: &Arc<Self>, name: I) -> Result<Arc<Process>, KernelError>
    where
        String: From<I>,
    {
        let mut family = self.children.lock();
        let verdict = if !family.alive {
            Err(KernelError::NoSuchProcess)
        } else if family.table.is_full() {
            Err(KernelError::TryAgain)
        } else {
            Ok(())
        };
        let child = verdict.and_then(|()| {
            let child = Self::new(String::from(name), Some(self.pid));
            register_process(&child)?;
            if let Err(e) = family.table.insert(child.pid) {
                unregister_process(child.pid);
                return Err(e);
            }
            Ok(child)
        });
        family.unlock();

        match &child {
            Ok(child) => log::debug!("process {} spawned {} ({})", self.pid, child.pid, child.name),
            Err(e) => log::debug!("process {} cannot spawn a child: {e}", self.pid),
        }
        child
    }

    /// Terminate this process with `code`, or with signal `code` if `fatal`.
    ///
    /// The status is reported to the parent, if the parent is still alive.
    /// The children of this process become orphans and their statuses are
    /// discarded. A process exits once; later calls are ignored.
    ///
    /// # Panics
    ///
    /// Panics if the parent is alive but does not know about this process.
    /// The parent/child links are corrupted and the kernel cannot go on.
    pub fn exit(&self, code: i32, fatal: bool) {
        let status = WaitStatus { code, fatal };
        if self.exit_status.set(status).is_err() {
            log::warn!("process {} exited twice", self.pid);
            return;
        }

        if let Some(ppid) = self.parent {
            match lookup_process(ppid) {
                Some(parent) => parent.child_exited(self.pid, status),
                None => log::warn!(
                    "process {} outlived its parent {ppid}: status {status:?} discarded",
                    self.pid
                ),
            }
        }

        let mut family = self.children.lock();
        family.alive = false;
        let orphans = family.table.clear();
        family.unlock();
        for orphan in orphans.iter().filter(|slot| slot.alive) {
            log::debug!("process {} orphaned by {}", orphan.pid, self.pid);
        }

        unregister_process(self.pid);
        log::info!("process {} ({}) exited: {:?}", self.pid, self.name, status);
    }

    /// Record that child `pid` ended with `status` and wake the waiters.
    fn child_exited(&self, pid: Pid, status: WaitStatus) {
        let mut family = self.children.lock();
        if !family.alive {
            family.unlock();
            log::warn!(
                "process {pid} outlived its parent {}: status {status:?} discarded",
                self.pid
            );
            return;
        }
        if !family.table.mark_exited(pid, status) {
            family.unlock();
            panic!("process {pid} is missing from the children of {}", self.pid);
        }
        self.child_exited.broadcast(family);
    }

    /// Wait until child `pid` exits, then collect its status.
    ///
    /// Returns at once if the child has already exited. Collecting frees the
    /// child's slot.
    ///
    /// # Errors
    ///
    /// - [`KernelError::InvalidArgument`]: `options` is not empty.
    /// - [`KernelError::NoSuchChild`]: `pid` is not an uncollected child of
    ///   this process.
    pub fn wait_for_child(&self, pid: Pid, options: WaitOptions) -> Result<WaitStatus, KernelError> {
        if !options.is_empty() {
            return Err(KernelError::InvalidArgument);
        }

        let mut family = self.children.lock();
        loop {
            match family.table.find(pid).map(|slot| slot.alive) {
                Some(true) => family = self.child_exited.wait(family),
                Some(false) => break,
                // Unknown, or collected by another thread of this process
                // while we slept.
                None => {
                    family.unlock();
                    return Err(KernelError::NoSuchChild);
                }
            }
        }
        let slot = family.table.take_exited(pid);
        family.unlock();

        let status = slot.map(|slot| slot.status()).ok_or(KernelError::NoSuchChild)?;
        log::debug!("process {} collected {pid}: {status:?}", self.pid);
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_slots_are_reused() {
        let mut table = ChildTable::new();
        for raw in 0..MAX_CHILDREN as u64 {
            assert_eq!(table.insert(Pid(raw)), Ok(raw as usize));
        }
        assert!(table.is_full());
        assert_eq!(table.insert(Pid(99)), Err(KernelError::TryAgain));

        // Live children cannot be collected.
        assert_eq!(table.take_exited(Pid(3)), None);
        assert!(table.mark_exited(Pid(3), WaitStatus { code: 5, fatal: false }));
        assert!(!table.mark_exited(Pid(99), WaitStatus { code: 5, fatal: false }));
        assert_eq!(table.take_exited(Pid(3)).map(|s| s.exit_code), Some(5));
        assert_eq!(table.find(Pid(3)), None);
        assert_eq!(table.insert(Pid(99)), Ok(3));
        assert_eq!(table.len(), MAX_CHILDREN);
        assert_eq!(table.clear().len(), MAX_CHILDREN);
        assert!(table.is_empty());
    }

    #[test]
    fn exit_before_wait() {
        let parent = Process::new_root("parent").unwrap();
        let child = parent.spawn_child("child").unwrap();
        assert_eq!(child.parent(), Some(parent.pid()));
        assert_eq!(parent.children(), [child.pid()]);

        child.exit(42, false);
        assert_eq!(lookup_process(child.pid()).map(|p| p.pid()), None);
        assert_eq!(
            parent.child(child.pid()).map(|slot| (slot.alive, slot.exit_code)),
            Some((false, 42))
        );
        assert_eq!(
            parent.wait_for_child(child.pid(), WaitOptions::empty()),
            Ok(WaitStatus { code: 42, fatal: false })
        );
        assert_eq!(
            parent.wait_for_child(child.pid(), WaitOptions::empty()),
            Err(KernelError::NoSuchChild)
        );
        parent.exit(0, false);
    }

    #[test]
    fn status_is_written_once() {
        let process = Process::new_root("once").unwrap();
        process.exit(1, false);
        process.exit(2, true);
        assert_eq!(process.exit_status(), Some(WaitStatus { code: 1, fatal: false }));
        assert!(!process.is_alive());
    }

    #[test]
    fn exited_parent_cannot_spawn() {
        let parent = Process::new_root("gone").unwrap();
        parent.exit(0, false);
        assert_eq!(parent.spawn_child("late").err(), Some(KernelError::NoSuchProcess));
    }

    #[test]
    fn orphan_status_is_discarded() {
        let parent = Process::new_root("parent").unwrap();
        let child = parent.spawn_child("child").unwrap();
        let grandchild = child.spawn_child("grandchild").unwrap();
        child.exit(0, false);
        // Nobody will ever collect it.
        grandchild.exit(7, false);
        assert_eq!(grandchild.exit_status(), Some(WaitStatus { code: 7, fatal: false }));
        assert!(child.children().is_empty());
        assert_eq!(
            parent.wait_for_child(child.pid(), WaitOptions::empty()),
            Ok(WaitStatus { code: 0, fatal: false })
        );
        parent.exit(0, false);
    }

    #[test]
    fn options_are_rejected() {
        let parent = Process::new_root("parent").unwrap();
        let child = parent.spawn_child("child").unwrap();
        assert_eq!(
            parent.wait_for_child(child.pid(), WaitOptions::WNOHANG),
            Err(KernelError::InvalidArgument)
        );
        // Nothing was consumed.
        child.exit(3, false);
        assert_eq!(
            parent
                .wait_for_child(child.pid(), WaitOptions::empty())
                .map(|s| s.code),
            Ok(3)
        );
        parent.exit(0, false);
    }

    #[test]
    fn unknown_child_report_is_fatal() {
        let parent = Process::new_root("parent").unwrap();
        let child = parent.spawn_child("child").unwrap();
        let stranger = Pid::new(u64::MAX);

        let report = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            parent.child_exited(stranger, WaitStatus::exited(0))
        }));
        assert!(report.is_err());
        // The table was unlocked before the kernel gave up, and is untouched.
        assert!(!parent.children.is_locked());
        assert_eq!(parent.children(), [child.pid()]);
        assert_eq!(parent.child(child.pid()).map(|slot| slot.alive), Some(true));

        child.exit(0, false);
        parent.exit(0, false);
    }

    #[test]
    #[should_panic(expected = "is missing from the children of")]
    fn unknown_child_report_panics() {
        let parent = Process::new_root("parent").unwrap();
        parent.child_exited(Pid::new(u64::MAX), WaitStatus::exited(0));
    }
}
