use kern::{
    KernelError,
    sync::atomic::{AtomicBool, AtomicU64},
    thread::{Current, ThreadState, get_state_by_tid},
};
use kern_project2::{
    Pid, Process, WaitOptions, WaitStatus,
    process::{MAX_CHILDREN, lookup_process},
    syscall::{SIGKILL, current, exit, fork, kill_current, waitpid},
};
use std::sync::Arc;

fn me() -> Arc<Process> {
    current().expect("test case must run as a process")
}

/// Collect child `pid` through `waitpid` and decode its status.
pub fn wait(pid: Pid) -> Result<WaitStatus, KernelError> {
    let mut status = 0;
    waitpid(pid, Some(&mut status), 0).map(|collected| {
        assert_eq!(collected, pid);
        WaitStatus::decode(status)
    })
}

fn until_exited(pid: Pid) {
    while me().child(pid).is_some_and(|slot| slot.alive) {
        std::thread::yield_now();
    }
}

pub fn exit_before_wait() {
    let pid = fork("child", || exit(42)).unwrap();
    until_exited(pid);
    assert_eq!(me().child(pid).map(|slot| slot.exit_code), Some(42));
    assert_eq!(wait(pid), Ok(WaitStatus::exited(42)));
}

pub fn wait_before_exit() {
    let parent = Current::get_tid();
    let pid = fork("child", move || {
        // Exit only once the parent sleeps in waitpid.
        while get_state_by_tid(parent) != Ok(ThreadState::Parked) {
            std::thread::yield_now();
        }
        exit(42)
    })
    .unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::exited(42)));
}

pub fn return_is_exit_zero() {
    let pid = fork("child", || {}).unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
}

pub fn wait_twice() {
    let pid = fork("child", || exit(1)).unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::exited(1)));
    assert_eq!(wait(pid), Err(KernelError::NoSuchChild));
}

pub fn wait_for_stranger() {
    assert_eq!(wait(Pid::new(u64::MAX)), Err(KernelError::NoSuchChild));
    assert_eq!(wait(me().pid()), Err(KernelError::NoSuchChild));

    // A grandchild is not a child.
    let grandchild = Arc::new(AtomicU64::new(0));
    let go = Arc::new(AtomicBool::new(false));
    let pid = {
        let (grandchild, go) = (grandchild.clone(), go.clone());
        fork("child", move || {
            let pid = fork("grandchild", move || {
                while !go.load() {
                    std::thread::yield_now();
                }
            })
            .unwrap_or_else(|_| exit(1));
            grandchild.store(pid.into_raw());
            if wait(pid) != Ok(WaitStatus::exited(0)) {
                exit(2);
            }
        })
        .unwrap()
    };
    while grandchild.load() == 0 {
        std::thread::yield_now();
    }
    assert_eq!(
        wait(Pid::new(grandchild.load())),
        Err(KernelError::NoSuchChild)
    );
    go.store(true);
    assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
}

pub fn bad_options() {
    let go = Arc::new(AtomicBool::new(false));
    let pid = {
        let go = go.clone();
        fork("child", move || {
            while !go.load() {
                std::thread::yield_now();
            }
        })
        .unwrap()
    };
    assert_eq!(
        waitpid(pid, None, WaitOptions::WNOHANG.bits()),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(waitpid(pid, None, 1 << 7), Err(KernelError::InvalidArgument));
    // The failed calls left the child alone.
    assert!(me().child(pid).is_some());
    go.store(true);
    assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
}

pub fn fault_is_signaled() {
    let pid = fork("faulty", || panic!("the child faults")).unwrap();
    let status = wait(pid);
    assert_eq!(status, Ok(WaitStatus::signaled(SIGKILL)));
    assert_eq!(status.map(|s| s.term_signal()), Ok(Some(SIGKILL)));

    let pid = fork("killed", || kill_current()).unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::signaled(SIGKILL)));
}

pub fn orphan() {
    let grandchild = Arc::new(AtomicU64::new(0));
    let go = Arc::new(AtomicBool::new(false));
    let pid = {
        let (grandchild, go) = (grandchild.clone(), go.clone());
        fork("child", move || {
            let pid = fork("grandchild", move || {
                while !go.load() {
                    std::thread::yield_now();
                }
                exit(5)
            })
            .unwrap_or_else(|_| exit(1));
            grandchild.store(pid.into_raw());
            // Leave without waiting.
        })
        .unwrap()
    };
    assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));

    let orphan = Pid::new(grandchild.load());
    let process = lookup_process(orphan).expect("the grandchild is still running");
    assert_eq!(process.parent(), Some(pid));
    go.store(true);
    while lookup_process(orphan).is_some() {
        std::thread::yield_now();
    }
    // The status went nowhere, and nothing broke.
    assert_eq!(process.exit_status(), Some(WaitStatus::exited(5)));
    assert!(me().children().is_empty());
}

pub fn children_table_full() {
    let go = Arc::new(AtomicBool::new(false));
    let pids = (0..MAX_CHILDREN)
        .map(|_| {
            let go = go.clone();
            fork("sleeper", move || {
                while !go.load() {
                    std::thread::yield_now();
                }
            })
            .unwrap()
        })
        .collect::<Vec<_>>();

    assert_eq!(fork("one too many", || {}), Err(KernelError::TryAgain));
    assert_eq!(me().children(), pids);

    go.store(true);
    for pid in pids {
        assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
    }
    // Collected slots are reused.
    let pid = fork("again", || exit(3)).unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::exited(3)));
}

pub fn exit_wait_race() {
    for i in 0..300 {
        let pid = fork("racer", move || {
            for _ in 0..i % 7 {
                std::thread::yield_now();
            }
            exit(i)
        })
        .unwrap();
        for _ in 0..i % 5 {
            std::thread::yield_now();
        }
        assert_eq!(wait(pid), Ok(WaitStatus::exited(i)));
    }
}

pub fn many_children() {
    // Every child spawns its own children, waits for them in reverse order
    // and exits with the number of statuses that matched.
    let pids = (0..4)
        .map(|_| {
            fork("parent", || {
                let pids = (0..8)
                    .map(|code| fork("leaf", move || exit(code)).map(|pid| (pid, code)))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap_or_else(|_| exit(-1));
                let matched = pids
                    .into_iter()
                    .rev()
                    .filter(|&(pid, code)| wait(pid) == Ok(WaitStatus::exited(code)))
                    .count();
                exit(matched as i32)
            })
            .unwrap()
        })
        .collect::<Vec<_>>();
    for pid in pids {
        assert_eq!(wait(pid), Ok(WaitStatus::exited(8)));
    }
}
