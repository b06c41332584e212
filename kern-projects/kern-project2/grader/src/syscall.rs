use crate::lifecycle::wait;
use grading::assert_exit_code;
use kern::{
    KernelError,
    sync::{SpinLock, atomic::AtomicBool},
};
use kern_project2::{
    Pid, WaitStatus,
    syscall::{SIGKILL, SyscallAbi, SyscallNumber, fork, getpid},
};
use std::sync::Arc;

fn abi(sysno: SyscallNumber, arg1: usize, arg2: usize, arg3: usize) -> SyscallAbi<'static> {
    SyscallAbi {
        sysno: sysno as usize,
        arg1,
        arg2,
        arg3,
        user_status: None,
    }
}

pub fn getpid_unique() {
    let me = getpid().unwrap();
    let seen = Arc::new(SpinLock::new(Vec::new()));
    let mut pids = (0..8)
        .map(|_| {
            let seen = seen.clone();
            fork("child", move || {
                let mut seen = seen.lock();
                seen.push(getpid());
                seen.unlock();
            })
            .unwrap()
        })
        .collect::<Vec<_>>();
    for &pid in &pids {
        assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
    }

    let guard = seen.lock();
    let mut seen = guard.iter().copied().collect::<Result<Vec<_>, _>>().unwrap();
    guard.unlock();
    seen.sort();
    pids.sort();
    assert_eq!(seen, pids);
    assert!(!pids.contains(&me));
    assert_eq!(
        abi(SyscallNumber::GetPid, 0, 0, 0).dispatch(),
        me.into_raw() as isize
    );
}

pub fn abi_waitpid() {
    let pid = fork("child", || kern_project2::syscall::exit(7)).unwrap();
    let mut status = 0;
    let ret = SyscallAbi {
        sysno: SyscallNumber::WaitPid as usize,
        arg1: pid.into_raw() as usize,
        arg2: &raw mut status as usize,
        arg3: 0,
        user_status: Some(&mut status),
    }
    .dispatch();
    assert_eq!(ret, pid.into_raw() as isize);
    assert_eq!(WaitStatus::decode(status), WaitStatus::exited(7));

    // Again, without asking for the status.
    let pid = fork("child", || {}).unwrap();
    let ret = abi(SyscallNumber::WaitPid, pid.into_raw() as usize, 0, 0).dispatch();
    assert_eq!(ret, pid.into_raw() as isize);
    assert_eq!(wait(pid), Err(KernelError::NoSuchChild));
}

pub fn abi_exit() {
    let pid = fork("child", || {
        abi(SyscallNumber::Exit, 13, 0, 0).dispatch();
    })
    .unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::exited(13)));

    let pid = fork("child", || {
        abi(SyscallNumber::Kill, 0, 0, 0).dispatch();
    })
    .unwrap();
    assert_eq!(wait(pid), Ok(WaitStatus::signaled(SIGKILL)));
}

pub fn abi_bad_address() {
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
    // The status address is not mapped.
    let ret = abi(SyscallNumber::WaitPid, pid.into_raw() as usize, 0xdead_0000, 0).dispatch();
    assert_eq!(ret, -14);
    go.store(true);
    assert_eq!(wait(pid), Ok(WaitStatus::exited(0)));
}

/// Decode a raw system call result.
fn decode(ret: isize) -> Result<usize, KernelError> {
    if ret < 0 {
        Err(KernelError::try_from(ret).expect("dispatch returned an unknown errno"))
    } else {
        Ok(ret as usize)
    }
}

pub fn abi_exit_code() {
    // Unknown system call.
    let unknown = SyscallAbi {
        sysno: 0x1234,
        arg1: 0,
        arg2: 0,
        arg3: 0,
        user_status: None,
    };
    assert_eq!(unknown.dispatch(), -38);
    // Not a child.
    assert_eq!(
        decode(abi(SyscallNumber::WaitPid, u64::MAX as usize, 0, 0).dispatch()),
        Err(KernelError::NoSuchChild)
    );
    // Unsupported options.
    let pid = fork("child", || {}).unwrap();
    assert_eq!(
        decode(abi(SyscallNumber::WaitPid, pid.into_raw() as usize, 0, 1).dispatch()),
        Err(KernelError::InvalidArgument)
    );
    assert_eq!(
        decode(abi(SyscallNumber::WaitPid, pid.into_raw() as usize, 0, 0).dispatch()),
        Ok(pid.into_raw() as usize)
    );
    assert_eq!(wait(Pid::new(0)), Err(KernelError::NoSuchChild));
}

#[assert_exit_code(21)]
fn exit_outside_a_process() {
    abi(SyscallNumber::Exit, 21, 0, 0).dispatch();
}

#[assert_exit_code(-1)]
fn kill_outside_a_process() {
    abi(SyscallNumber::Kill, 0, 0, 0).dispatch();
}

#[assert_exit_code(0)]
fn getpid_outside_a_process() {
    assert_eq!(
        decode(abi(SyscallNumber::GetPid, 0, 0, 0).dispatch()),
        Err(KernelError::NoSuchProcess)
    );
}

pub fn abi_on_plain_thread() {
    // A thread without a process still terminates through the ABI.
    exit_outside_a_process();
    kill_outside_a_process();
    getpid_outside_a_process();
}
