//! Test suite of the process lifecycle project.
//!
//! `cargo run -- <test names>` runs the selected test cases; without names it
//! runs all of them.

mod lifecycle;
mod syscall;

use kern::TestReport;
use kern_project2::ProcessTask;

fn grade(filter: &[String]) -> TestReport {
    kern::TestDriver::<ProcessTask>::start(
        [
            // Exit and wait.
            &lifecycle::exit_before_wait,
            &lifecycle::wait_before_exit,
            &lifecycle::return_is_exit_zero,
            &lifecycle::wait_twice,
            &lifecycle::wait_for_stranger,
            &lifecycle::bad_options,
            &lifecycle::fault_is_signaled,
            &lifecycle::orphan,
            &lifecycle::children_table_full,
            &lifecycle::exit_wait_race,
            &lifecycle::many_children,
            // System calls.
            &syscall::getpid_unique,
            &syscall::abi_waitpid,
            &syscall::abi_exit,
            &syscall::abi_bad_address,
            &syscall::abi_exit_code,
            &syscall::abi_on_plain_thread,
        ],
        filter,
    )
}

fn main() {
    kern::kprint::init();
    let filter = std::env::args().skip(1).collect::<Vec<_>>();
    if !grade(&filter).is_ok() {
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn grade() {
        kern::kprint::init();
        kern::kprint::set_quiet(true);
        assert!(super::grade(&[]).is_ok());
    }
}
