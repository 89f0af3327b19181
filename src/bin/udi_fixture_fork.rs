//! Debuggee fixture for the fork notification scenario (SPEC_FULL.md §8
//! scenario 5): the parent forks once, reports the event, and exits; the
//! child reinitializes under its own pid and exits separately. Both ends are
//! driven through the same request/response/events FIFOs rooted at
//! `UDI_ROOT_DIR`, keyed by pid, so the test driver finds the child's
//! channel by watching for the new directory rather than by address.

fn main() {
    udirt::test_support::run_debuggee();

    let pid = unsafe { libc::fork() };
    if pid == 0 {
        std::process::exit(0);
    }
    std::process::exit(0);
}
