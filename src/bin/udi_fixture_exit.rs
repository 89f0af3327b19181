//! Debuggee fixture for the exit-breakpoint scenario (SPEC_FULL.md §8
//! scenario 6): calls `exit(42)` directly once released, with no breakpoint
//! of its own to hit first.

fn main() {
    udirt::test_support::run_debuggee();
    std::process::exit(42);
}
