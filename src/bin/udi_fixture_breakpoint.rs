//! Debuggee fixture for the breakpoint and single-step integration scenarios
//! (SPEC_FULL.md §8 scenarios 1-2). `UDI_TEST_NO_AUTOINIT` keeps the library
//! constructor from blocking before `main` runs, so this can report its own
//! marker function's address over stdout before handing control to the real
//! handshake.

use std::io::Write;

#[inline(never)]
fn target_function() -> i32 {
    std::hint::black_box(1)
}

fn main() {
    let addr = target_function as usize as u64;
    println!("F={:#x}", addr);
    std::io::stdout().flush().unwrap();

    udirt::test_support::run_debuggee();

    let code = target_function();
    std::process::exit(code);
}
