//! Debuggee fixture for the memory round-trip scenario (SPEC_FULL.md §8
//! scenario 4): reports the address of a writable buffer and a breakpointed
//! marker function, then waits to be driven.

use std::io::Write;

static mut BUFFER: [u8; 4] = [0u8; 4];

#[inline(never)]
fn target_function() {
    std::hint::black_box(());
}

fn main() {
    let func_addr = target_function as usize as u64;
    let buf_addr = unsafe { std::ptr::addr_of!(BUFFER) as u64 };
    println!("F={:#x}", func_addr);
    println!("BUF={:#x}", buf_addr);
    std::io::stdout().flush().unwrap();

    udirt::test_support::run_debuggee();

    target_function();
    std::process::exit(0);
}
