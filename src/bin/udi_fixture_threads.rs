//! Debuggee fixture for the thread fan-out scenario (SPEC_FULL.md §8
//! scenario 3): spawns a handful of worker threads that each call the same
//! marker function, then joins them all.

use std::io::Write;

const WORKER_COUNT: usize = 3;

#[inline(never)]
fn worker_function() -> u64 {
    std::hint::black_box(0)
}

fn main() {
    let addr = worker_function as usize as u64;
    println!("G={:#x}", addr);
    std::io::stdout().flush().unwrap();

    udirt::test_support::run_debuggee();

    let handles: Vec<_> = (0..WORKER_COUNT).map(|_| std::thread::spawn(worker_function)).collect();
    for h in handles {
        let _ = h.join();
    }
    std::process::exit(0);
}
