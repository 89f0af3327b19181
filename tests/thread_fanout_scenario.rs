//! Scenario 3 (SPEC_FULL.md §8): several worker threads call the same
//! marker function. `thread_create` notifications and `breakpoint` hits can
//! interleave in any order across threads, so this drains events until the
//! process reports its exit rather than asserting a fixed ordering.

mod common;

use udirt::test_support::{Event, Request};

#[test]
fn worker_threads_fan_out_onto_shared_breakpoint() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut dbg = common::spawn("udi_fixture_threads", root.path());
    let target = dbg.marker("G");

    dbg.send(&Request::CreateBreakpoint { addr: target });
    dbg.send(&Request::InstallBreakpoint { addr: target });
    dbg.send(&Request::Continue { sig: 0 });

    let mut thread_creates = 0;
    let mut breakpoint_hits = 0;
    let mut exited = false;

    for _ in 0..64 {
        match dbg.next_event() {
            Event::ThreadCreate { .. } => {
                thread_creates += 1;
            }
            Event::Breakpoint { addr, .. } => {
                assert_eq!(addr, target);
                breakpoint_hits += 1;
                dbg.send(&Request::Continue { sig: 0 });
            }
            Event::ProcessExit { code, .. } => {
                assert_eq!(code, 0);
                exited = true;
                // The exit breakpoint's filesystem teardown and real exit
                // only happen on the next continue (§4.9).
                dbg.send(&Request::Continue { sig: 0 });
                break;
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    assert!(exited, "process never reported exit");
    assert_eq!(thread_creates, 3);
    assert!(breakpoint_hits >= 1, "expected at least one worker to hit the breakpoint");

    let status = dbg.wait();
    assert_eq!(status.code(), Some(0));
}
