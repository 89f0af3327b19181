//! Scenario 6 (SPEC_FULL.md §8): the debuggee exits directly, with no user
//! breakpoint of its own. The exit entry point breakpoint planted during
//! `initialize()` (§4.9, §4.14) is the only thing reporting the exit.

mod common;

use udirt::test_support::{Event, Request};

#[test]
fn direct_exit_is_reported_with_its_status_code() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut dbg = common::spawn("udi_fixture_exit", root.path());

    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::ProcessExit { code, .. } => assert_eq!(code, 42),
        other => panic!("expected process exit event, got {:?}", other),
    }

    // The exit breakpoint's filesystem teardown and real exit only happen
    // on the next continue (§4.9).
    dbg.send(&Request::Continue { sig: 0 });

    let status = dbg.wait();
    assert_eq!(status.code(), Some(42));
}
