//! Scenario 5 (SPEC_FULL.md §8): the parent reports `process_fork` and
//! blocks like any other breakpoint hit; the child reinitializes from
//! scratch under its own pid with a fresh set of FIFOs. The grandchild
//! process is never reaped here: this test only owns the parent via
//! `Command`, and reaping someone else's child needs more than `std::process`
//! provides, so only the reported exit events are checked.

mod common;

use udirt::test_support::{Event, Request};

#[test]
fn fork_reports_parent_then_reinitializes_child() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut parent = common::spawn("udi_fixture_fork", root.path());

    parent.send(&Request::Continue { sig: 0 });

    let child_pid = match parent.next_event() {
        Event::ProcessFork { pid, .. } => pid,
        other => panic!("expected process fork event, got {:?}", other),
    };

    let mut child = common::attach(root.path(), child_pid);
    child.send(&Request::Continue { sig: 0 });
    match child.next_event() {
        Event::ProcessExit { code, .. } => assert_eq!(code, 0),
        other => panic!("expected child process exit event, got {:?}", other),
    }
    // The exit breakpoint's filesystem teardown and real exit only happen
    // on the next continue (§4.9).
    child.send(&Request::Continue { sig: 0 });

    parent.send(&Request::Continue { sig: 0 });
    match parent.next_event() {
        Event::ProcessExit { code, .. } => assert_eq!(code, 0),
        other => panic!("expected parent process exit event, got {:?}", other),
    }
    parent.send(&Request::Continue { sig: 0 });

    let status = parent.wait();
    assert_eq!(status.code(), Some(0));
}
