//! Scenario 2 (SPEC_FULL.md §8): arm single-step right after a breakpoint
//! hit and confirm the debuggee stops again one instruction later before
//! the original breakpoint site is ever revisited.

mod common;

use udirt::test_support::{Event, Request, ResponsePayload};

#[test]
fn single_step_fires_once_then_can_be_disarmed() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut dbg = common::spawn("udi_fixture_breakpoint", root.path());
    let target = dbg.marker("F");

    dbg.send(&Request::CreateBreakpoint { addr: target });
    dbg.send(&Request::InstallBreakpoint { addr: target });
    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::Breakpoint { addr, .. } => assert_eq!(addr, target),
        other => panic!("expected breakpoint event, got {:?}", other),
    }

    let resp = dbg.send(&Request::SingleStep { value: true });
    match resp.payload {
        ResponsePayload::SingleStep(previous) => assert!(!previous),
        other => panic!("expected single-step response, got {:?}", other),
    }

    // The continue-aux planted for the breakpoint step-over doubles as the
    // single-step trap: this one `continue` both steps past the breakpoint
    // site and reports the step.
    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::SingleStep { .. } => {}
        other => panic!("expected single-step event, got {:?}", other),
    }

    let resp = dbg.send(&Request::SingleStep { value: false });
    match resp.payload {
        ResponsePayload::SingleStep(previous) => assert!(previous),
        other => panic!("expected single-step response, got {:?}", other),
    }

    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::ProcessExit { code, .. } => assert_eq!(code, 1),
        other => panic!("expected process exit event, got {:?}", other),
    }

    // The exit breakpoint's filesystem teardown and real exit only happen
    // on the next continue (§4.9).
    dbg.send(&Request::Continue { sig: 0 });

    let status = dbg.wait();
    assert_eq!(status.code(), Some(1));
}
