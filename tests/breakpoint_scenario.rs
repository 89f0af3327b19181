//! Scenario 1 (SPEC_FULL.md §8): set a breakpoint on a function, continue
//! past the handshake, observe the hit, release it, and watch the process
//! exit through the interposed `exit` entry point.

mod common;

use udirt::test_support::{Event, Request, ResponsePayload};

const RIP: u16 = 0x10;

#[test]
fn breakpoint_hits_once_and_process_exits_cleanly() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut dbg = common::spawn("udi_fixture_breakpoint", root.path());
    let target = dbg.marker("F");

    let resp = dbg.send(&Request::CreateBreakpoint { addr: target });
    assert!(matches!(resp.payload, ResponsePayload::None));

    let resp = dbg.send(&Request::InstallBreakpoint { addr: target });
    assert!(matches!(resp.payload, ResponsePayload::None));

    // Releases the handshake-time stop so `main` can call `target_function`.
    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::Breakpoint { addr, .. } => assert_eq!(addr, target),
        other => panic!("expected breakpoint event, got {:?}", other),
    }

    let resp = dbg.send(&Request::ReadRegister { reg: RIP });
    match resp.payload {
        ResponsePayload::ReadRegister(pc) => assert_eq!(pc, target),
        other => panic!("expected read-register response, got {:?}", other),
    }

    // Releases the breakpoint hit; the continue-aux step-over and
    // reinstall happen internally with nothing further to wait for.
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
