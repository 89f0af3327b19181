//! Scenario 4 (SPEC_FULL.md §8): read and write a buffer in the debuggee's
//! own address space. Memory access needs no stopped thread (§4.4: this
//! runtime shares the debuggee's address space), so the round trip happens
//! entirely during the handshake-time stop, before the first `continue`.

mod common;

use udirt::test_support::{Event, Request, ResponsePayload};

#[test]
fn memory_round_trips_through_handshake_stop() {
    let root = tempfile::tempdir().expect("tempdir");
    let mut dbg = common::spawn("udi_fixture_memory", root.path());
    let buf = dbg.marker("BUF");

    let resp = dbg.send(&Request::ReadMemory { addr: buf, len: 4 });
    match resp.payload {
        ResponsePayload::ReadMemory(data) => assert_eq!(data, vec![0u8; 4]),
        other => panic!("expected read-memory response, got {:?}", other),
    }

    let written = vec![1u8, 2, 3, 4];
    let resp = dbg.send(&Request::WriteMemory {
        addr: buf,
        data: written.clone(),
    });
    assert!(matches!(resp.payload, ResponsePayload::None));

    let resp = dbg.send(&Request::ReadMemory { addr: buf, len: 4 });
    match resp.payload {
        ResponsePayload::ReadMemory(data) => assert_eq!(data, written),
        other => panic!("expected read-memory response, got {:?}", other),
    }

    dbg.send(&Request::Continue { sig: 0 });

    match dbg.next_event() {
        Event::ProcessExit { code, .. } => assert_eq!(code, 0),
        other => panic!("expected process exit event, got {:?}", other),
    }

    // The exit breakpoint's filesystem teardown and real exit only happen
    // on the next continue (§4.9).
    dbg.send(&Request::Continue { sig: 0 });

    let status = dbg.wait();
    assert_eq!(status.code(), Some(0));
}
