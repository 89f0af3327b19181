//! Shared harness for the scenario tests: spawn a fixture binary, read its
//! reported marker addresses off stdout, complete the init handshake over
//! the real FIFOs, and hand back a driver handle the individual scenario
//! tests use to send requests and read events.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::process::{Child, Command, Stdio};

use udirt::test_support::{
    read_event, read_response, write_request, Channel, Event, Request, Response, ResponsePayload,
};

pub struct Debuggee {
    pub child: Child,
    pub markers: HashMap<String, u64>,
    pub request: Channel,
    pub response: Channel,
    pub events: Channel,
    pub tid: u64,
}

/// Path to a `src/bin/<name>.rs` fixture built alongside the library, found
/// next to this test binary the way `cargo test` lays out the target dir.
fn fixture_path(name: &str) -> std::path::PathBuf {
    let mut path = std::env::current_exe().expect("current test exe path");
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(name);
    path
}

/// Spawn `fixture`, read its `NAME=0x...` marker lines off stdout until the
/// blank line that ends them, then complete the handshake over the FIFOs
/// rooted at `root_dir`.
pub fn spawn(fixture: &str, root_dir: &std::path::Path) -> Debuggee {
    let mut child = Command::new(fixture_path(fixture))
        .env("UDI_ROOT_DIR", root_dir)
        .env("UDI_TEST_NO_AUTOINIT", "1")
        .stdout(Stdio::piped())
        .spawn()
        .unwrap_or_else(|e| panic!("spawning fixture {}: {}", fixture, e));

    let stdout = child.stdout.take().expect("piped stdout");
    let mut reader = BufReader::new(stdout);
    let mut markers = HashMap::new();
    let wanted = expected_marker_count(fixture);
    while markers.len() < wanted {
        let mut line = String::new();
        let n = reader.read_line(&mut line).expect("reading marker line");
        if n == 0 {
            break;
        }
        let line = line.trim();
        match line.split_once('=') {
            Some((name, hex)) if hex.starts_with("0x") => {
                let addr = u64::from_str_radix(&hex[2..], 16).expect("hex marker address");
                markers.insert(name.to_string(), addr);
            }
            _ => break,
        }
    }

    let (request, response, events, tid) = handshake(root_dir, child.id());

    Debuggee {
        child,
        markers,
        request,
        response,
        events,
        tid,
    }
}

/// Open the three FIFOs rooted at `root_dir/pid` and run the `init`
/// handshake (§4.9 steps 5-6) in debugger order: request opened for write
/// and `Init` sent first (unblocking the debuggee's blocking read), then
/// response and events opened for read, matching the order the debuggee
/// opens its own ends in `lifecycle::initialize`.
fn handshake(root_dir: &std::path::Path, pid: u32) -> (Channel, Channel, Channel, u64) {
    let pid_dir = root_dir.join(pid.to_string());
    let request_path = pid_dir.join(udirt::test_support::REQUEST_FILE_NAME);
    let response_path = pid_dir.join(udirt::test_support::RESPONSE_FILE_NAME);
    let events_path = pid_dir.join(udirt::test_support::EVENTS_FILE_NAME);

    let mut request = Channel::open_write(&request_path).expect("open request channel");
    write_request(&mut request, &Request::Init).expect("write init request");

    let mut response = Channel::open_read(&response_path).expect("open response channel");
    let events = Channel::open_read(&events_path).expect("open events channel");

    let init = read_response(&mut response)
        .expect("read init response")
        .expect("debuggee closed response channel during handshake");
    let tid = match init.payload {
        ResponsePayload::Init { v, tid, .. } => {
            assert_eq!(v, udirt::test_support::PROTOCOL_VERSION);
            tid
        }
        other => panic!("expected init response, got {:?}", other),
    };

    (request, response, events, tid)
}

/// Connect to a process this crate's runtime has already initialized outside
/// of `spawn`, namely a just-forked child (SPEC_FULL.md §8 scenario 5),
/// reinitializing under its own pid with a fresh set of FIFOs under the same
/// `root_dir` (§4.9 "On fork, the child reinitializes the runtime from
/// scratch").
pub struct Attached {
    pub request: Channel,
    pub response: Channel,
    pub events: Channel,
    pub tid: u64,
}

pub fn attach(root_dir: &std::path::Path, pid: u32) -> Attached {
    let (request, response, events, tid) = handshake(root_dir, pid);
    Attached {
        request,
        response,
        events,
        tid,
    }
}

impl Attached {
    pub fn send(&mut self, req: &Request) -> Response {
        write_request(&mut self.request, req).expect("write request");
        read_response(&mut self.response)
            .expect("read response")
            .expect("debuggee closed response channel")
    }

    pub fn next_event(&mut self) -> Event {
        read_event(&mut self.events)
            .expect("read event")
            .expect("debuggee closed events channel")
    }
}

fn expected_marker_count(fixture: &str) -> usize {
    match fixture {
        "udi_fixture_memory" => 2,
        "udi_fixture_fork" => 0,
        _ => 1,
    }
}

impl Debuggee {
    pub fn marker(&self, name: &str) -> u64 {
        *self.markers.get(name).unwrap_or_else(|| panic!("no {} marker reported", name))
    }

    pub fn send(&mut self, req: &Request) -> Response {
        write_request(&mut self.request, req).expect("write request");
        read_response(&mut self.response)
            .expect("read response")
            .expect("debuggee closed response channel")
    }

    pub fn next_event(&mut self) -> Event {
        read_event(&mut self.events)
            .expect("read event")
            .expect("debuggee closed events channel")
    }

    pub fn wait(&mut self) -> std::process::ExitStatus {
        self.child.wait().expect("waiting for fixture to exit")
    }
}
