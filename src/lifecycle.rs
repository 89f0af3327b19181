//! Lifecycle (C9, §4.9).
//!
//! Initialization runs at library load, before any application code
//! observes the process. The constructor itself is wired up in `lib.rs` via
//! a hand-rolled `.init_array` entry (no `ctor`-style crate appears
//! anywhere in the pack, so this follows the same linker mechanism that
//! crate builds on, rather than adding a dependency purely to avoid one
//! `#[link_section]` block).

use std::os::unix::io::FromRawFd;

use crate::breakpoint::BreakpointKind;
use crate::codec::request::{read_request, Request};
use crate::codec::response::{write_response, Response, ResponsePayload};
use crate::config::{Config, EVENTS_FILE_NAME, REQUEST_FILE_NAME, RESPONSE_FILE_NAME};
use crate::errors::RtError;
use crate::log;
use crate::process_state;
use crate::thread_state::ThreadState;
use crate::transport::Channel;

/// §4.9 steps 1-7, run exactly once per process (and once more per `fork`
/// child, per step "On fork, the child reinitializes the runtime from
/// scratch").
pub fn initialize() -> Result<(), RtError> {
    let config = Config::from_env();
    log::init(config.debug_logging);
    udi_log!(log::LogLevel::LogDebug, "initializing runtime");

    process_state::init(config).map_err(RtError::Io)?;

    unsafe {
        crate::signal_dispatcher::install()?;
    }

    let (exit_entry, root_dir, pid) =
        process_state::with(|state| (state.exit_entry_point, state.root_dir.clone(), state.pid));

    if let Some(addr) = exit_entry {
        process_state::with(|state| {
            state.breakpoints.create(addr, BreakpointKind::EventInternal);
            state.exit_entry_point = Some(addr);
        });
        if let Err(e) = process_state::with(|state| state.breakpoints.install(addr)) {
            udi_log!(log::LogLevel::LogWarn, "could not install exit breakpoint: {}", e);
        }
    }

    std::fs::create_dir_all(&root_dir).map_err(RtError::Io)?;

    let request_path = root_dir.join(REQUEST_FILE_NAME);
    let response_path = root_dir.join(RESPONSE_FILE_NAME);
    let events_path = root_dir.join(EVENTS_FILE_NAME);

    let mut request_channel = Channel::open_read(&request_path)?;
    let initial_tid = unsafe { libc::syscall(libc::SYS_gettid) as u64 };

    match read_request(&mut request_channel)? {
        Some(Request::Init) => {}
        Some(_) => return Err(RtError::Protocol("expected init request during handshake".into())),
        None => return Err(RtError::PeerClosed),
    }

    let response_channel = Channel::open_write(&response_path)?;
    let events_channel = Channel::open_write(&events_path)?;

    let (arch, mt) = process_state::with(|state| (state.arch, state.multithread_capable));

    let init_response = Response::success(
        crate::codec::request::RequestType::Init,
        ResponsePayload::Init {
            v: crate::config::PROTOCOL_VERSION,
            arch: arch as u16,
            mt,
            tid: initial_tid,
        },
    );

    let mut response_channel = response_channel;
    write_response(&mut response_channel, &init_response)?;

    let (pipe_read, pipe_write) =
        nix::unistd::pipe().map_err(|e| RtError::Io(std::io::Error::from_raw_os_error(e as i32)))?;

    process_state::with(|state| {
        let thread = ThreadState::new(initial_tid, state.arch, pipe_read, pipe_write);
        state.threads.push(Box::new(thread));
        state.request_channel = Some(request_channel);
        state.response_channel = Some(response_channel);
        state.events_channel = Some(events_channel);
        state.enabled = true;
    });

    udi_log!(log::LogLevel::LogDebug, "handshake complete, pid={}", pid);

    crate::request_engine::run_until_continue(initial_tid);

    Ok(())
}

/// §4.9: "On `fork`, the child reinitializes the runtime from scratch."
/// Called from the wrapped `fork` entry point once the child side is
/// detected (`pid == 0`).
pub fn reinitialize_after_fork() -> Result<(), RtError> {
    initialize()
}

/// §4.9: "On exit-breakpoint hit... the next `continue` removes the
/// filesystem layout and falls through to the real exit."
pub fn teardown_filesystem_layout() {
    let root_dir = process_state::with(|state| state.root_dir.clone());
    let _ = std::fs::remove_dir_all(&root_dir);
}

/// Called from [`crate::interpose::thread_trampoline`], running on the new
/// thread itself: builds its filesystem layout and per-thread request
/// channel (§6), registers its `ThreadState` under its own real kernel tid,
/// and publishes a `thread_create` event.
pub fn on_thread_created(new_tid: u64, creator_tid: u64) {
    let (pid, arch) = process_state::with(|state| (state.pid, state.arch));
    let thread_dir = process_state::with(|state| state.config.thread_dir(pid as libc::pid_t, new_tid));
    if std::fs::create_dir_all(&thread_dir).is_err() {
        return;
    }

    let request_path = thread_dir.join(REQUEST_FILE_NAME);
    let request_channel = match Channel::open_read_nonblocking(&request_path) {
        Ok(ch) => Some(ch),
        Err(e) => {
            udi_log!(log::LogLevel::LogWarn, "could not open per-thread request channel: {}", e);
            None
        }
    };

    let (pipe_read, pipe_write) = match nix::unistd::pipe() {
        Ok(p) => p,
        Err(_) => return,
    };

    process_state::with(|state| {
        let mut thread = ThreadState::new(new_tid, arch, pipe_read, pipe_write);
        thread.request_channel = request_channel;
        state.threads.push(Box::new(thread));
    });

    let _ = process_state::with(|state| {
        crate::events::publish_or_escalate(
            state,
            crate::codec::event::Event::ThreadCreate {
                tid: creator_tid,
                new_tid,
            },
        )
    });
}

/// Release a pipe fd pair created by this module's helpers; used by tests
/// that don't go through the full lifecycle.
#[cfg(test)]
fn close_pipe(read_fd: i32, write_fd: i32) {
    unsafe {
        let _ = std::fs::File::from_raw_fd(read_fd);
        let _ = std::fs::File::from_raw_fd(write_fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_pipe_does_not_panic() {
        let (r, w) = nix::unistd::pipe().unwrap();
        close_pipe(r, w);
    }
}
