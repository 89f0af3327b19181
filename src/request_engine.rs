//! Request engine (C8, §4.8).
//!
//! Runs on the control thread, after the signal dispatcher has published
//! whatever event brought it here. Reads one request at a time and
//! dispatches by request type, looping until the control thread's own
//! `continue` releases the debuggee. Requests can arrive on the
//! process-wide channel or on any live thread's own per-thread channel
//! (§6); `run_until_continue` multiplexes across all of them at once via
//! `poll(2)` rather than reading the process channel alone, since a
//! thread-scoped request (e.g. `suspend` targeting one specific peer) is
//! routed purely by which channel it arrived on.

use std::os::unix::io::RawFd;

use crate::breakpoint::BreakpointKind;
use crate::cfs;
use crate::codec::request::{read_request, Request};
use crate::codec::response::{write_response, Response, ResponsePayload};
use crate::errors::RequestOutcome;
use crate::memory;
use crate::process_state::{self, ProcessState};
use crate::thread_state::RunState;
use crate::transport::{wait_for_readable, Channel};

/// Process-scope requests operate on `state` directly; thread-scope ones
/// need `tid` to find the right [`crate::thread_state::ThreadState`].
/// `init` is only valid during the handshake in `lifecycle.rs` and is
/// rejected here.
fn dispatch(state: &mut ProcessState, tid: u64, req: &Request) -> RequestOutcome<ResponsePayload> {
    match req {
        Request::Continue { .. } => handle_continue(state, tid),
        Request::ReadMemory { addr, len } => handle_read_memory(*addr, *len),
        Request::WriteMemory { addr, data } => handle_write_memory(*addr, data),
        Request::ReadRegister { reg } => handle_read_register(state, tid, *reg),
        Request::WriteRegister { reg, value } => handle_write_register(state, tid, *reg, *value),
        Request::CreateBreakpoint { addr } => handle_create_breakpoint(state, *addr),
        Request::InstallBreakpoint { addr } => handle_install_breakpoint(state, *addr),
        Request::RemoveBreakpoint { addr } => handle_remove_breakpoint(state, *addr),
        Request::DeleteBreakpoint { addr } => handle_delete_breakpoint(state, *addr),
        Request::State => handle_state(state),
        Request::Suspend => handle_suspend(state, tid),
        Request::Resume => handle_resume(state, tid),
        Request::NextInstruction => handle_next_instruction(state, tid),
        Request::SingleStep { value } => handle_single_step(state, tid, *value),
        Request::Init => RequestOutcome::failure("init is only valid during handshake"),
    }
}

fn handle_continue(state: &mut ProcessState, tid: u64) -> RequestOutcome<ResponsePayload> {
    if state.all_suspended() {
        return RequestOutcome::failure("all threads are suspended");
    }
    if let Some(aux) = state.continue_aux {
        // The pending continue-aux already traps at the single-step
        // successor address; `handle_trap`'s `ContinueAux` arm checks
        // `single_step` itself, so there's nothing extra to arm here.
        if let Err(e) = state.breakpoints.reinstall(aux) {
            return RequestOutcome::Fatal(e);
        }
    } else if state.find_thread(tid).map(|t| t.single_step).unwrap_or(false) {
        if let Err(e) = install_single_step_aux(state, tid) {
            return RequestOutcome::Fatal(e);
        }
    }
    state.threads.retain(|t| !t.dead || t.stack_event_pending);
    RequestOutcome::Success(ResponsePayload::None)
}

/// Plants a one-shot `SingleStepAux` breakpoint at the control-flow
/// successor of `tid`'s last cached PC, for a `continue` issued while
/// single-step is armed but no continue-aux hit is already covering the
/// next trap (e.g. a second `step` in a row). No-op if the thread has no
/// valid cached context yet (nothing to step from).
fn install_single_step_aux(state: &mut ProcessState, tid: u64) -> Result<(), crate::errors::RtError> {
    let regs = match state.find_thread(tid) {
        Some(t) if t.event.valid => t.event.context,
        _ => return Ok(()),
    };

    let successor = cfs::control_flow_successor(regs.pc(), &regs)?;

    state.breakpoints.create(successor, BreakpointKind::SingleStepAux);
    state.breakpoints.install(successor)?;
    if let Some(t) = state.find_thread_mut(tid) {
        t.single_step_aux = Some(successor);
    }
    Ok(())
}

fn handle_read_memory(addr: u64, len: u32) -> RequestOutcome<ResponsePayload> {
    match memory::read_memory(addr, len as usize) {
        Ok(bytes) => RequestOutcome::Success(ResponsePayload::ReadMemory(bytes)),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_write_memory(addr: u64, data: &[u8]) -> RequestOutcome<ResponsePayload> {
    match memory::write_memory(addr, data) {
        Ok(()) => RequestOutcome::Success(ResponsePayload::None),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_read_register(state: &ProcessState, tid: u64, reg: u16) -> RequestOutcome<ResponsePayload> {
    let thread = match state.find_thread(tid) {
        Some(t) => t,
        None => return RequestOutcome::failure("unknown thread"),
    };
    if !thread.event.valid {
        return RequestOutcome::failure("no valid cached register context for this thread");
    }
    match thread.event.context.get_by_tag(reg) {
        RequestOutcome::Success(v) => RequestOutcome::Success(ResponsePayload::ReadRegister(v)),
        RequestOutcome::Failure(m) => RequestOutcome::Failure(m),
        RequestOutcome::Fatal(e) => RequestOutcome::Fatal(e),
    }
}

fn handle_write_register(state: &mut ProcessState, tid: u64, reg: u16, value: u64) -> RequestOutcome<ResponsePayload> {
    let thread = match state.find_thread_mut(tid) {
        Some(t) => t,
        None => return RequestOutcome::failure("unknown thread"),
    };
    if !thread.event.valid {
        return RequestOutcome::failure("no valid cached register context for this thread");
    }
    match thread.event.context.set_by_tag(reg, value) {
        RequestOutcome::Success(()) => RequestOutcome::Success(ResponsePayload::None),
        RequestOutcome::Failure(m) => RequestOutcome::Failure(m),
        RequestOutcome::Fatal(e) => RequestOutcome::Fatal(e),
    }
}

fn handle_create_breakpoint(state: &mut ProcessState, addr: u64) -> RequestOutcome<ResponsePayload> {
    state.breakpoints.create(addr, BreakpointKind::User);
    RequestOutcome::Success(ResponsePayload::None)
}

fn handle_install_breakpoint(state: &mut ProcessState, addr: u64) -> RequestOutcome<ResponsePayload> {
    match state.breakpoints.install(addr) {
        Ok(()) => RequestOutcome::Success(ResponsePayload::None),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_remove_breakpoint(state: &mut ProcessState, addr: u64) -> RequestOutcome<ResponsePayload> {
    match state.breakpoints.remove(addr) {
        Ok(()) => RequestOutcome::Success(ResponsePayload::None),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_delete_breakpoint(state: &mut ProcessState, addr: u64) -> RequestOutcome<ResponsePayload> {
    match state.breakpoints.delete(addr) {
        Ok(()) => RequestOutcome::Success(ResponsePayload::None),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_state(state: &ProcessState) -> RequestOutcome<ResponsePayload> {
    let states = state
        .threads
        .iter()
        .filter(|t| !t.dead)
        .map(|t| (t.tid, t.run_state as u16))
        .collect();
    RequestOutcome::Success(ResponsePayload::State(states))
}

fn handle_suspend(state: &mut ProcessState, tid: u64) -> RequestOutcome<ResponsePayload> {
    match state.find_thread_mut(tid) {
        Some(t) => {
            t.run_state = RunState::Suspended;
            // A peer (not the thread currently holding control) that gets
            // suspended needs to be handed control the next time the
            // control thread releases, rather than simply resumed (§4.7).
            if !t.control_thread {
                t.suspend_pending = true;
            }
            RequestOutcome::Success(ResponsePayload::None)
        }
        None => RequestOutcome::failure("unknown thread"),
    }
}

fn handle_resume(state: &mut ProcessState, tid: u64) -> RequestOutcome<ResponsePayload> {
    match state.find_thread_mut(tid) {
        Some(t) => {
            t.run_state = RunState::Running;
            RequestOutcome::Success(ResponsePayload::None)
        }
        None => RequestOutcome::failure("unknown thread"),
    }
}

fn handle_next_instruction(state: &ProcessState, tid: u64) -> RequestOutcome<ResponsePayload> {
    let thread = match state.find_thread(tid) {
        Some(t) => t,
        None => return RequestOutcome::failure("unknown thread"),
    };
    if !thread.event.valid {
        return RequestOutcome::failure("no valid cached register context for this thread");
    }
    let pc = thread.event.context.pc();
    match cfs::control_flow_successor(pc, &thread.event.context) {
        Ok(addr) => RequestOutcome::Success(ResponsePayload::NextInstruction(addr)),
        Err(e) => RequestOutcome::failure(e.to_string()),
    }
}

fn handle_single_step(state: &mut ProcessState, tid: u64, value: bool) -> RequestOutcome<ResponsePayload> {
    let previous = match state.find_thread(tid) {
        Some(t) => t.single_step,
        None => return RequestOutcome::failure("unknown thread"),
    };

    if !value {
        let aux = state.find_thread(tid).and_then(|t| t.single_step_aux);
        if let Some(addr) = aux {
            if let Err(e) = state.breakpoints.delete(addr) {
                return RequestOutcome::Fatal(e);
            }
        }
        if let Some(t) = state.find_thread_mut(tid) {
            t.single_step_aux = None;
        }
    }

    if let Some(t) = state.find_thread_mut(tid) {
        t.single_step = value;
    }

    RequestOutcome::Success(ResponsePayload::SingleStep(previous))
}

/// Which channel a request was read from, and so which thread it targets
/// (§6): requests carry no `tid` field of their own, so the channel a
/// thread-scoped request arrives on is the only way to know who it's for.
enum ChannelTarget {
    Process,
    Thread(u64),
}

/// Block on the process-wide request channel and every live thread's own
/// request channel at once, serving requests until the control thread's
/// own `continue` arrives, then return so the signal dispatcher can
/// release peers and resume (§4.6 step 6, §4.8).
pub fn run_until_continue(tid: u64) {
    loop {
        let mut targets = Vec::new();
        let mut fds: Vec<RawFd> = Vec::new();

        if let Some(fd) = process_state::with(|state| state.request_channel.as_ref().map(Channel::fd)) {
            targets.push(ChannelTarget::Process);
            fds.push(fd);
        }

        let thread_fds = process_state::with(|state| {
            state
                .threads
                .iter()
                .filter(|t| !t.dead)
                .filter_map(|t| t.request_channel.as_ref().map(|c| (t.tid, c.fd())))
                .collect::<Vec<_>>()
        });
        for (ttid, fd) in thread_fds {
            targets.push(ChannelTarget::Thread(ttid));
            fds.push(fd);
        }

        if fds.is_empty() {
            return;
        }

        let idx = match wait_for_readable(&fds) {
            Ok(idx) => idx,
            Err(_) => return,
        };

        let req = match &targets[idx] {
            ChannelTarget::Process => process_state::with(|state| match state.request_channel.as_mut() {
                Some(ch) => read_request(ch),
                None => Ok(None),
            }),
            ChannelTarget::Thread(ttid) => process_state::with(|state| {
                match state.find_thread_mut(*ttid).and_then(|t| t.request_channel.as_mut()) {
                    Some(ch) => read_request(ch),
                    None => Ok(None),
                }
            }),
        };

        let req = match req {
            Ok(Some(r)) => r,
            // The process channel closing is fatal (§4.2); a per-thread
            // channel reporting EOF just means no debugger has a request
            // queued on it right now, so keep polling everything else.
            Ok(None) => match &targets[idx] {
                ChannelTarget::Process => return,
                ChannelTarget::Thread(_) => continue,
            },
            Err(_) => return,
        };

        let target_tid = match &targets[idx] {
            ChannelTarget::Process => tid,
            ChannelTarget::Thread(ttid) => *ttid,
        };

        let request_type = req.request_type();
        let is_continue = matches!(req, Request::Continue { .. });
        let sig = if let Request::Continue { sig } = &req { *sig } else { 0 };

        let outcome = process_state::with(|state| dispatch(state, target_tid, &req));

        let response = match outcome {
            RequestOutcome::Success(payload) => Response::success(request_type, payload),
            RequestOutcome::Failure(msg) => Response::error(request_type, msg),
            RequestOutcome::Fatal(e) => {
                process_state::with(|state| state.enabled = false);
                Response::error(request_type, e.to_string())
            }
        };

        match &targets[idx] {
            ChannelTarget::Process => {
                let _ = process_state::with(|state| match state.response_channel.as_mut() {
                    Some(ch) => write_response(ch, &response),
                    None => Ok(()),
                });
            }
            ChannelTarget::Thread(ttid) => write_thread_response(*ttid, &response),
        }

        // Only the control thread's own continue ends the loop; a
        // continue arriving for a peer over that peer's own channel just
        // resumes it (handled inside `dispatch`) and servicing carries on.
        if is_continue && target_tid == tid {
            crate::signal_dispatcher::replay_signal(sig);
            return;
        }
    }
}

/// Write a response on thread `ttid`'s own response channel, opening it
/// (blocking, since a writer needs a reader already present) the first
/// time that thread's channel is actually used.
fn write_thread_response(ttid: u64, response: &Response) {
    let needs_open = process_state::with(|state| {
        state.find_thread(ttid).map(|t| t.response_channel.is_none()).unwrap_or(true)
    });
    if needs_open {
        let path = process_state::with(|state| {
            let pid = state.pid;
            state.config.thread_dir(pid as libc::pid_t, ttid).join(crate::config::RESPONSE_FILE_NAME)
        });
        if let Ok(ch) = Channel::open_write(&path) {
            process_state::with(|state| {
                if let Some(t) = state.find_thread_mut(ttid) {
                    t.response_channel = Some(ch);
                }
            });
        }
    }
    let _ = process_state::with(|state| {
        match state.find_thread_mut(ttid).and_then(|t| t.response_channel.as_mut()) {
            Some(ch) => write_response(ch, response),
            None => Ok(()),
        }
    });
}
