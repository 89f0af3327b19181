//! Signal dispatcher (C6, §4.6).
//!
//! A single `SA_SIGINFO` handler is installed for every catchable signal.
//! Its job is to decide, on every entry, whether this is a memory-access
//! fault being recovered, a breakpoint trap, or something the debugger
//! needs to hear about as a `signal` event, then either returns immediately
//! (recovered fault) or becomes the control thread and runs the request loop
//! (§4.8) until `continue` releases the process.

use std::os::raw::c_int;

use nix::sys::signal::Signal;

use crate::arch::Arch;
use crate::breakpoint::BreakpointKind;
use crate::codec::event::Event;
use crate::errors::RtError;
use crate::registers::Registers;
use crate::thread_coordinator::{self, BarrierOutcome};
use crate::{events, memory, request_engine};

/// Every signal the dispatcher claims (§4.6): "hangup, interrupt, quit,
/// illegal, trap, abort, bus, fpe, usr1, segv, usr2, pipe, alrm, term,
/// stkflt, chld, cont, tstp, ttin, ttou, urg, xcpu, xfsz, vtalrm, prof,
/// winch, io, pwr, sys".
pub const HANDLED_SIGNALS: &[Signal] = &[
    Signal::SIGHUP,
    Signal::SIGINT,
    Signal::SIGQUIT,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGABRT,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGUSR1,
    Signal::SIGSEGV,
    Signal::SIGUSR2,
    Signal::SIGPIPE,
    Signal::SIGALRM,
    Signal::SIGTERM,
    Signal::SIGSTKFLT,
    Signal::SIGCHLD,
    Signal::SIGCONT,
    Signal::SIGTSTP,
    Signal::SIGTTIN,
    Signal::SIGTTOU,
    Signal::SIGURG,
    Signal::SIGXCPU,
    Signal::SIGXFSZ,
    Signal::SIGVTALRM,
    Signal::SIGPROF,
    Signal::SIGWINCH,
    Signal::SIGIO,
    Signal::SIGPWR,
    Signal::SIGSYS,
];

/// One saved application handler per catchable signal, preserved at install
/// time (§4.6: "Application handlers for the same signals are preserved and
/// invoked indirectly").
pub struct SavedHandlers {
    slots: [libc::sigaction; 32],
}

impl SavedHandlers {
    fn empty() -> SavedHandlers {
        SavedHandlers {
            slots: [unsafe { std::mem::zeroed() }; 32],
        }
    }
}

static mut SAVED_HANDLERS: Option<SavedHandlers> = None;

/// Install the library's handler for every signal in [`HANDLED_SIGNALS`],
/// recording each previous disposition so it can be chained to (§4.9 step
/// 4). Must run once, from the constructor, before any other thread starts.
///
/// # Safety
/// Must be called exactly once, before any additional threads exist.
pub unsafe fn install() -> Result<(), RtError> {
    let mut saved = SavedHandlers::empty();

    let mut action: libc::sigaction = std::mem::zeroed();
    action.sa_sigaction = handler_entry as usize;
    action.sa_flags = libc::SA_SIGINFO | libc::SA_RESTART;
    libc::sigfillset(&mut action.sa_mask);

    for sig in HANDLED_SIGNALS {
        let signum = *sig as c_int;
        let mut previous: libc::sigaction = std::mem::zeroed();
        if libc::sigaction(signum, &action, &mut previous) != 0 {
            return Err(RtError::Io(std::io::Error::last_os_error()));
        }
        saved.slots[signum as usize] = previous;
    }

    SAVED_HANDLERS = Some(saved);
    Ok(())
}

/// Replay a previously-pending application signal (§4.8 `continue`:
/// "`kill(self, sig)` is called to replay a pending application signal; 0 =
/// no signal").
pub fn replay_signal(sig: u32) {
    if sig == 0 {
        return;
    }
    let _ = nix::sys::signal::raise(unsafe { std::mem::transmute::<i32, Signal>(sig as i32) });
}

/// The actual `sa_sigaction`-shaped entry point registered with the kernel.
///
/// # Safety
/// Runs in signal-handler context: must only call async-signal-safe
/// functions, or functions this module has specifically validated for that
/// purpose (one-byte pipe I/O, `siglongjmp`, the small CBOR encode path for
/// event payloads; see §5 "Reentrancy" for the accepted simplification).
extern "C" fn handler_entry(signum: c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    unsafe {
        dispatch(signum, info, ctx);
    }
}

unsafe fn dispatch(signum: c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    let signal = match Signal::try_from(signum) {
        Ok(s) => s,
        Err(_) => return,
    };

    if !crate::process_state::is_initialized() {
        forward_to_application(signum, info, ctx);
        return;
    }

    let tid = current_tid();

    let should_forward_pipe = crate::process_state::with(|state| {
        if state.pipe_write_failed && signal == Signal::SIGPIPE {
            state.pipe_write_failed = false;
            true
        } else {
            false
        }
    });
    if should_forward_pipe {
        forward_to_application(signum, info, ctx);
        return;
    }

    let enabled = crate::process_state::with(|state| state.enabled);
    if !enabled && memory::current_access_window().is_none() {
        return;
    }

    if signal == Signal::SIGSEGV || signal == Signal::SIGBUS {
        if let Some((win_addr, win_len)) = memory::current_access_window() {
            let fault_addr = (*info).si_addr() as u64;
            if (fault_addr as usize) >= win_addr && (fault_addr as usize) < win_addr + win_len {
                memory::recover_fault(signum, fault_addr);
            }
        }
    }

    loop {
        match thread_coordinator::enter_barrier(tid) {
            BarrierOutcome::LostRace => return,
            BarrierOutcome::HandedOffControl => {
                // Handed control by a peer's release rather than having won
                // the race on this signal itself: there's no event of our
                // own to report for it, just serve requests and hand the
                // barrier on.
                request_engine::run_until_continue(tid);
                thread_coordinator::exit_barrier(tid);
                continue;
            }
            BarrierOutcome::BecameControlThread => break,
        }
    }

    let regs = capture_registers(ctx);
    handle_as_control_thread(signal, info, tid, regs);

    thread_coordinator::exit_barrier(tid);
}

fn current_tid() -> u64 {
    unsafe { libc::syscall(libc::SYS_gettid) as u64 }
}

fn forward_to_application(signum: c_int, info: *mut libc::siginfo_t, ctx: *mut libc::c_void) {
    unsafe {
        let saved = match &SAVED_HANDLERS {
            Some(s) => &s.slots[signum as usize],
            None => return,
        };
        if saved.sa_sigaction == libc::SIG_DFL || saved.sa_sigaction == libc::SIG_IGN {
            return;
        }
        let f: extern "C" fn(c_int, *mut libc::siginfo_t, *mut libc::c_void) =
            std::mem::transmute(saved.sa_sigaction);
        f(signum, info, ctx);
    }
}

#[cfg(target_arch = "x86_64")]
unsafe fn capture_registers(ctx: *mut libc::c_void) -> Registers {
    let uc = ctx as *mut libc::ucontext_t;
    let mc = &(*uc).uc_mcontext;
    let mut native: libc::user_regs_struct = std::mem::zeroed();
    // `gregs` indices follow glibc's `REG_*` enum for x86_64; copied field
    // by field rather than transmuted wholesale since `mcontext_t`'s layout
    // is not guaranteed identical to `user_regs_struct`.
    native.r8 = mc.gregs[libc::REG_R8 as usize] as u64;
    native.r9 = mc.gregs[libc::REG_R9 as usize] as u64;
    native.r10 = mc.gregs[libc::REG_R10 as usize] as u64;
    native.r11 = mc.gregs[libc::REG_R11 as usize] as u64;
    native.r12 = mc.gregs[libc::REG_R12 as usize] as u64;
    native.r13 = mc.gregs[libc::REG_R13 as usize] as u64;
    native.r14 = mc.gregs[libc::REG_R14 as usize] as u64;
    native.r15 = mc.gregs[libc::REG_R15 as usize] as u64;
    native.rdi = mc.gregs[libc::REG_RDI as usize] as u64;
    native.rsi = mc.gregs[libc::REG_RSI as usize] as u64;
    native.rbp = mc.gregs[libc::REG_RBP as usize] as u64;
    native.rbx = mc.gregs[libc::REG_RBX as usize] as u64;
    native.rdx = mc.gregs[libc::REG_RDX as usize] as u64;
    native.rax = mc.gregs[libc::REG_RAX as usize] as u64;
    native.rcx = mc.gregs[libc::REG_RCX as usize] as u64;
    native.rsp = mc.gregs[libc::REG_RSP as usize] as u64;
    native.rip = mc.gregs[libc::REG_RIP as usize] as u64;
    native.eflags = mc.gregs[libc::REG_EFL as usize] as u64;
    native.cs = mc.gregs[libc::REG_CSGSFS as usize] as u64 & 0xffff;
    Registers::from_native(native)
}

#[cfg(not(target_arch = "x86_64"))]
unsafe fn capture_registers(_ctx: *mut libc::c_void) -> Registers {
    Registers::zeroed(Arch::X86)
}

/// §4.6 steps 4-6, run once the caller has become control thread.
fn handle_as_control_thread(signal: Signal, info: *mut libc::siginfo_t, tid: u64, mut regs: Registers) {
    crate::process_state::with(|state| {
        if let Some(t) = state.find_thread_mut(tid) {
            t.event.context = regs;
            t.event.signal = signal as i32;
            t.event.valid = true;
        }
    });

    let needs_debugger = if signal == Signal::SIGTRAP {
        regs.rewind_pc(1);
        crate::process_state::with(|state| {
            if let Some(t) = state.find_thread_mut(tid) {
                t.event.context = regs;
            }
        });
        handle_trap(tid, regs.pc())
    } else {
        let fault_addr = unsafe { (*info).si_addr() as u64 };
        let ev = Event::Signal {
            tid,
            addr: fault_addr,
            sig: signal as i32 as u32,
        };
        let _ = crate::process_state::with(|state| events::publish_or_escalate(state, ev));
        true
    };

    // A continue-aux hit (§ glossary) is never reported to the debugger, so
    // there's no request coming to release it: resume immediately instead of
    // blocking in the request engine for a command that will never arrive.
    if needs_debugger {
        request_engine::run_until_continue(tid);
    }
}

/// Handles a rewound-PC `SIGTRAP`. Returns whether the hit is one the
/// debugger was told about and must release with a `continue` (`true`), or
/// one the runtime resolves on its own with nothing to wait for (`false`);
/// the aux kinds below, and a foreign `ThreadSpecific` hit, fall in the
/// latter group.
fn handle_trap(tid: u64, addr: u64) -> bool {
    let kind = crate::process_state::with(|state| state.breakpoints.find(addr).map(|b| b.kind));

    match kind {
        None => {
            let _ = crate::process_state::with(|state| {
                events::publish_or_escalate(state, Event::Unknown { tid })
            });
            true
        }
        Some(BreakpointKind::SingleStepAux) => {
            crate::process_state::with(|state| {
                let _ = state.breakpoints.delete(addr);
            });
            let _ = crate::process_state::with(|state| events::publish_or_escalate(state, Event::SingleStep { tid }));
            true
        }
        Some(BreakpointKind::ContinueAux) => {
            // The instruction right after a just-hit breakpoint is also
            // where a single-step issued at that same hit would stop, so
            // the two one-shot breakpoints are the same trap: reinstate the
            // original and, only if the thread is still in single-step mode,
            // tell the debugger this counts as its step too.
            let single_step = crate::process_state::with(|state| {
                let _ = state.breakpoints.delete(addr);
                if let Some(prior) = state.last_hit_breakpoint.take() {
                    let _ = state.breakpoints.reinstall(prior);
                }
                state.continue_aux = None;
                state.find_thread(tid).map(|t| t.single_step).unwrap_or(false)
            });
            if single_step {
                let _ = crate::process_state::with(|state| events::publish_or_escalate(state, Event::SingleStep { tid }));
            }
            single_step
        }
        Some(BreakpointKind::ThreadSpecific { owner_tid }) if owner_tid != tid => {
            // Foreign hit: step the requester over it and let it run,
            // without ever telling the debugger (§4.6 table).
            crate::process_state::with(|state| {
                let _ = state.breakpoints.remove_for_continue(addr);
                state.last_hit_breakpoint = Some(addr);
            });
            install_continue_aux(tid, addr);
            false
        }
        Some(BreakpointKind::EventInternal) => {
            // The entry point is our own wrapper (§4.14: resolved via
            // `dlsym(RTLD_DEFAULT, "exit")`, which finds this process's own
            // exported symbol), so the trap fires before that wrapper's body
            // runs. Pull the trap byte out permanently (this fires once per
            // process) and let the wrapper itself publish the exit event
            // with the real status code and tear down the filesystem layout.
            crate::process_state::with(|state| {
                let _ = state.breakpoints.remove(addr);
                state.exiting = true;
            });
            false
        }
        Some(BreakpointKind::User) | Some(BreakpointKind::ThreadSpecific { .. }) => {
            crate::process_state::with(|state| {
                let _ = state.breakpoints.remove_for_continue(addr);
                state.last_hit_breakpoint = Some(addr);
            });
            let _ = crate::process_state::with(|state| events::publish_or_escalate(state, Event::Breakpoint { tid, addr }));
            install_continue_aux(tid, addr);
            true
        }
    }
}

/// Step-over setup for a just-hit breakpoint (§ glossary "Continue
/// breakpoint (aux)"): `addr`'s trap byte was just restored to the real
/// instruction so the debuggee can execute it again, so a one-shot
/// breakpoint is planted at the control-flow successor instead. When that
/// one fires (`BreakpointKind::ContinueAux` above), `addr`'s trap is
/// reinstated and the debuggee has made it past the original hit exactly
/// once. Left un-set (and `continue_aux` cleared) if the successor can't be
/// decoded; `addr` then simply stays un-trapped until the debugger
/// recreates it.
fn install_continue_aux(tid: u64, addr: u64) {
    let regs = crate::process_state::with(|state| state.find_thread(tid).map(|t| t.event.context));
    let regs = match regs {
        Some(r) => r,
        None => return,
    };

    let successor = match crate::cfs::control_flow_successor(addr, &regs) {
        Ok(a) => a,
        Err(e) => {
            udi_log!(crate::log::LogLevel::LogWarn, "could not plant continue aux past {:#x}: {}", addr, e);
            return;
        }
    };

    crate::process_state::with(|state| {
        state.breakpoints.create(successor, BreakpointKind::ContinueAux);
        if let Err(e) = state.breakpoints.install(successor) {
            udi_log!(crate::log::LogLevel::LogWarn, "could not install continue aux at {:#x}: {}", successor, e);
            return;
        }
        state.continue_aux = Some(successor);
    });
}
