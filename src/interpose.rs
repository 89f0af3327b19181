//! Wrapped libc entry points (§4.9 step 2, §4.9 "On fork...").
//!
//! Exported under the same names as the libc symbols they shadow, the usual
//! dynamic-linker interposition trick: once this library is loaded ahead of
//! libc in the debuggee's symbol search order, calls the debuggee makes to
//! `fork`, `pthread_create` and `exit` land here first. Each wrapper resolves
//! and calls straight through to the real symbol (looked up once, at
//! constructor time, into [`crate::process_state::ProcessState::symbols`])
//! before or after doing whatever bookkeeping the event it represents needs.

use std::os::raw::c_void;

use crate::log;
use crate::process_state;
use crate::thread_coordinator::BarrierOutcome;

/// `fork()`: the child reinitializes the runtime from scratch (§4.9); the
/// parent reports `process_fork` synchronously and blocks for a command
/// before returning the child pid to its own caller, exactly as an ordinary
/// breakpoint hit blocks the thread that took it.
#[no_mangle]
pub unsafe extern "C" fn fork() -> libc::pid_t {
    let real_fork = process_state::with(|state| state.symbols.fork);
    let real_fork = match real_fork {
        Some(f) => f,
        None => {
            udi_log!(log::LogLevel::LogError, "real fork() could not be resolved");
            return -1;
        }
    };

    let child = real_fork();

    if child == 0 {
        if let Err(e) = crate::lifecycle::reinitialize_after_fork() {
            udi_log!(log::LogLevel::LogError, "failed to reinitialize after fork: {}", e);
        }
        return 0;
    }

    let tid = unsafe { libc::syscall(libc::SYS_gettid) as u64 };

    loop {
        match crate::thread_coordinator::enter_barrier(tid) {
            BarrierOutcome::LostRace => return child,
            BarrierOutcome::HandedOffControl => {
                // Handed control by a peer's release rather than having won
                // the race itself; it has no fork event of its own to
                // report, just serve requests and hand the barrier on.
                crate::request_engine::run_until_continue(tid);
                crate::thread_coordinator::exit_barrier(tid);
                continue;
            }
            BarrierOutcome::BecameControlThread => break,
        }
    }

    let published = process_state::with(|state| {
        crate::events::publish_or_escalate(
            state,
            crate::codec::event::Event::ProcessFork {
                tid,
                pid: child as u32,
            },
        )
    });
    if let Err(e) = published {
        udi_log!(log::LogLevel::LogWarn, "failed to report fork event: {}", e);
    }

    crate::request_engine::run_until_continue(tid);
    crate::thread_coordinator::exit_barrier(tid);

    child
}

/// Arguments smuggled through `pthread_create`'s `void *arg` to
/// [`thread_trampoline`], which runs on the new thread itself before
/// delegating to the debuggee's real start routine.
struct ThreadTrampolineArgs {
    creator_tid: u64,
    real_start: extern "C" fn(*mut c_void) -> *mut c_void,
    real_arg: *mut c_void,
}

/// Runs as the new thread's actual entry point. `gettid()` here reports the
/// new thread's own kernel tid, unlike `*thread` back in the creator (a
/// `pthread_t` handle, not a tid): registering from here is the only way
/// to key this thread's state under the tid every other code path uses.
extern "C" fn thread_trampoline(arg: *mut c_void) -> *mut c_void {
    let args = unsafe { Box::from_raw(arg as *mut ThreadTrampolineArgs) };
    let new_tid = unsafe { libc::syscall(libc::SYS_gettid) as u64 };
    crate::lifecycle::on_thread_created(new_tid, args.creator_tid);
    (args.real_start)(args.real_arg)
}

/// `pthread_create()`: substitutes `thread_trampoline` for the debuggee's
/// start routine so the new thread registers itself under its own real
/// kernel tid, then delegates.
#[no_mangle]
pub unsafe extern "C" fn pthread_create(
    thread: *mut libc::pthread_t,
    attr: *const libc::pthread_attr_t,
    start_routine: extern "C" fn(*mut c_void) -> *mut c_void,
    arg: *mut c_void,
) -> libc::c_int {
    let real = process_state::with(|state| state.symbols.pthread_create);
    let real = match real {
        Some(f) => f,
        None => return libc::ENOSYS,
    };

    let creator_tid = unsafe { libc::syscall(libc::SYS_gettid) as u64 };
    let trampoline_args = Box::new(ThreadTrampolineArgs {
        creator_tid,
        real_start: start_routine,
        real_arg: arg,
    });
    let raw = Box::into_raw(trampoline_args);

    let rc = real(thread, attr, thread_trampoline, raw as *mut c_void);
    if rc != 0 {
        // The thread never started; reclaim the box instead of leaking it.
        drop(Box::from_raw(raw));
    }
    rc
}

/// `exit()`: reports `process_exit`, blocks for the debugger's `continue`
/// the same way `fork()` blocks for one after reporting its event, and only
/// then removes the filesystem layout and falls through to the real libc
/// exit (§4.9: "the next continue removes the filesystem layout"). Mirrors
/// the breakpoint-based path taken when the debuggee calls exit directly
/// rather than through this wrapper (e.g. a statically linked binary that
/// never resolves this symbol at all, which is why C9 also plants an event
/// breakpoint at the resolved exit entry point).
#[no_mangle]
pub unsafe extern "C" fn exit(status: libc::c_int) -> ! {
    let real = process_state::with(|state| state.symbols.real_exit);

    let tid = unsafe { libc::syscall(libc::SYS_gettid) as u64 };
    process_state::with(|state| state.exiting = true);
    let published = process_state::with(|state| {
        crate::events::publish_or_escalate(
            state,
            crate::codec::event::Event::ProcessExit { tid, code: status },
        )
    });
    if let Err(e) = published {
        udi_log!(log::LogLevel::LogWarn, "failed to report exit event: {}", e);
    }

    crate::request_engine::run_until_continue(tid);
    crate::lifecycle::teardown_filesystem_layout();

    match real {
        Some(f) => f(status),
        None => libc::_exit(status),
    }
}
