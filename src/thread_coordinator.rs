//! Thread coordinator (C7, §4.7).
//!
//! Synchronizes "exactly one thread talks to the debugger at a time" using
//! a single-byte pipe (the thread barrier), a compare-and-swap sync
//! variable, and each thread's own control pipe, the async-signal-safe
//! primitive set described in §9 ("one-byte pipe reads satisfy this").
//!
//! Every public entry point here takes only the process lock it needs for
//! a short CAS/scan/flag-set, then releases it before blocking on a pipe
//! read (§9: "do not take a lock on the hot signal path"). Holding
//! [`crate::process_state::with`] across a blocking read would stop every
//! other thread from ever reaching the `with` call that writes the byte
//! the holder is waiting for.

use std::io::{Read, Write};
use std::os::unix::io::{FromRawFd, RawFd};
use std::sync::atomic::Ordering;

use nix::sys::signal::Signal;

use crate::process_state::{self, ProcessState, ThreadBarrier};
use crate::thread_state::RunState;

/// Signal used to park a running peer thread inside the handler (§4.7).
/// Reusing `SIGUSR1` here the way the original runtime reserves a signal
/// purely for inter-thread coordination, distinct from any signal the
/// debuggee's own code expects to receive.
pub const THREAD_SUSPEND_SIGNAL: Signal = Signal::SIGUSR1;

/// Outcome of [`enter_barrier`].
pub enum BarrierOutcome {
    /// Won the race; proceed to handle the event as control thread.
    BecameControlThread,
    /// Handed control by the previous control thread's
    /// [`exit_barrier`] (§4.7 "hand off to a peer with a pending
    /// suspend"), rather than having won the CAS itself. The caller has no
    /// event of its own to report: it should just serve requests and
    /// release in turn.
    HandedOffControl,
    /// Lost the race; the barrier already reset or another thread is
    /// running the request loop. Nothing more to do.
    LostRace,
}

/// Decision made while the process lock is held; the blocking waits it
/// implies are carried out by the caller after the lock is dropped.
enum BarrierDecision {
    BecameControlThread { wait_fd: RawFd, wait_count: usize },
    LostRace { park_fd: RawFd },
}

enum ReleaseDecision {
    None,
    Wait(RawFd),
}

fn read_one(fd: RawFd) -> std::io::Result<()> {
    let mut f = unsafe { std::fs::File::from_raw_fd(fd) };
    let mut byte = [0u8; 1];
    let r = f.read_exact(&mut byte);
    std::mem::forget(f);
    r
}

fn write_one(fd: RawFd, byte: u8) -> std::io::Result<()> {
    let mut f = unsafe { std::fs::File::from_raw_fd(fd) };
    let r = f.write_all(&[byte]);
    std::mem::forget(f);
    r
}

/// Signal one specific thread rather than the process. `kill(2)` targets a
/// whole thread group (or, if `tid` isn't itself a valid tgid, mis-targets
/// or fails with `ESRCH`); parking one peer needs `tgkill(tgid, tid, sig)`.
/// Neither `libc` nor `nix` expose a typed wrapper for it, so this reaches
/// for the raw syscall the same way `gettid()` already does elsewhere in
/// this crate.
fn tgkill(tgid: i32, tid: i32, sig: Signal) -> std::io::Result<()> {
    let rc = unsafe { libc::syscall(libc::SYS_tgkill, tgid, tid, sig as i32) };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// §4.7 `block_other_threads` decision phase: CAS the sync variable,
/// signal every running peer to come park, and work out what the caller
/// must block on next.
fn decide_block_other_threads(state: &mut ProcessState, caller_tid: u64) -> BarrierDecision {
    let won = state
        .barrier
        .sync_var
        .compare_exchange(0, 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok();

    if won {
        let tgid = state.pid as i32;
        let num_running_peers = state
            .threads
            .iter()
            .filter(|t| t.tid != caller_tid && !t.dead && t.run_state == RunState::Running)
            .count();

        for t in state.threads.iter().filter(|t| t.tid != caller_tid && !t.dead) {
            if t.run_state == RunState::Running {
                let _ = tgkill(tgid, t.tid as i32, THREAD_SUSPEND_SIGNAL);
            }
        }

        if let Some(me) = state.find_thread_mut(caller_tid) {
            me.control_thread = true;
        }

        BarrierDecision::BecameControlThread {
            wait_fd: state.barrier.read_fd,
            wait_count: num_running_peers,
        }
    } else {
        let _ = write_one(state.barrier.write_fd, ThreadBarrier::SENTINEL);
        let park_fd = state.find_thread(caller_tid).map(|t| t.control_pipe_read).unwrap_or(-1);
        BarrierDecision::LostRace { park_fd }
    }
}

/// §4.7 `block_other_threads`. The process lock is held only long enough
/// to make the CAS decision and signal peers (`decide_block_other_threads`
/// above); the wait for them to actually arrive happens with the lock
/// free, so a peer's own entry into this same function is never blocked
/// on the control thread's wait.
pub fn enter_barrier(caller_tid: u64) -> BarrierOutcome {
    match process_state::with(|state| decide_block_other_threads(state, caller_tid)) {
        BarrierDecision::BecameControlThread { wait_fd, wait_count } => {
            for _ in 0..wait_count {
                let _ = read_one(wait_fd);
            }
            BarrierOutcome::BecameControlThread
        }
        BarrierDecision::LostRace { park_fd } => {
            let _ = read_one(park_fd);
            // A generic "wake every peer" release (the common case) never
            // marks anyone `control_thread`; only a direct handoff
            // (§4.7, `decide_release_other_threads` below) does, so that
            // flag tells the two releases apart once this read returns.
            let handed_off = process_state::with(|state| {
                state.find_thread(caller_tid).map(|t| t.control_thread).unwrap_or(false)
            });
            if handed_off {
                BarrierOutcome::HandedOffControl
            } else {
                BarrierOutcome::LostRace
            }
        }
    }
}

/// §4.7 `release_other_threads` decision phase, same locking discipline as
/// `decide_block_other_threads`.
fn decide_release_other_threads(state: &mut ProcessState, caller_tid: u64) -> ReleaseDecision {
    let handoff_tid = state
        .threads
        .iter()
        .find(|t| t.tid != caller_tid && !t.dead && (t.suspend_pending || t.stack_event_pending))
        .map(|t| t.tid);

    if let Some(target_tid) = handoff_tid {
        if let Some(me) = state.find_thread_mut(caller_tid) {
            me.control_thread = false;
        }
        let target_write_fd = state.find_thread(target_tid).map(|t| t.control_pipe_write);
        if let Some(fd) = target_write_fd {
            if let Some(target) = state.find_thread_mut(target_tid) {
                target.control_thread = true;
                target.suspend_pending = false;
            }
            let _ = write_one(fd, ThreadBarrier::SENTINEL);
        }
        let park_fd = state.find_thread(caller_tid).map(|t| t.control_pipe_read).unwrap_or(-1);
        return ReleaseDecision::Wait(park_fd);
    }

    state.barrier.sync_var.store(0, Ordering::SeqCst);
    let peer_write_fds: Vec<RawFd> = state
        .threads
        .iter()
        .filter(|t| t.tid != caller_tid && !t.dead && t.run_state == RunState::Running)
        .map(|t| t.control_pipe_write)
        .collect();
    for fd in peer_write_fds {
        let _ = write_one(fd, ThreadBarrier::SENTINEL);
    }

    let should_park_self = state
        .find_thread(caller_tid)
        .map(|t| t.run_state == RunState::Suspended)
        .unwrap_or(false);
    if should_park_self {
        let park_fd = state.find_thread(caller_tid).map(|t| t.control_pipe_read).unwrap_or(-1);
        ReleaseDecision::Wait(park_fd)
    } else {
        ReleaseDecision::None
    }
}

/// §4.7 `release_other_threads`.
pub fn exit_barrier(caller_tid: u64) {
    let decision = process_state::with(|state| decide_release_other_threads(state, caller_tid));
    if let ReleaseDecision::Wait(fd) = decision {
        let _ = read_one(fd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;
    use crate::config::Config;
    use crate::thread_state::ThreadState;

    fn state_with_threads(n: u32) -> ProcessState {
        let cfg = Config {
            root_dir: std::env::temp_dir(),
            debug_logging: false,
            arch: Arch::X86_64,
        };
        let mut st = ProcessState::for_tests(cfg);
        for i in 0..n {
            st.threads.push(Box::new(ThreadState::new(i as u64, Arch::X86_64, -1, -1)));
        }
        st
    }

    #[test]
    fn sole_thread_wins_the_barrier_immediately() {
        let mut st = state_with_threads(1);
        match decide_block_other_threads(&mut st, 0) {
            BarrierDecision::BecameControlThread { wait_count, .. } => assert_eq!(wait_count, 0),
            BarrierDecision::LostRace { .. } => panic!("sole thread should always win"),
        }
    }

    #[test]
    fn second_thread_loses_the_race_and_parks() {
        let mut st = state_with_threads(2);
        match decide_block_other_threads(&mut st, 0) {
            BarrierDecision::BecameControlThread { wait_count, .. } => assert_eq!(wait_count, 1),
            BarrierDecision::LostRace { .. } => panic!("first caller should win the CAS"),
        }
        match decide_block_other_threads(&mut st, 1) {
            BarrierDecision::LostRace { .. } => {}
            BarrierDecision::BecameControlThread { .. } => panic!("second caller should lose the race"),
        }
    }

    #[test]
    fn release_hands_off_to_a_thread_with_pending_suspend() {
        let mut st = state_with_threads(2);
        st.threads[1].suspend_pending = true;
        match decide_release_other_threads(&mut st, 0) {
            ReleaseDecision::Wait(_) => {}
            ReleaseDecision::None => panic!("caller should wait for the handoff target"),
        }
        assert!(st.threads[1].control_thread);
        assert!(!st.threads[1].suspend_pending);
    }
}
