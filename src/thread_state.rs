//! Per-thread state (§3 "Thread state").
//!
//! One instance per live OS thread, held in the process-state singleton's
//! thread list (§9 design note: `Vec<Box<ThreadState>>` rather than an
//! intrusive linked list, addressed by tid instead of by pointer).

use std::io::Write;
use std::os::unix::io::RawFd;

use crate::registers::Registers;
use crate::transport::Channel;

/// Debugger-visible running/suspended state (§4.8 `state` request payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum RunState {
    Running = 0,
    Suspended = 1,
}

/// The register context and signal metadata cached when a thread enters the
/// signal handler, consulted by `read_register`/`write_register` (§4.8: they
/// "require a valid cached context... otherwise fail cleanly").
#[derive(Clone, Copy)]
pub struct CachedEvent {
    pub signal: i32,
    pub context: Registers,
    pub valid: bool,
}

impl CachedEvent {
    pub fn empty(arch: crate::arch::Arch) -> CachedEvent {
        CachedEvent {
            signal: 0,
            context: Registers::zeroed(arch),
            valid: false,
        }
    }
}

/// Everything the runtime tracks about one live OS thread.
pub struct ThreadState {
    pub tid: u64,
    pub dead: bool,
    pub run_state: RunState,
    pub single_step: bool,
    /// Thread-specific aux breakpoint address installed for single-step,
    /// if any (§ glossary "Single-step breakpoint").
    pub single_step_aux: Option<u64>,
    /// Read/write ends of this thread's control pipe, used to park it
    /// inside the signal handler until the coordinator releases it (§4.7).
    pub control_pipe_read: RawFd,
    pub control_pipe_write: RawFd,
    pub control_thread: bool,
    pub suspend_pending: bool,
    pub stack_event_pending: bool,
    pub event: CachedEvent,
    /// This thread's own `<root>/<pid>/<hex-tid>/request` FIFO (§6), opened
    /// non-blocking as soon as the path exists so it can be polled
    /// alongside the process-wide channel without a reader ever stalling
    /// on a debugger that never connects to it. `None` for the initial
    /// thread, which is served over the process-wide channel only.
    pub request_channel: Option<Channel>,
    /// This thread's own response FIFO, opened lazily (blocking) the first
    /// time a request actually arrives on `request_channel`, since opening
    /// a FIFO for write with no reader yet present fails with `ENXIO`.
    pub response_channel: Option<Channel>,
}

impl ThreadState {
    pub fn new(tid: u64, arch: crate::arch::Arch, control_pipe_read: RawFd, control_pipe_write: RawFd) -> ThreadState {
        ThreadState {
            tid,
            dead: false,
            run_state: RunState::Running,
            single_step: false,
            single_step_aux: None,
            control_pipe_read,
            control_pipe_write,
            control_thread: false,
            suspend_pending: false,
            stack_event_pending: false,
            event: CachedEvent::empty(arch),
            request_channel: None,
            response_channel: None,
        }
    }

    /// Block on this thread's own control pipe until the coordinator writes
    /// the sentinel byte (§4.7 release protocol).
    pub fn park_on_control_pipe(&self) -> std::io::Result<()> {
        use std::io::Read;
        let mut f = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(self.control_pipe_read) };
        let mut byte = [0u8; 1];
        let result = f.read_exact(&mut byte);
        // The fd is owned by the thread barrier's bookkeeping elsewhere;
        // don't let the temporary `File` wrapper close it on drop.
        std::mem::forget(f);
        result
    }

    pub fn release(&self, sentinel: u8) -> std::io::Result<()> {
        let mut f = unsafe { <std::fs::File as std::os::unix::io::FromRawFd>::from_raw_fd(self.control_pipe_write) };
        let result = f.write_all(&[sentinel]);
        std::mem::forget(f);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::Arch;

    #[test]
    fn new_thread_starts_running_and_not_stepping() {
        let ts = ThreadState::new(42, Arch::X86_64, -1, -1);
        assert_eq!(ts.run_state, RunState::Running);
        assert!(!ts.single_step);
        assert!(!ts.event.valid);
    }
}
