//! Process-wide singleton state (§3 "Process state", §9 "Global mutable
//! state").
//!
//! Legitimately process-global because exactly one debuggee runs per
//! process. Modeled as a `lazy_static`-held `Mutex`, mirroring the teacher's
//! own `FLAGS` singleton (`flags.rs`) rather than the teacher's intrusive
//! linked-list graphs: a `Mutex<Option<ProcessState>>` gives safe
//! cross-thread access without the `Rc<RefCell<>>` aliasing the teacher
//! relies on for its single-tracer-thread model, which does not hold once
//! real OS threads are in play.

use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::arch::Arch;
use crate::breakpoint::BreakpointTable;
use crate::config::Config;
use crate::dynload::SymbolTable;
use crate::thread_state::ThreadState;
use crate::transport::Channel;

/// The thread barrier (§4.7): a 1-byte pipe plus an atomic sync variable.
pub struct ThreadBarrier {
    pub sync_var: AtomicU32,
    pub read_fd: RawFd,
    pub write_fd: RawFd,
}

impl ThreadBarrier {
    /// §4.7 "Sentinel byte is a fixed constant; any other value is a
    /// protocol violation and aborts."
    pub const SENTINEL: u8 = 0x55;

    fn new() -> std::io::Result<ThreadBarrier> {
        let (read_fd, write_fd) = nix::unistd::pipe().map_err(|e| std::io::Error::from_raw_os_error(e as i32))?;
        Ok(ThreadBarrier {
            sync_var: AtomicU32::new(0),
            read_fd,
            write_fd,
        })
    }
}

pub struct ProcessState {
    pub config: Config,
    pub pid: u32,
    pub root_dir: PathBuf,
    pub arch: Arch,
    pub multithread_capable: bool,
    pub symbols: SymbolTable,

    pub request_channel: Option<Channel>,
    pub response_channel: Option<Channel>,
    pub events_channel: Option<Channel>,

    pub breakpoints: BreakpointTable,
    pub threads: Vec<Box<ThreadState>>,
    pub barrier: ThreadBarrier,

    pub enabled: bool,
    pub exiting: bool,
    pub pipe_write_failed: bool,

    /// Address of the continue auxiliary breakpoint, if one is currently
    /// live (§ glossary "Continue breakpoint (aux)").
    pub continue_aux: Option<u64>,
    /// Address of the most recently hit user breakpoint, kept so it can be
    /// re-installed once the continue aux fires (§4.6 state table).
    pub last_hit_breakpoint: Option<u64>,
    /// Address of the process exit entry point, where the event breakpoint
    /// is installed (§4.9 step 5).
    pub exit_entry_point: Option<u64>,
}

impl ProcessState {
    /// Construct a bare process state without touching the filesystem
    /// layout or the debugger handshake, for use by unit tests elsewhere in
    /// the crate that exercise the breakpoint table, thread coordinator, or
    /// request engine against an in-memory `ProcessState`.
    #[cfg(test)]
    pub fn for_tests(config: Config) -> ProcessState {
        ProcessState::new(config).expect("constructing test process state")
    }

    fn new(config: Config) -> std::io::Result<ProcessState> {
        let pid = std::process::id();
        let symbols = SymbolTable::resolve();
        let multithread_capable = symbols.multithread_capable();
        let exit_entry_point = symbols.exit_entry_point();
        let root_dir = config.process_dir(pid as libc::pid_t);

        Ok(ProcessState {
            arch: config.arch,
            root_dir,
            config,
            pid,
            multithread_capable,
            symbols,
            request_channel: None,
            response_channel: None,
            events_channel: None,
            breakpoints: BreakpointTable::new(),
            threads: Vec::new(),
            barrier: ThreadBarrier::new()?,
            enabled: false,
            exiting: false,
            pipe_write_failed: false,
            continue_aux: None,
            last_hit_breakpoint: None,
            exit_entry_point,
        })
    }

    pub fn find_thread_mut(&mut self, tid: u64) -> Option<&mut ThreadState> {
        self.threads.iter_mut().find(|t| t.tid == tid).map(|b| b.as_mut())
    }

    pub fn find_thread(&self, tid: u64) -> Option<&ThreadState> {
        self.threads.iter().find(|t| t.tid == tid).map(|b| b.as_ref())
    }

    pub fn running_thread_count(&self) -> usize {
        self.threads
            .iter()
            .filter(|t| !t.dead && t.run_state == crate::thread_state::RunState::Running)
            .count()
    }

    pub fn all_suspended(&self) -> bool {
        self.threads.iter().all(|t| t.dead || t.run_state == crate::thread_state::RunState::Suspended)
    }
}

lazy_static::lazy_static! {
    /// `None` until [`init`] runs at constructor time; never re-entered
    /// after that (§4.13: "Read once at constructor time... nothing
    /// re-reads the environment afterward").
    static ref PROCESS: Mutex<Option<ProcessState>> = Mutex::new(None);
}

/// Initialize the singleton. Must be called exactly once, from the
/// library constructor, before any signal handler can run.
pub fn init(config: Config) -> std::io::Result<()> {
    let state = ProcessState::new(config)?;
    *PROCESS.lock().unwrap() = Some(state);
    Ok(())
}

/// Run `f` with exclusive access to the process state. Panics if called
/// before [`init`]: every code path that can observe the process state
/// runs strictly after constructor initialization completes.
pub fn with<R>(f: impl FnOnce(&mut ProcessState) -> R) -> R {
    let mut guard = PROCESS.lock().unwrap();
    let state = guard.as_mut().expect("process state accessed before init");
    f(state)
}

pub fn is_initialized() -> bool {
    PROCESS.lock().unwrap().is_some()
}
