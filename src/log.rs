//! Internal diagnostic logging (§4.11).
//!
//! Gated by `UDI_DEBUG`. The lock guarding the shared stderr writer is a
//! *recursive* mutex: the signal dispatcher may end up logging while the
//! application thread it interrupted was itself in the middle of a log call
//! (e.g. a fault recovered from inside `udi_log!` itself touches memory that
//! traps). A plain, non-recursive `Mutex` would deadlock that thread against
//! itself. `std::sync::Mutex` has no recursive variant, so this wraps a raw
//! `pthread_mutex_t` initialized with `PTHREAD_MUTEX_RECURSIVE`.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::io::Write;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum LogLevel {
    LogDebug,
    LogWarn,
    LogError,
}

pub struct RecursiveMutex {
    raw: UnsafeCell<libc::pthread_mutex_t>,
}

unsafe impl Sync for RecursiveMutex {}

impl RecursiveMutex {
    const fn new() -> RecursiveMutex {
        RecursiveMutex {
            raw: UnsafeCell::new(libc::PTHREAD_MUTEX_INITIALIZER),
        }
    }

    /// Must be called once, before any thread other than the caller is live.
    unsafe fn init(&self) {
        let mut attr: MaybeUninit<libc::pthread_mutexattr_t> = MaybeUninit::uninit();
        libc::pthread_mutexattr_init(attr.as_mut_ptr());
        libc::pthread_mutexattr_settype(attr.as_mut_ptr(), libc::PTHREAD_MUTEX_RECURSIVE);
        libc::pthread_mutex_init(self.raw.get(), attr.as_ptr());
        libc::pthread_mutexattr_destroy(attr.as_mut_ptr());
    }

    fn lock(&self) -> RecursiveMutexGuard<'_> {
        unsafe {
            libc::pthread_mutex_lock(self.raw.get());
        }
        RecursiveMutexGuard { owner: self }
    }
}

struct RecursiveMutexGuard<'a> {
    owner: &'a RecursiveMutex,
}

impl<'a> Drop for RecursiveMutexGuard<'a> {
    fn drop(&mut self) {
        unsafe {
            libc::pthread_mutex_unlock(self.owner.raw.get());
        }
    }
}

static LOG_LOCK: RecursiveMutex = RecursiveMutex::new();
static LOG_LOCK_READY: AtomicBool = AtomicBool::new(false);
static DEBUG_ENABLED: AtomicBool = AtomicBool::new(false);

/// Called once from the constructor (§4.9 step 3), after `Config::from_env`
/// has determined whether `UDI_DEBUG` was set.
pub fn init(debug_logging: bool) {
    unsafe {
        LOG_LOCK.init();
    }
    LOG_LOCK_READY.store(true, Ordering::Release);
    DEBUG_ENABLED.store(debug_logging, Ordering::Release);
}

pub fn debug_enabled() -> bool {
    DEBUG_ENABLED.load(Ordering::Acquire)
}

/// Write one already-formatted line to stderr under the recursive lock.
/// Safe to call from the signal handler: the only libc entry points used are
/// `pthread_mutex_{lock,unlock}` and a raw `write(2)`, both valid from a
/// signal context once the mutex has been initialized up front.
pub fn write_line(level: LogLevel, args: fmt::Arguments<'_>) {
    if level == LogLevel::LogDebug && !debug_enabled() {
        return;
    }
    if !LOG_LOCK_READY.load(Ordering::Acquire) {
        return;
    }
    let _guard = LOG_LOCK.lock();
    let prefix = match level {
        LogLevel::LogDebug => "DEBUG",
        LogLevel::LogWarn => "WARN",
        LogLevel::LogError => "ERROR",
    };
    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "[udirt:{}:{}] {}", prefix, unsafe { libc::getpid() }, args);
}

use std::fmt;

/// Raw `write(2)` variant used only from contexts where taking `Stderr`'s own
/// internal lock would be unsafe (inside the signal handler while a fault is
/// being recovered). Kept deliberately tiny: no formatting, no allocation.
pub fn write_raw(msg: &str) {
    unsafe {
        libc::write(
            libc::STDERR_FILENO,
            msg.as_ptr() as *const c_void,
            msg.len(),
        );
    }
}

#[macro_export]
macro_rules! udi_log {
    ($level:expr, $($arg:tt)*) => {
        $crate::log::write_line($level, format_args!($($arg)*))
    };
}
