//! Dynamic symbol resolution (C14A, §4.14).
//!
//! Resolved once at constructor time via `dlsym(RTLD_DEFAULT, ...)` rather
//! than by parsing this process's own ELF image: the runtime shares an
//! address space with the symbols it needs, so the dynamic linker has
//! already done the work of locating them. A missing pthread symbol
//! degrades `multithread_capable` to `false` instead of failing
//! initialization (§9: "accept reduced functionality... rather than failing
//! initialization").

use std::os::raw::{c_char, c_int, c_void};

pub type SigactionFn =
    unsafe extern "C" fn(c_int, *const libc::sigaction, *mut libc::sigaction) -> c_int;
pub type ForkFn = unsafe extern "C" fn() -> libc::pid_t;
pub type PthreadCreateFn = unsafe extern "C" fn(
    *mut libc::pthread_t,
    *const libc::pthread_attr_t,
    extern "C" fn(*mut c_void) -> *mut c_void,
    *mut c_void,
) -> c_int;
pub type PthreadExitFn = unsafe extern "C" fn(*mut c_void) -> !;
pub type ExitFn = unsafe extern "C" fn(c_int) -> !;

/// Table of symbols resolved dynamically at library load. Every slot is
/// optional; callers fall back to direct libc/nix calls when a slot is
/// `None`, except for thread primitives, whose absence is the signal that
/// this process cannot report thread-create/thread-death events.
///
/// `sigaction`, `fork`, `pthread_create`, `pthread_exit` and `real_exit` are
/// resolved via `RTLD_NEXT`, not `RTLD_DEFAULT`: this library exports
/// same-named wrappers for several of these (§4.14, `interpose.rs`), so
/// asking the dynamic linker for "the default `fork`" from inside our own
/// `fork` wrapper would just return ourselves again. `RTLD_NEXT` asks for
/// the next definition after the one currently executing, which is the real
/// libc implementation.
pub struct SymbolTable {
    pub sigaction: Option<SigactionFn>,
    pub fork: Option<ForkFn>,
    pub pthread_create: Option<PthreadCreateFn>,
    pub pthread_exit: Option<PthreadExitFn>,
    /// The real libc `exit`, resolved via `RTLD_NEXT` so `interpose::exit`
    /// can delegate to it without recursing into itself.
    pub real_exit: Option<ExitFn>,
    /// Address of `exit` as seen via `RTLD_DEFAULT` (§4.9 step 5), used only
    /// to seed the event breakpoint for binaries that never go through the
    /// wrapped entry point at all.
    pub process_exit: Option<ExitFn>,
}

impl SymbolTable {
    /// Resolve every symbol in the table. Called exactly once, from the
    /// constructor, before any other part of the runtime touches signals or
    /// threads.
    pub fn resolve() -> SymbolTable {
        SymbolTable {
            sigaction: unsafe { lookup_next("sigaction") },
            fork: unsafe { lookup_next("fork") },
            pthread_create: unsafe { lookup_next("pthread_create") },
            pthread_exit: unsafe { lookup_next("pthread_exit") },
            real_exit: unsafe { lookup_next("exit") },
            process_exit: unsafe { lookup_default("exit") },
        }
    }

    /// §4.9 step 2: "the presence of thread primitives sets
    /// `multithread_capable`".
    pub fn multithread_capable(&self) -> bool {
        self.pthread_create.is_some() && self.pthread_exit.is_some()
    }

    /// Address of the process exit entry point, used to seed the event
    /// breakpoint (§4.9 step 5). `None` if `exit` could not be resolved,
    /// which leaves process-exit reporting unavailable but does not abort
    /// initialization.
    pub fn exit_entry_point(&self) -> Option<u64> {
        self.process_exit.map(|f| f as usize as u64)
    }
}

unsafe fn lookup_via<T: Copy>(handle: *mut c_void, name: &str) -> Option<T> {
    let cname = match std::ffi::CString::new(name) {
        Ok(c) => c,
        Err(_) => return None,
    };
    let sym = libc::dlsym(handle, cname.as_ptr() as *const c_char);
    if sym.is_null() {
        return None;
    }
    // SAFETY: `T` is always one of the `unsafe extern "C" fn` aliases above,
    // which are pointer-sized and ABI-compatible with the `void*` dlsym hands
    // back; the caller picks `T` to match the symbol it asked for.
    Some(std::mem::transmute_copy::<*mut c_void, T>(&sym))
}

unsafe fn lookup<T: Copy>(name: &str) -> Option<T> {
    lookup_default(name)
}

unsafe fn lookup_default<T: Copy>(name: &str) -> Option<T> {
    lookup_via(libc::RTLD_DEFAULT, name)
}

unsafe fn lookup_next<T: Copy>(name: &str) -> Option<T> {
    lookup_via(libc::RTLD_NEXT, name)
}

/// Resolve the process exit entry point independent of a full
/// [`SymbolTable`]; used by tests that only need the one address.
pub fn resolve_exit_entry_point() -> Option<u64> {
    unsafe { lookup::<ExitFn>("exit") }.map(|f| f as usize as u64)
}

/// True if `name` can be resolved at all via the dynamic linker. Exposed for
/// diagnostics/logging rather than the hot init path.
pub fn symbol_exists(name: &str) -> bool {
    let cname = match std::ffi::CString::new(name) {
        Ok(c) => c,
        Err(_) => return false,
    };
    let sym = unsafe { libc::dlsym(libc::RTLD_DEFAULT, cname.as_ptr() as *const c_char) };
    !sym.is_null()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_is_always_resolvable_on_a_linked_process() {
        assert!(resolve_exit_entry_point().is_some());
    }

    #[test]
    fn symbol_table_resolves_core_symbols() {
        let table = SymbolTable::resolve();
        assert!(table.sigaction.is_some());
        assert!(table.fork.is_some());
    }
}
