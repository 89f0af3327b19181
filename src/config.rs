//! Environment-derived configuration (§4.13).
//!
//! Read exactly once, at constructor time, into [`Config::get`]'s backing
//! singleton. Nothing in the runtime calls `getenv` again after that: glibc's
//! `getenv` is not async-signal-safe, and the signal dispatcher must never
//! touch it.

use std::env;
use std::path::PathBuf;

use crate::arch::Arch;

pub const PROTOCOL_VERSION: u32 = 1;
pub const DEFAULT_ROOT_DIR: &str = "/tmp/udi";

pub const REQUEST_FILE_NAME: &str = "request";
pub const RESPONSE_FILE_NAME: &str = "response";
pub const EVENTS_FILE_NAME: &str = "events";

pub struct Config {
    pub root_dir: PathBuf,
    pub debug_logging: bool,
    pub arch: Arch,
}

impl Config {
    /// Build configuration from the current environment. Must only be called
    /// once, from the library constructor, before any thread other than the
    /// one running the constructor is live.
    pub fn from_env() -> Config {
        let root_dir = env::var_os("UDI_ROOT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT_DIR));
        let debug_logging = env::var_os("UDI_DEBUG").is_some();

        Config {
            root_dir,
            debug_logging,
            arch: Arch::native(),
        }
    }

    pub fn process_dir(&self, pid: libc::pid_t) -> PathBuf {
        self.root_dir.join(pid.to_string())
    }

    pub fn thread_dir(&self, pid: libc::pid_t, tid: u64) -> PathBuf {
        self.process_dir(pid).join(format!("{:x}", tid))
    }
}
