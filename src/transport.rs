//! FIFO transport (C2, §4.2).
//!
//! Three process-wide channels (`request`, `response`, `events`) plus a pair
//! per live thread, all named pipes under the configured root directory. The
//! request engine (C8) waits on every request FIFO at once via `poll(2)`:
//! FIFOs don't give portable edge-triggered `epoll` semantics, and raw
//! `libc`/`nix` syscalls are the baseline POSIX layer this runtime reaches
//! for rather than an async runtime, matching the teacher's own preference
//! for direct syscalls over a higher-level abstraction.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use nix::poll::{PollFd, PollFlags};
use nix::sys::stat::Mode;
use nix::unistd;

use crate::errors::RtError;

const FIFO_MODE: Mode = Mode::from_bits_truncate(0o700);

/// Create a FIFO at `path` if one doesn't already exist there.
pub fn make_fifo(path: &Path) -> Result<(), RtError> {
    match unistd::mkfifo(path, FIFO_MODE) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::EEXIST) => Ok(()),
        Err(e) => Err(RtError::Io(io::Error::from_raw_os_error(e as i32))),
    }
}

/// A request (read-only), response, or events (write-only) channel backed
/// by an opened FIFO file descriptor.
pub struct Channel {
    file: File,
}

impl Channel {
    /// Open a FIFO for reading. Blocks until a writer has also opened it,
    /// per normal FIFO semantics.
    pub fn open_read(path: &Path) -> Result<Channel, RtError> {
        make_fifo(path)?;
        let file = OpenOptions::new().read(true).open(path)?;
        Ok(Channel { file })
    }

    /// Open a FIFO for writing. Blocks until a reader has also opened it.
    pub fn open_write(path: &Path) -> Result<Channel, RtError> {
        make_fifo(path)?;
        let file = OpenOptions::new().write(true).custom_flags(0).open(path)?;
        Ok(Channel { file })
    }

    /// Open a FIFO for reading without waiting for a writer (`O_NONBLOCK`
    /// on the read side succeeds immediately per `fifo(7)`). Used for the
    /// per-thread request channels (§6), which may never see a debugger
    /// connect to them.
    pub fn open_read_nonblocking(path: &Path) -> Result<Channel, RtError> {
        make_fifo(path)?;
        let file = OpenOptions::new().read(true).custom_flags(libc::O_NONBLOCK).open(path)?;
        Ok(Channel { file })
    }

    pub fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Wait on a set of request-channel file descriptors until exactly one is
/// readable, then return its index. Retries transparently on `EINTR` (§5
/// "EINTR is retried transparently").
pub fn wait_for_readable(fds: &[RawFd]) -> Result<usize, RtError> {
    loop {
        let mut pollfds: Vec<PollFd> = fds.iter().map(|fd| PollFd::new(*fd, PollFlags::POLLIN)).collect();

        match nix::poll::poll(&mut pollfds, -1) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(RtError::Io(io::Error::from_raw_os_error(e as i32))),
        }

        if let Some(idx) = pollfds
            .iter()
            .position(|p| p.revents().map(|r| r.contains(PollFlags::POLLIN)).unwrap_or(false))
        {
            return Ok(idx);
        }
        // Spurious wakeup (e.g. all POLLHUP with no POLLIN): loop again.
    }
}

/// Drain a single pending SIGPIPE without letting it terminate the process
/// (§4.2: "a SIGPIPE is captured and consumed synchronously"). Used
/// immediately after a write that may have raised EPIPE.
pub fn drain_pending_sigpipe() {
    use nix::sys::signal::{self, SigSet, Signal};

    let pending = match signal::sigpending() {
        Ok(set) => set,
        Err(_) => return,
    };
    if !pending.contains(Signal::SIGPIPE) {
        return;
    }
    let mut only_pipe = SigSet::empty();
    only_pipe.add(Signal::SIGPIPE);
    let _ = signal::sigsuspend(&only_pipe);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fifo_round_trips_a_byte() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("request");
        let read_path = path.clone();

        let writer = thread::spawn(move || {
            let mut ch = Channel::open_write(&path).unwrap();
            ch.write_all(&[0x42]).unwrap();
        });

        let mut ch = Channel::open_read(&read_path).unwrap();
        let mut buf = [0u8; 1];
        ch.read_exact(&mut buf).unwrap();
        writer.join().unwrap();
        assert_eq!(buf[0], 0x42);
    }
}
