//! Error and outcome types shared across the runtime.
//!
//! The runtime deliberately avoids an allocating error-boxing crate (no `anyhow`,
//! no `thiserror`): several call sites here run on, or adjacent to, the signal
//! handler, and constructing a boxed `dyn Error` is not something we want to
//! depend on being safe at that point. Plain enums with a hand-written
//! `Display` impl cost nothing to construct.

use std::fmt;

/// A hard runtime error: something the protocol cannot recover from gracefully.
/// Surfacing one of these (§7) means the runtime will attempt to emit an
/// `error` event and then disable itself.
#[derive(Debug)]
pub enum RtError {
    Io(std::io::Error),
    PeerClosed,
    Protocol(String),
    Codec(String),
    Allocator,
}

impl fmt::Display for RtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RtError::Io(e) => write!(f, "i/o error: {}", e),
            RtError::PeerClosed => write!(f, "peer closed the channel"),
            RtError::Protocol(msg) => write!(f, "protocol error: {}", msg),
            RtError::Codec(msg) => write!(f, "codec error: {}", msg),
            RtError::Allocator => write!(f, "allocator failure"),
        }
    }
}

impl From<std::io::Error> for RtError {
    fn from(e: std::io::Error) -> Self {
        RtError::Io(e)
    }
}

/// The three outcomes a debugger request can produce (§4.12, §7).
pub enum RequestOutcome<T> {
    /// Request handled; `T` carries whatever the caller needs to build a response payload.
    Success(T),
    /// Recoverable failure: invalid arguments, forbidden state transition, unknown
    /// register, no such breakpoint. The runtime keeps running; the debugger gets
    /// an `error` response with a human-readable message.
    Failure(String),
    /// Unrecoverable: I/O failure, allocator failure, peer closed. The runtime
    /// reports what it can and then disables itself.
    Fatal(RtError),
}

impl<T> RequestOutcome<T> {
    pub fn failure(msg: impl Into<String>) -> Self {
        RequestOutcome::Failure(msg.into())
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> RequestOutcome<U> {
        match self {
            RequestOutcome::Success(t) => RequestOutcome::Success(f(t)),
            RequestOutcome::Failure(m) => RequestOutcome::Failure(m),
            RequestOutcome::Fatal(e) => RequestOutcome::Fatal(e),
        }
    }
}
