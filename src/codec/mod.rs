//! Wire codec (C1, §4.1).
//!
//! Each channel is a concatenation of self-delimiting CBOR items. We bind the
//! distilled spec's "CBOR" to `ciborium`, the conventional `serde`-integrated
//! CBOR crate: every message is a plain `#[derive(Serialize, Deserialize)]`
//! type rather than a hand-poked byte buffer, and `ciborium`'s own reader
//! already does the "pull a chunk, ask for more if the item isn't complete
//! yet" dance described in §4.1 against any `Read` implementor — we don't
//! re-implement that loop, we just make sure the `Read` we hand it surfaces
//! peer-closed as a distinguishable condition instead of a generic I/O error.
//!
//! A request is two items: a `u16` request-type tag, then a field map. A
//! response is three: a status tag, the echoed request-type tag, then an
//! optional field map. An event is three: an event-type tag, a `u64` thread
//! id, then an optional field map. `deny_unknown_fields` on every field
//! struct gives us "unknown field names produce a protocol error" for free.

pub mod event;
pub mod request;
pub mod response;

use std::io::{Cursor, ErrorKind, Read, Write};
use std::os::unix::io::AsRawFd;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::errors::RtError;

/// Read exactly one self-delimiting CBOR item from `src`.
///
/// Returns `Ok(None)` if the peer closed the channel before writing any
/// bytes of a new item (an "empty read" in the terms of §4.1) — on the
/// request side this is a normal shutdown signal; on the response/events
/// side the caller treats it as fatal (§7).
pub fn read_item<T, R>(src: &mut R) -> Result<Option<T>, RtError>
where
    T: DeserializeOwned,
    R: Read,
{
    let mut first = [0u8; 1];
    loop {
        match src.read(&mut first) {
            Ok(0) => return Ok(None),
            Ok(1) => break,
            Ok(_) => unreachable!("read(&mut [u8;1]) returned more than 1 byte"),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RtError::Io(e)),
        }
    }
    let chained = Cursor::new(first).chain(&mut *src);
    let value: T = ciborium::de::from_reader(chained)
        .map_err(|e| RtError::Codec(format!("cbor decode failed: {}", e)))?;
    Ok(Some(value))
}

/// Write exactly one CBOR item to `dst`, flushing so the debugger observes it
/// promptly (these channels are FIFOs, not buffered sockets).
pub fn write_item<T, W>(dst: &mut W, value: &T) -> Result<(), RtError>
where
    T: Serialize,
    W: Write,
{
    ciborium::ser::into_writer(value, &mut *dst)
        .map_err(|e| RtError::Codec(format!("cbor encode failed: {}", e)))?;
    dst.flush()?;
    Ok(())
}

/// Marker trait implemented by the small set of types that may appear as the
/// first item of a frame (request-type, response-status, event-type tags).
/// Exists mainly so call sites read as "decode a tag, then decode a payload"
/// rather than two anonymous `read_item::<u16, _>` calls.
pub trait WireTag: Copy + Eq + Sized {
    fn to_u16(self) -> u16;
    fn from_u16(v: u16) -> Option<Self>;
}

pub(crate) fn fd_of(file: &std::fs::File) -> i32 {
    file.as_raw_fd()
}
