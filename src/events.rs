//! Event publisher (C10, §4.10).
//!
//! Publishing is synchronous: the writer blocks until the debugger drains
//! the events FIFO. A failure here is escalated to an `error` event if the
//! channel is still usable, or treated as fatal otherwise (§4.10).

use crate::codec::event::{write_event, Event};
use crate::errors::RtError;
use crate::process_state::ProcessState;

/// Publish `ev` on the process-wide events channel.
pub fn publish(state: &mut ProcessState, ev: Event) -> Result<(), RtError> {
    let channel = state.events_channel.as_mut().ok_or(RtError::PeerClosed)?;
    let result = write_event(channel, &ev);
    if let Err(RtError::Io(_)) | Err(RtError::PeerClosed) = &result {
        crate::transport::drain_pending_sigpipe();
    }
    result
}

/// Publish `ev`, and if that itself fails, attempt one `error` event before
/// giving up and returning the original failure (§4.10: "Errors during
/// publish are converted to an `error` event if possible").
pub fn publish_or_escalate(state: &mut ProcessState, ev: Event) -> Result<(), RtError> {
    let tid = ev.tid();
    match publish(state, ev) {
        Ok(()) => Ok(()),
        Err(original) => {
            let notice = Event::Error {
                tid,
                msg: format!("event publish failed: {}", original),
            };
            let _ = publish(state, notice);
            Err(original)
        }
    }
}
