//! Event frames (§6 "Event map fields", §4.10 event taxonomy).

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::request::EmptyFields;
use super::WireTag;
use crate::errors::RtError;

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum EventType {
    Breakpoint = 0,
    SingleStep = 1,
    ThreadCreate = 2,
    ThreadDeath = 3,
    ProcessExit = 4,
    ProcessFork = 5,
    ProcessExec = 6,
    ProcessCleanup = 7,
    Signal = 8,
    Error = 9,
    Unknown = 10,
}

impl WireTag for EventType {
    fn to_u16(self) -> u16 {
        self as u16
    }

    fn from_u16(v: u16) -> Option<Self> {
        use EventType::*;
        Some(match v {
            0 => Breakpoint,
            1 => SingleStep,
            2 => ThreadCreate,
            3 => ThreadDeath,
            4 => ProcessExit,
            5 => ProcessFork,
            6 => ProcessExec,
            7 => ProcessCleanup,
            8 => Signal,
            9 => Error,
            10 => Unknown,
            _ => return None,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct BreakpointPayload {
    pub addr: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ThreadCreatePayload {
    pub tid: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProcessExitPayload {
    pub code: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ProcessForkPayload {
    pub pid: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SignalPayload {
    pub addr: u64,
    pub sig: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ErrorPayload {
    pub msg: String,
}

#[derive(Debug, Clone)]
pub enum Event {
    Breakpoint { tid: u64, addr: u64 },
    SingleStep { tid: u64 },
    ThreadCreate { tid: u64, new_tid: u64 },
    ThreadDeath { tid: u64 },
    ProcessExit { tid: u64, code: i32 },
    ProcessFork { tid: u64, pid: u32 },
    ProcessExec { tid: u64 },
    /// Never emitted by this runtime (§4.10: "emitted by the debugger-side
    /// upon peer close, not by the runtime"). Kept as a decodable variant so
    /// the debugger-side encoding of it round-trips through this codec too.
    ProcessCleanup { tid: u64 },
    Signal { tid: u64, addr: u64, sig: u32 },
    Error { tid: u64, msg: String },
    Unknown { tid: u64 },
}

impl Event {
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Breakpoint { .. } => EventType::Breakpoint,
            Event::SingleStep { .. } => EventType::SingleStep,
            Event::ThreadCreate { .. } => EventType::ThreadCreate,
            Event::ThreadDeath { .. } => EventType::ThreadDeath,
            Event::ProcessExit { .. } => EventType::ProcessExit,
            Event::ProcessFork { .. } => EventType::ProcessFork,
            Event::ProcessExec { .. } => EventType::ProcessExec,
            Event::ProcessCleanup { .. } => EventType::ProcessCleanup,
            Event::Signal { .. } => EventType::Signal,
            Event::Error { .. } => EventType::Error,
            Event::Unknown { .. } => EventType::Unknown,
        }
    }

    pub fn tid(&self) -> u64 {
        match self {
            Event::Breakpoint { tid, .. }
            | Event::SingleStep { tid }
            | Event::ThreadCreate { tid, .. }
            | Event::ThreadDeath { tid }
            | Event::ProcessExit { tid, .. }
            | Event::ProcessFork { tid, .. }
            | Event::ProcessExec { tid }
            | Event::ProcessCleanup { tid }
            | Event::Signal { tid, .. }
            | Event::Error { tid, .. }
            | Event::Unknown { tid } => *tid,
        }
    }
}

pub fn write_event<W: Write>(dst: &mut W, ev: &Event) -> Result<(), RtError> {
    super::write_item(dst, &ev.event_type().to_u16())?;
    super::write_item(dst, &ev.tid())?;
    match ev {
        Event::Breakpoint { addr, .. } => super::write_item(dst, &BreakpointPayload { addr: *addr }),
        Event::ThreadCreate { new_tid, .. } => {
            super::write_item(dst, &ThreadCreatePayload { tid: *new_tid })
        }
        Event::ProcessExit { code, .. } => super::write_item(dst, &ProcessExitPayload { code: *code }),
        Event::ProcessFork { pid, .. } => super::write_item(dst, &ProcessForkPayload { pid: *pid }),
        Event::Signal { addr, sig, .. } => {
            super::write_item(dst, &SignalPayload { addr: *addr, sig: *sig })
        }
        Event::Error { msg, .. } => super::write_item(dst, &ErrorPayload { msg: msg.clone() }),
        Event::SingleStep { .. }
        | Event::ThreadDeath { .. }
        | Event::ProcessExec { .. }
        | Event::ProcessCleanup { .. }
        | Event::Unknown { .. } => super::write_item(dst, &EmptyFields {}),
    }
}

pub fn read_event<R: Read>(src: &mut R) -> Result<Option<Event>, RtError> {
    let type_tag: u16 = match super::read_item(src)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let event_type =
        EventType::from_u16(type_tag).ok_or_else(|| RtError::Protocol(format!("unknown event type {}", type_tag)))?;
    let tid: u64 = super::read_item(src)?.ok_or(RtError::PeerClosed)?;

    let ev = match event_type {
        EventType::Breakpoint => {
            let p: BreakpointPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::Breakpoint { tid, addr: p.addr }
        }
        EventType::SingleStep => {
            let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::SingleStep { tid }
        }
        EventType::ThreadCreate => {
            let p: ThreadCreatePayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ThreadCreate { tid, new_tid: p.tid }
        }
        EventType::ThreadDeath => {
            let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ThreadDeath { tid }
        }
        EventType::ProcessExit => {
            let p: ProcessExitPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ProcessExit { tid, code: p.code }
        }
        EventType::ProcessFork => {
            let p: ProcessForkPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ProcessFork { tid, pid: p.pid }
        }
        EventType::ProcessExec => {
            let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ProcessExec { tid }
        }
        EventType::ProcessCleanup => {
            let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::ProcessCleanup { tid }
        }
        EventType::Signal => {
            let p: SignalPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::Signal {
                tid,
                addr: p.addr,
                sig: p.sig,
            }
        }
        EventType::Error => {
            let p: ErrorPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::Error { tid, msg: p.msg }
        }
        EventType::Unknown => {
            let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            Event::Unknown { tid }
        }
    };
    Ok(Some(ev))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn breakpoint_event_round_trips() {
        let ev = Event::Breakpoint { tid: 7, addr: 0x4010 };
        let mut buf = Vec::new();
        write_event(&mut buf, &ev).unwrap();
        let mut cur = Cursor::new(buf);
        match read_event(&mut cur).unwrap().unwrap() {
            Event::Breakpoint { tid, addr } => {
                assert_eq!(tid, 7);
                assert_eq!(addr, 0x4010);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
