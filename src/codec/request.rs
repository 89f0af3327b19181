//! Request frames (§6 "Request field enumeration").

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::WireTag;
use crate::errors::RtError;

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RequestType {
    Continue = 0,
    ReadMemory = 1,
    WriteMemory = 2,
    ReadRegister = 3,
    WriteRegister = 4,
    CreateBreakpoint = 5,
    InstallBreakpoint = 6,
    RemoveBreakpoint = 7,
    DeleteBreakpoint = 8,
    State = 9,
    Suspend = 10,
    Resume = 11,
    NextInstruction = 12,
    SingleStep = 13,
    Init = 14,
}

impl WireTag for RequestType {
    fn to_u16(self) -> u16 {
        self as u16
    }

    fn from_u16(v: u16) -> Option<Self> {
        use RequestType::*;
        Some(match v {
            0 => Continue,
            1 => ReadMemory,
            2 => WriteMemory,
            3 => ReadRegister,
            4 => WriteRegister,
            5 => CreateBreakpoint,
            6 => InstallBreakpoint,
            7 => RemoveBreakpoint,
            8 => DeleteBreakpoint,
            9 => State,
            10 => Suspend,
            11 => Resume,
            12 => NextInstruction,
            13 => SingleStep,
            14 => Init,
            _ => return None,
        })
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(deny_unknown_fields)]
pub struct EmptyFields {}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ContinueFields {
    pub sig: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadMemoryFields {
    pub addr: u64,
    pub len: u32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct WriteMemoryFields {
    pub addr: u64,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadRegisterFields {
    pub reg: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct WriteRegisterFields {
    pub reg: u16,
    pub value: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct AddrFields {
    pub addr: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SingleStepFields {
    pub value: bool,
}

/// A fully decoded request, tag and fields already joined.
#[derive(Debug, Clone)]
pub enum Request {
    Continue { sig: u32 },
    ReadMemory { addr: u64, len: u32 },
    WriteMemory { addr: u64, data: Vec<u8> },
    ReadRegister { reg: u16 },
    WriteRegister { reg: u16, value: u64 },
    CreateBreakpoint { addr: u64 },
    InstallBreakpoint { addr: u64 },
    RemoveBreakpoint { addr: u64 },
    DeleteBreakpoint { addr: u64 },
    State,
    Suspend,
    Resume,
    NextInstruction,
    SingleStep { value: bool },
    Init,
}

impl Request {
    pub fn request_type(&self) -> RequestType {
        match self {
            Request::Continue { .. } => RequestType::Continue,
            Request::ReadMemory { .. } => RequestType::ReadMemory,
            Request::WriteMemory { .. } => RequestType::WriteMemory,
            Request::ReadRegister { .. } => RequestType::ReadRegister,
            Request::WriteRegister { .. } => RequestType::WriteRegister,
            Request::CreateBreakpoint { .. } => RequestType::CreateBreakpoint,
            Request::InstallBreakpoint { .. } => RequestType::InstallBreakpoint,
            Request::RemoveBreakpoint { .. } => RequestType::RemoveBreakpoint,
            Request::DeleteBreakpoint { .. } => RequestType::DeleteBreakpoint,
            Request::State => RequestType::State,
            Request::Suspend => RequestType::Suspend,
            Request::Resume => RequestType::Resume,
            Request::NextInstruction => RequestType::NextInstruction,
            Request::SingleStep { .. } => RequestType::SingleStep,
            Request::Init => RequestType::Init,
        }
    }
}

/// Read one `(type, fields)` request frame. Returns `Ok(None)` on a clean
/// peer shutdown (§4.1 "empty reads... treated as shutdown on the request
/// side").
pub fn read_request<R: Read>(src: &mut R) -> Result<Option<Request>, RtError> {
    let tag: u16 = match super::read_item(src)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let rtype = RequestType::from_u16(tag)
        .ok_or_else(|| RtError::Protocol(format!("unknown request type {}", tag)))?;

    let req = match rtype {
        RequestType::Continue => {
            let f: ContinueFields = require(super::read_item(src)?)?;
            Request::Continue { sig: f.sig }
        }
        RequestType::ReadMemory => {
            let f: ReadMemoryFields = require(super::read_item(src)?)?;
            Request::ReadMemory {
                addr: f.addr,
                len: f.len,
            }
        }
        RequestType::WriteMemory => {
            let f: WriteMemoryFields = require(super::read_item(src)?)?;
            Request::WriteMemory {
                addr: f.addr,
                data: f.data,
            }
        }
        RequestType::ReadRegister => {
            let f: ReadRegisterFields = require(super::read_item(src)?)?;
            Request::ReadRegister { reg: f.reg }
        }
        RequestType::WriteRegister => {
            let f: WriteRegisterFields = require(super::read_item(src)?)?;
            Request::WriteRegister {
                reg: f.reg,
                value: f.value,
            }
        }
        RequestType::CreateBreakpoint => {
            let f: AddrFields = require(super::read_item(src)?)?;
            Request::CreateBreakpoint { addr: f.addr }
        }
        RequestType::InstallBreakpoint => {
            let f: AddrFields = require(super::read_item(src)?)?;
            Request::InstallBreakpoint { addr: f.addr }
        }
        RequestType::RemoveBreakpoint => {
            let f: AddrFields = require(super::read_item(src)?)?;
            Request::RemoveBreakpoint { addr: f.addr }
        }
        RequestType::DeleteBreakpoint => {
            let f: AddrFields = require(super::read_item(src)?)?;
            Request::DeleteBreakpoint { addr: f.addr }
        }
        RequestType::State => {
            let _: EmptyFields = require(super::read_item(src)?)?;
            Request::State
        }
        RequestType::Suspend => {
            let _: EmptyFields = require(super::read_item(src)?)?;
            Request::Suspend
        }
        RequestType::Resume => {
            let _: EmptyFields = require(super::read_item(src)?)?;
            Request::Resume
        }
        RequestType::NextInstruction => {
            let _: EmptyFields = require(super::read_item(src)?)?;
            Request::NextInstruction
        }
        RequestType::SingleStep => {
            let f: SingleStepFields = require(super::read_item(src)?)?;
            Request::SingleStep { value: f.value }
        }
        RequestType::Init => {
            let _: EmptyFields = require(super::read_item(src)?)?;
            Request::Init
        }
    };
    Ok(Some(req))
}

fn require<T>(item: Option<T>) -> Result<T, RtError> {
    item.ok_or(RtError::PeerClosed)
}

pub fn write_request<W: Write>(dst: &mut W, req: &Request) -> Result<(), RtError> {
    super::write_item(dst, &req.request_type().to_u16())?;
    match req {
        Request::Continue { sig } => super::write_item(dst, &ContinueFields { sig: *sig }),
        Request::ReadMemory { addr, len } => {
            super::write_item(dst, &ReadMemoryFields { addr: *addr, len: *len })
        }
        Request::WriteMemory { addr, data } => super::write_item(
            dst,
            &WriteMemoryFields {
                addr: *addr,
                data: data.clone(),
            },
        ),
        Request::ReadRegister { reg } => super::write_item(dst, &ReadRegisterFields { reg: *reg }),
        Request::WriteRegister { reg, value } => super::write_item(
            dst,
            &WriteRegisterFields {
                reg: *reg,
                value: *value,
            },
        ),
        Request::CreateBreakpoint { addr }
        | Request::InstallBreakpoint { addr }
        | Request::RemoveBreakpoint { addr }
        | Request::DeleteBreakpoint { addr } => super::write_item(dst, &AddrFields { addr: *addr }),
        Request::State | Request::Suspend | Request::Resume | Request::NextInstruction | Request::Init => {
            super::write_item(dst, &EmptyFields {})
        }
        Request::SingleStep { value } => super::write_item(dst, &SingleStepFields { value: *value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(req: Request) -> Request {
        let mut buf = Vec::new();
        write_request(&mut buf, &req).unwrap();
        let mut cur = Cursor::new(buf);
        read_request(&mut cur).unwrap().unwrap()
    }

    #[test]
    fn continue_round_trips() {
        match round_trip(Request::Continue { sig: 11 }) {
            Request::Continue { sig } => assert_eq!(sig, 11),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn write_memory_round_trips_bytes() {
        let data = vec![0xde, 0xad, 0xbe, 0xef];
        match round_trip(Request::WriteMemory { addr: 0x1000, data: data.clone() }) {
            Request::WriteMemory { addr, data: d } => {
                assert_eq!(addr, 0x1000);
                assert_eq!(d, data);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unknown_field_is_rejected() {
        let mut buf = Vec::new();
        ciborium::ser::into_writer(&RequestType::State.to_u16(), &mut buf).unwrap();
        let mut bogus = std::collections::BTreeMap::new();
        bogus.insert("nonsense".to_string(), 1u32);
        ciborium::ser::into_writer(&bogus, &mut buf).unwrap();
        let mut cur = Cursor::new(buf);
        assert!(read_request(&mut cur).is_err());
    }

    #[test]
    fn empty_stream_is_shutdown_not_error() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        assert!(read_request(&mut cur).unwrap().is_none());
    }
}
