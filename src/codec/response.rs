//! Response frames (§6 "Response map fields").

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::request::{EmptyFields, RequestType};
use super::WireTag;
use crate::errors::RtError;

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ResponseStatus {
    Valid = 0,
    Error = 1,
}

impl WireTag for ResponseStatus {
    fn to_u16(self) -> u16 {
        self as u16
    }

    fn from_u16(v: u16) -> Option<Self> {
        match v {
            0 => Some(ResponseStatus::Valid),
            1 => Some(ResponseStatus::Error),
            _ => None,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadMemoryPayload {
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ReadRegisterPayload {
    pub value: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct NextInstructionPayload {
    pub addr: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct SingleStepPayload {
    pub value: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ThreadStateEntry {
    pub tid: u64,
    pub state: u16,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct StatePayload {
    pub states: Vec<ThreadStateEntry>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct InitPayload {
    pub v: u32,
    pub arch: u16,
    pub mt: bool,
    pub tid: u64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ErrorPayload {
    pub msg: String,
}

/// A decoded response payload, joined with the request type it answers.
#[derive(Debug, Clone)]
pub enum ResponsePayload {
    None,
    ReadMemory(Vec<u8>),
    ReadRegister(u64),
    NextInstruction(u64),
    SingleStep(bool),
    State(Vec<(u64, u16)>),
    Init { v: u32, arch: u16, mt: bool, tid: u64 },
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Response {
    pub status: ResponseStatus,
    pub request_type: RequestType,
    pub payload: ResponsePayload,
}

impl Response {
    pub fn success(request_type: RequestType, payload: ResponsePayload) -> Response {
        Response {
            status: ResponseStatus::Valid,
            request_type,
            payload,
        }
    }

    pub fn error(request_type: RequestType, msg: impl Into<String>) -> Response {
        Response {
            status: ResponseStatus::Error,
            request_type,
            payload: ResponsePayload::Error(msg.into()),
        }
    }
}

pub fn write_response<W: Write>(dst: &mut W, resp: &Response) -> Result<(), RtError> {
    super::write_item(dst, &resp.status.to_u16())?;
    super::write_item(dst, &resp.request_type.to_u16())?;
    match &resp.payload {
        ResponsePayload::None => super::write_item(dst, &EmptyFields {}),
        ResponsePayload::ReadMemory(data) => {
            super::write_item(dst, &ReadMemoryPayload { data: data.clone() })
        }
        ResponsePayload::ReadRegister(value) => {
            super::write_item(dst, &ReadRegisterPayload { value: *value })
        }
        ResponsePayload::NextInstruction(addr) => {
            super::write_item(dst, &NextInstructionPayload { addr: *addr })
        }
        ResponsePayload::SingleStep(value) => {
            super::write_item(dst, &SingleStepPayload { value: *value })
        }
        ResponsePayload::State(states) => super::write_item(
            dst,
            &StatePayload {
                states: states
                    .iter()
                    .map(|(tid, state)| ThreadStateEntry {
                        tid: *tid,
                        state: *state,
                    })
                    .collect(),
            },
        ),
        ResponsePayload::Init { v, arch, mt, tid } => super::write_item(
            dst,
            &InitPayload {
                v: *v,
                arch: *arch,
                mt: *mt,
                tid: *tid,
            },
        ),
        ResponsePayload::Error(msg) => super::write_item(dst, &ErrorPayload { msg: msg.clone() }),
    }
}

pub fn read_response<R: Read>(src: &mut R) -> Result<Option<Response>, RtError> {
    let status_tag: u16 = match super::read_item(src)? {
        Some(v) => v,
        None => return Ok(None),
    };
    let status = ResponseStatus::from_u16(status_tag)
        .ok_or_else(|| RtError::Protocol(format!("unknown response status {}", status_tag)))?;
    let req_tag: u16 = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
    let request_type =
        RequestType::from_u16(req_tag).ok_or_else(|| RtError::Protocol("unknown echoed request type".into()))?;

    let payload = match status {
        ResponseStatus::Error => {
            let p: ErrorPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
            ResponsePayload::Error(p.msg)
        }
        ResponseStatus::Valid => match request_type {
            RequestType::ReadMemory => {
                let p: ReadMemoryPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::ReadMemory(p.data)
            }
            RequestType::ReadRegister => {
                let p: ReadRegisterPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::ReadRegister(p.value)
            }
            RequestType::NextInstruction => {
                let p: NextInstructionPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::NextInstruction(p.addr)
            }
            RequestType::SingleStep => {
                let p: SingleStepPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::SingleStep(p.value)
            }
            RequestType::State => {
                let p: StatePayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::State(p.states.into_iter().map(|e| (e.tid, e.state)).collect())
            }
            RequestType::Init => {
                let p: InitPayload = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::Init {
                    v: p.v,
                    arch: p.arch,
                    mt: p.mt,
                    tid: p.tid,
                }
            }
            _ => {
                let _: EmptyFields = super::read_item(src)?.ok_or(RtError::PeerClosed)?;
                ResponsePayload::None
            }
        },
    };

    Ok(Some(Response {
        status,
        request_type,
        payload,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn error_response_round_trips() {
        let resp = Response::error(RequestType::ReadMemory, "no such mapping");
        let mut buf = Vec::new();
        write_response(&mut buf, &resp).unwrap();
        let mut cur = Cursor::new(buf);
        let decoded = read_response(&mut cur).unwrap().unwrap();
        assert_eq!(decoded.status, ResponseStatus::Error);
        match decoded.payload {
            ResponsePayload::Error(msg) => assert_eq!(msg, "no such mapping"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn read_memory_payload_round_trips() {
        let resp = Response::success(
            RequestType::ReadMemory,
            ResponsePayload::ReadMemory(vec![1, 2, 3, 4]),
        );
        let mut buf = Vec::new();
        write_response(&mut buf, &resp).unwrap();
        let mut cur = Cursor::new(buf);
        let decoded = read_response(&mut cur).unwrap().unwrap();
        match decoded.payload {
            ResponsePayload::ReadMemory(d) => assert_eq!(d, vec![1, 2, 3, 4]),
            other => panic!("unexpected {:?}", other),
        }
    }
}
