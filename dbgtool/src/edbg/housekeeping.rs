//! HouseKeeping handler (id 0x01): session lifecycle and tool-info queries.
//!
//! Grounded on `probe-rs/src/probe/edbg/housekeeping.rs`, whose wire-code
//! tables are reused verbatim; `Response::parse` replaces the teacher's
//! `panic!`/`expect`-based parsing with the error taxonomy of §7, since this
//! crate propagates protocol errors rather than aborting.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::{EdbgError, HandlerId, Result};
use crate::clock::Clock;
use crate::edbg::EdbgSubProtocol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Commands {
    Query = 0x00,
    Set = 0x01,
    Get = 0x02,
    StartSession = 0x10,
    EndSession = 0x11,
}

#[derive(Clone, Copy, Debug, Primitive, PartialEq, Eq)]
pub enum Responses {
    StatusOk = 0x80,
    List = 0x81,
    Data = 0x84,
    Failed = 0xA0,
    FailedWithData = 0xA1,
}

#[derive(Clone, Copy, Debug, Primitive, PartialEq, Eq)]
pub enum FailureCode {
    Ok = 0x00,
    NotSupported = 0x10,
    InvalidKey = 0x11,
    InvalidParameter = 0x12,
    InvalidParameterValue = 0x13,
    NoTargetPower = 0x38,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    Ok,
    List(Vec<u8>),
    Data(Vec<u8>),
    Failed(FailureCode),
}

impl Response {
    pub fn parse(response: &[u8]) -> Result<Self> {
        let kind = response
            .first()
            .copied()
            .and_then(Responses::from_u8)
            .ok_or(EdbgError::UnexpectedResponse)?;

        match kind {
            Responses::StatusOk => Ok(Response::Ok),
            Responses::List => Ok(Response::List(response[1..].to_vec())),
            Responses::Data => Ok(Response::Data(response[1..].to_vec())),
            Responses::Failed => {
                let code = response
                    .get(1)
                    .copied()
                    .and_then(FailureCode::from_u8)
                    .ok_or(EdbgError::UnexpectedResponse)?;
                Ok(Response::Failed(code))
            }
            Responses::FailedWithData => Err(EdbgError::UnexpectedResponse),
        }
    }
}

/// Start a HouseKeeping session; required once before any AVR8/AVR-ISP traffic.
///
/// The payload carries a trailing version byte after the command id, per
/// `StartSession.hpp`'s frame layout (and the teacher's own
/// `send_command_housekeeping`, which always appends one).
pub fn start_session(sub_protocol: &mut EdbgSubProtocol, clock: &dyn Clock) -> Result<()> {
    let frame = sub_protocol.send_frame(
        HandlerId::HouseKeeping,
        vec![Commands::StartSession as u8, 0x00],
        clock,
    )?;
    match Response::parse(&frame.payload)? {
        Response::Ok => Ok(()),
        Response::Failed(code) => Err(EdbgError::Failed(code as u8)),
        _ => Err(EdbgError::UnexpectedResponse),
    }
}

/// Ends a HouseKeeping session. `reset` is `EndSession.hpp`'s third payload
/// byte: whether the tool should reset the target on session close.
pub fn end_session(sub_protocol: &mut EdbgSubProtocol, reset: bool, clock: &dyn Clock) -> Result<()> {
    let frame = sub_protocol.send_frame(
        HandlerId::HouseKeeping,
        vec![Commands::EndSession as u8, 0x00, reset as u8],
        clock,
    )?;
    match Response::parse(&frame.payload)? {
        Response::Ok => Ok(()),
        Response::Failed(code) => Err(EdbgError::Failed(code as u8)),
        _ => Err(EdbgError::UnexpectedResponse),
    }
}
