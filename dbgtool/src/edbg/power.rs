//! EDBG Control handler (id 0x20): target power management (C6).
//!
//! Grounded on `original_source/.../EdbgTargetPowerManagementInterface.cpp` for
//! the exact `SetParameter` payload layout and the `CONTROL_TARGET_POWER`
//! parameter id (`context=0x00, id=0x10, size=1`); the teacher's own
//! `probe-rs/src/probe/cmsisdap/commands/edbg/{set,set_config}.rs` are
//! `unimplemented!()` stubs for the CMSIS-level `SET`/`SET_CONFIG` vendor
//! commands, which this module deliberately does not use — per §4.6, EDBG
//! power management goes through the `EdbgControl` handler inside the AVR
//! command frame, the same path as every other AVR8/HouseKeeping command.

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;

use super::{EdbgError, HandlerId, Result};
use crate::clock::Clock;
use crate::edbg::EdbgSubProtocol;

const SET_PARAMETER: u8 = 0x01;
const PARAMETER_VERSION: u8 = 0x00;
const TARGET_POWER_CONTEXT: u8 = 0x00;
const TARGET_POWER_ID: u8 = 0x10;

#[derive(Clone, Copy, Debug, Primitive, PartialEq, Eq)]
enum ResponseId {
    Ok = 0x80,
    Data = 0x84,
    Failed = 0xA0,
}

fn set_parameter(
    sub_protocol: &mut EdbgSubProtocol,
    context: u8,
    id: u8,
    value: u8,
    clock: &dyn Clock,
) -> Result<()> {
    let frame = sub_protocol.send_frame(
        HandlerId::EdbgControl,
        vec![SET_PARAMETER, PARAMETER_VERSION, context, id, 0x01, value],
        clock,
    )?;

    let response_id = frame
        .payload
        .first()
        .copied()
        .and_then(ResponseId::from_u8)
        .ok_or(EdbgError::UnexpectedResponse)?;

    match response_id {
        ResponseId::Ok | ResponseId::Data => Ok(()),
        ResponseId::Failed => Err(EdbgError::Failed(
            frame.payload.get(1).copied().unwrap_or(0xFF),
        )),
    }
}

/// Drives the target's `VTref`/power rail on, per §4.6.
pub fn enable_target_power(sub_protocol: &mut EdbgSubProtocol, clock: &dyn Clock) -> Result<()> {
    set_parameter(sub_protocol, TARGET_POWER_CONTEXT, TARGET_POWER_ID, 0x01, clock)
}

pub fn disable_target_power(sub_protocol: &mut EdbgSubProtocol, clock: &dyn Clock) -> Result<()> {
    set_parameter(sub_protocol, TARGET_POWER_CONTEXT, TARGET_POWER_ID, 0x00, clock)
}
