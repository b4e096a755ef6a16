//! AVR ISP driver (C5): a thin SPI-programming-mode driver served by the
//! `AvrIsp` handler (id 0x11).
//!
//! Grounded on `original_source/.../EdbgAvrIspInterface.hpp` for the operation
//! surface (`activate`/`deactivate`/`getDeviceId`/`readFuse`/`readLockBitByte`/
//! `programFuse`, byte-at-a-time signature reads) — no Rust file in the
//! teacher pack implements AVR ISP, so this module follows the response/error
//! shape of `dbgtool::edbg::housekeeping` (the teacher's cleanest `Response`
//! pattern) rather than copying a non-existent Rust original.

use super::{EdbgError, HandlerId, Result};
use crate::clock::Clock;
use crate::edbg::EdbgSubProtocol;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum Command {
    SetParameters = 0x01,
    EnterProgmode = 0x10,
    LeaveProgmode = 0x11,
    ReadSignature = 0x20,
    ReadFuse = 0x21,
    ReadLockBits = 0x22,
    ProgramFuse = 0x23,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum ResponseId {
    StatusOk = 0x80,
    Data = 0x84,
    Failed = 0xA0,
}

fn parse_status(frame: &super::AvrResponseFrame) -> Result<()> {
    match frame.payload.first().copied() {
        Some(0x80) => Ok(()),
        Some(0xA0) => Err(EdbgError::Failed(frame.payload.get(1).copied().unwrap_or(0xFF))),
        _ => Err(EdbgError::UnexpectedResponse),
    }
}

fn parse_data(frame: &super::AvrResponseFrame) -> Result<Vec<u8>> {
    match frame.payload.first().copied() {
        Some(id) if id == ResponseId::Data as u8 => Ok(frame.payload[1..].to_vec()),
        Some(id) if id == ResponseId::Failed as u8 => {
            Err(EdbgError::Failed(frame.payload.get(1).copied().unwrap_or(0xFF)))
        }
        _ => Err(EdbgError::UnexpectedResponse),
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FuseType {
    Low,
    High,
    Extended,
}

impl FuseType {
    /// Derives the fuse type from a register descriptor's name, the only
    /// thing the AVR ISP protocol cares about (there is no generic "fuse
    /// index" on the wire — each byte has a dedicated command parameter).
    pub fn from_register_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.contains("extended") {
            Some(FuseType::Extended)
        } else if lower.contains("high") {
            Some(FuseType::High)
        } else if lower.contains("low") {
            Some(FuseType::Low)
        } else {
            None
        }
    }

    fn wire_code(self) -> u8 {
        match self {
            FuseType::Low => 0x00,
            FuseType::High => 0x01,
            FuseType::Extended => 0x02,
        }
    }
}

/// Per-target timing/poll-index block pushed once on activation (§4.5).
#[derive(Clone, Debug, Default)]
pub struct IspParameters {
    pub programming_enable_poll_index: u8,
    pub erase_delay_ms: u8,
    pub stabilisation_delay_ms: u8,
}

impl IspParameters {
    fn to_bytes(&self) -> Vec<u8> {
        vec![
            self.programming_enable_poll_index,
            self.erase_delay_ms,
            self.stabilisation_delay_ms,
        ]
    }
}

pub struct AvrIspDriver {
    sub_protocol: std::rc::Rc<std::cell::RefCell<EdbgSubProtocol>>,
    parameters: IspParameters,
    active: bool,
}

impl AvrIspDriver {
    pub fn new(
        sub_protocol: std::rc::Rc<std::cell::RefCell<EdbgSubProtocol>>,
        parameters: IspParameters,
    ) -> Self {
        Self {
            sub_protocol,
            parameters,
            active: false,
        }
    }

    fn send(&self, payload: Vec<u8>, clock: &dyn Clock) -> Result<super::AvrResponseFrame> {
        self.sub_protocol
            .borrow_mut()
            .send_frame(HandlerId::AvrIsp, payload, clock)
    }

    /// Pushes the ISP parameter block and enables the SPI programming
    /// interface (§4.5: "a small per-target ISP-parameter block ... is
    /// pushed once on activation").
    pub fn activate(&mut self, clock: &dyn Clock) -> Result<()> {
        let mut payload = vec![Command::SetParameters as u8];
        payload.extend(self.parameters.to_bytes());
        parse_status(&self.send(payload, clock)?)?;

        parse_status(&self.send(vec![Command::EnterProgmode as u8], clock)?)?;
        self.active = true;
        Ok(())
    }

    pub fn deactivate(&mut self, clock: &dyn Clock) -> Result<()> {
        parse_status(&self.send(vec![Command::LeaveProgmode as u8], clock)?)?;
        self.active = false;
        Ok(())
    }

    fn require_active(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(EdbgError::UnexpectedResponse)
        }
    }

    fn read_signature_byte(&self, address: u8, clock: &dyn Clock) -> Result<u8> {
        self.require_active()?;
        let data = parse_data(&self.send(vec![Command::ReadSignature as u8, address], clock)?)?;
        data.first().copied().ok_or(EdbgError::UnexpectedResponse)
    }

    /// The EDBG AVRISP protocol only allows reading one signature byte at a
    /// time (§4.5).
    pub fn read_signature(&self, clock: &dyn Clock) -> Result<(u8, u8, u8)> {
        Ok((
            self.read_signature_byte(0, clock)?,
            self.read_signature_byte(1, clock)?,
            self.read_signature_byte(2, clock)?,
        ))
    }

    pub fn read_fuse(&self, fuse_type: FuseType, clock: &dyn Clock) -> Result<u8> {
        self.require_active()?;
        let data = parse_data(&self.send(vec![Command::ReadFuse as u8, fuse_type.wire_code()], clock)?)?;
        data.first().copied().ok_or(EdbgError::UnexpectedResponse)
    }

    pub fn read_lock_bits(&self, clock: &dyn Clock) -> Result<u8> {
        self.require_active()?;
        let data = parse_data(&self.send(vec![Command::ReadLockBits as u8], clock)?)?;
        data.first().copied().ok_or(EdbgError::UnexpectedResponse)
    }

    pub fn program_fuse(&self, fuse_type: FuseType, value: u8, clock: &dyn Clock) -> Result<()> {
        self.require_active()?;
        parse_status(&self.send(
            vec![Command::ProgramFuse as u8, fuse_type.wire_code(), value],
            clock,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fuse_type_derived_from_register_name() {
        assert_eq!(FuseType::from_register_name("FUSE_LOW"), Some(FuseType::Low));
        assert_eq!(FuseType::from_register_name("fuseHighByte"), Some(FuseType::High));
        assert_eq!(
            FuseType::from_register_name("ExtendedFuse"),
            Some(FuseType::Extended)
        );
        assert_eq!(FuseType::from_register_name("LOCKBITS"), None);
    }

    #[test]
    fn isp_parameters_serialize_in_order() {
        let params = IspParameters {
            programming_enable_poll_index: 3,
            erase_delay_ms: 10,
            stabilisation_delay_ms: 20,
        };
        assert_eq!(params.to_bytes(), vec![3, 10, 20]);
    }
}
