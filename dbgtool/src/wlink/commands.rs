//! WCH-Link vendor command/response framing and the concrete command set.
//!
//! Grounded verbatim on `probe-rs/src/probe_drivers/wlink/commands.rs`'s
//! `WchLinkCommand`/`WchLinkCommandResponse` trait pair and frame layout
//! (`[0x81, cmd_id, len, payload...]` request, `[0x82 ok | 0x81 err, ...]`
//! response), cross-checked against `original_source/.../WchLinkInterface.cpp`
//! for the `GetDeviceInfo` payload shape.

use super::WchLinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Control = 0x0D,
    ConfigChip = 0x01,
    Reset = 0x0B,
    SetSpeed = 0x0C,
    DmiOp = 0x08,
}

pub trait WchLinkCommand {
    const COMMAND_ID: CommandId;
    type Response: WchLinkCommandResponse;

    fn payload(&self) -> Vec<u8>;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, WchLinkError> {
        let payload = self.payload();
        let payload_len = payload.len();
        if payload_len + 3 > buffer.len() {
            return Err(WchLinkError::InvalidPayload);
        }
        buffer[0] = 0x81;
        buffer[1] = Self::COMMAND_ID as u8;
        buffer[2] = payload_len as u8;
        buffer[3..payload_len + 3].copy_from_slice(&payload);
        Ok(payload_len + 3)
    }
}

pub trait WchLinkCommandResponse: Sized {
    fn from_payload(bytes: &[u8]) -> Result<Self, WchLinkError>;

    fn from_raw(resp: &[u8]) -> Result<Self, WchLinkError> {
        if resp.len() < 3 {
            return Err(WchLinkError::InvalidPayload);
        }
        match resp[0] {
            0x81 => Err(WchLinkError::Protocol(resp[1], resp.to_vec())),
            0x82 => {
                let len = resp[2] as usize;
                if len != resp[3..].len() {
                    return Err(WchLinkError::InvalidPayload);
                }
                Self::from_payload(&resp[3..3 + len])
            }
            _ => Err(WchLinkError::InvalidPayload),
        }
    }
}

impl WchLinkCommandResponse for () {
    fn from_payload(_bytes: &[u8]) -> Result<Self, WchLinkError> {
        Ok(())
    }
}

impl WchLinkCommandResponse for u8 {
    fn from_payload(bytes: &[u8]) -> Result<Self, WchLinkError> {
        bytes.first().copied().ok_or(WchLinkError::InvalidPayload)
    }
}

/// `GetDeviceInfo`: firmware version plus an optional variant tag (§4.7 "Session caching").
#[derive(Debug)]
pub struct GetDeviceInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetDeviceInfoResponse {
    pub firmware_major: u8,
    pub firmware_minor: u8,
    pub variant: Option<u8>,
}

impl WchLinkCommandResponse for GetDeviceInfoResponse {
    fn from_payload(bytes: &[u8]) -> Result<Self, WchLinkError> {
        if bytes.len() < 2 {
            return Err(WchLinkError::InvalidPayload);
        }
        Ok(GetDeviceInfoResponse {
            firmware_major: bytes[0],
            firmware_minor: bytes[1],
            variant: bytes.get(2).copied(),
        })
    }
}

impl WchLinkCommand for GetDeviceInfo {
    const COMMAND_ID: CommandId = CommandId::Control;
    type Response = GetDeviceInfoResponse;

    fn payload(&self) -> Vec<u8> {
        vec![0x01]
    }
}

/// Attach to the target chip; the 5-byte response carries the family/group id
/// needed by later commands (§4.7 "Session caching").
#[derive(Debug)]
pub struct AttachChip;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttachChipResponse {
    pub family_group_id: u8,
    pub target_variant_id: u32,
}

impl WchLinkCommandResponse for AttachChipResponse {
    fn from_payload(bytes: &[u8]) -> Result<Self, WchLinkError> {
        if bytes.len() != 5 {
            return Err(WchLinkError::InvalidPayload);
        }
        Ok(AttachChipResponse {
            family_group_id: bytes[0],
            target_variant_id: u32::from_be_bytes(bytes[1..5].try_into().unwrap()),
        })
    }
}

impl WchLinkCommand for AttachChip {
    const COMMAND_ID: CommandId = CommandId::Control;
    type Response = AttachChipResponse;

    fn payload(&self) -> Vec<u8> {
        vec![0x02]
    }
}

#[derive(Debug)]
pub struct DetachChip;

impl WchLinkCommand for DetachChip {
    const COMMAND_ID: CommandId = CommandId::Control;
    type Response = ();

    fn payload(&self) -> Vec<u8> {
        vec![0xFF]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Speed {
    Low = 0x03,
    Medium = 0x02,
    High = 0x01,
}

#[derive(Debug)]
pub struct SetSpeed {
    pub family_group_id: u8,
    pub speed: Speed,
}

impl WchLinkCommand for SetSpeed {
    const COMMAND_ID: CommandId = CommandId::SetSpeed;
    type Response = u8;

    fn payload(&self) -> Vec<u8> {
        vec![self.family_group_id, self.speed as u8]
    }
}

pub const DMI_OP_NOP: u8 = 0;
pub const DMI_OP_READ: u8 = 1;
pub const DMI_OP_WRITE: u8 = 2;

#[derive(Debug, Clone, Copy)]
pub enum DmiOp {
    Nop,
    Read { addr: u8 },
    Write { addr: u8, data: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmiOpResponse {
    pub addr: u8,
    pub data: u32,
    /// 2-bit DMI op status (0 = ok, 3 = request-in-progress, per the RISC-V
    /// Debug Module spec).
    pub status: u8,
}

impl WchLinkCommandResponse for DmiOpResponse {
    fn from_payload(bytes: &[u8]) -> Result<Self, WchLinkError> {
        if bytes.len() != 6 {
            return Err(WchLinkError::InvalidPayload);
        }
        Ok(DmiOpResponse {
            addr: bytes[0],
            data: u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]),
            status: bytes[5],
        })
    }
}

impl WchLinkCommand for DmiOp {
    const COMMAND_ID: CommandId = CommandId::DmiOp;
    type Response = DmiOpResponse;

    fn payload(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; 6];
        match self {
            DmiOp::Nop => bytes[5] = DMI_OP_NOP,
            DmiOp::Read { addr } => {
                bytes[0] = *addr;
                bytes[5] = DMI_OP_READ;
            }
            DmiOp::Write { addr, data } => {
                bytes[0] = *addr;
                bytes[1..5].copy_from_slice(&data.to_be_bytes());
                bytes[5] = DMI_OP_WRITE;
            }
        }
        bytes
    }
}

#[derive(Debug)]
pub struct ResetTarget;

impl WchLinkCommand for ResetTarget {
    const COMMAND_ID: CommandId = CommandId::Reset;
    type Response = ();

    fn payload(&self) -> Vec<u8> {
        vec![0x01]
    }
}

#[derive(Debug)]
pub struct EraseProgramMemory;

impl WchLinkCommand for EraseProgramMemory {
    const COMMAND_ID: CommandId = CommandId::ConfigChip;
    type Response = ();

    fn payload(&self) -> Vec<u8> {
        vec![0x01]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_bytes_wraps_payload() {
        let mut buffer = [0u8; 16];
        let written = AttachChip.to_bytes(&mut buffer).unwrap();
        assert_eq!(written, 4);
        assert_eq!(&buffer[..4], &[0x81, CommandId::Control as u8, 1, 0x02]);
    }

    #[test]
    fn from_raw_rejects_error_frame() {
        let resp = [0x81u8, 0x55, 0x00];
        let err = AttachChipResponse::from_raw(&resp).unwrap_err();
        assert!(matches!(err, WchLinkError::Protocol(0x55, _)));
    }

    #[test]
    fn from_raw_parses_success_frame() {
        let mut resp = vec![0x82u8, CommandId::Control as u8, 5];
        resp.extend_from_slice(&[0x03, 0x00, 0x00, 0x00, 0x07]);
        let parsed = AttachChipResponse::from_raw(&resp).unwrap();
        assert_eq!(parsed.family_group_id, 0x03);
        assert_eq!(parsed.target_variant_id, 7);
    }

    #[test]
    fn dmi_op_payload_layout() {
        let op = DmiOp::Write { addr: 0x10, data: 0xDEADBEEF };
        assert_eq!(
            op.payload(),
            vec![0x10, 0xDE, 0xAD, 0xBE, 0xEF, DMI_OP_WRITE]
        );
    }
}
