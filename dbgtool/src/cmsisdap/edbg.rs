//! The three CMSIS-DAP vendor commands EDBG tools use to carry AVR frames:
//! `AvrCommand` (0x80), `AvrResponse` (0x81) and `AvrEvent` (0x82).
//!
//! Grounded verbatim on `probe-rs/src/probe/cmsisdap/commands/edbg/{avr_cmd,avr_rsp,avr_evt}.rs`,
//! with two bugs fixed against `original_source/.../AVR/{AvrCommand,AvrEvent}.cpp`:
//! the teacher's `AvrCommand::to_bytes` never copies `command_packet` into the
//! output buffer (would silently send a zeroed payload), and both the
//! `AvrCommand` and `AvrEvent` size fields are big-endian on the wire, not
//! little-endian as the teacher's snapshot has them.

use anyhow::Result;
use scroll::{Pread, BE};

use super::{Category, Request, Response};

/// One fragment of an `AvrCommandFrame`, per §3's fragment layout.
pub struct AvrCommand<'a> {
    pub fragment_info: u8,
    pub command_packet: &'a [u8],
}

impl Request for AvrCommand<'_> {
    const CATEGORY: Category = Category(0x80);

    fn to_bytes(&self, buffer: &mut [u8], offset: usize) -> Result<usize> {
        buffer[offset] = self.fragment_info;
        let len = self.command_packet.len() as u16;
        buffer[(offset + 1)..(offset + 3)].copy_from_slice(&len.to_be_bytes());
        buffer[(offset + 3)..(offset + 3 + self.command_packet.len())]
            .copy_from_slice(self.command_packet);
        Ok(len as usize + 3)
    }
}

pub struct AvrCommandResponse {
    pub done: bool,
}

impl Response for AvrCommandResponse {
    fn from_bytes(buffer: &[u8], offset: usize) -> Result<Self> {
        let done = buffer[offset + 1] == 0x01;
        Ok(AvrCommandResponse { done })
    }
}

/// Poll for the next fragment of the accumulating `AvrResponseFrame`.
pub struct AvrRspRequest;

impl Request for AvrRspRequest {
    const CATEGORY: Category = Category(0x81);

    fn to_bytes(&self, _buffer: &mut [u8], _offset: usize) -> Result<usize> {
        Ok(0)
    }
}

pub struct AvrRspResponse {
    pub fragment_info: u8,
    pub command_packet: Vec<u8>,
}

impl Response for AvrRspResponse {
    fn from_bytes(buffer: &[u8], offset: usize) -> Result<Self> {
        let fragment_info = buffer[offset];
        if fragment_info == 0 {
            Ok(AvrRspResponse {
                fragment_info,
                command_packet: vec![],
            })
        } else {
            let size: u16 = buffer.pread_with(offset + 1, BE)?;
            Ok(AvrRspResponse {
                fragment_info,
                command_packet: buffer[offset + 3..offset + 3 + size as usize].to_vec(),
            })
        }
    }
}

/// Poll for a pending asynchronous AVR event (e.g. BREAK).
pub struct AvrEventRequest;

impl Request for AvrEventRequest {
    const CATEGORY: Category = Category(0x82);

    fn to_bytes(&self, _buffer: &mut [u8], _offset: usize) -> Result<usize> {
        Ok(0)
    }
}

pub struct AvrEventResponse {
    pub events: Vec<u8>,
}

impl Response for AvrEventResponse {
    fn from_bytes(buffer: &[u8], offset: usize) -> Result<Self> {
        // "Response size is two bytes, MSB" (AvrEvent.cpp).
        let size: u16 = buffer.pread_with(offset, BE)?;
        Ok(AvrEventResponse {
            events: buffer[offset + 2..offset + 2 + size as usize].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn avr_command_copies_payload() {
        let payload = [0xAA, 0xBB, 0xCC];
        let cmd = AvrCommand {
            fragment_info: 0x11,
            command_packet: &payload,
        };
        let mut buffer = [0u8; 16];
        let written = cmd.to_bytes(&mut buffer, 0).unwrap();
        assert_eq!(written, 6);
        assert_eq!(buffer[0], 0x11);
        assert_eq!(&buffer[3..6], &payload);
    }

    #[test]
    fn avr_rsp_response_end_of_stream() {
        let buffer = [0u8, 0, 0, 0];
        let response = AvrRspResponse::from_bytes(&buffer, 0).unwrap();
        assert_eq!(response.fragment_info, 0);
        assert!(response.command_packet.is_empty());
    }

    #[test]
    fn avr_rsp_response_parses_fragment() {
        // fragment_info=0x12, size=3 (big-endian), payload
        let buffer = [0x12u8, 0x00, 0x03, 0xDE, 0xAD, 0xBE];
        let response = AvrRspResponse::from_bytes(&buffer, 0).unwrap();
        assert_eq!(response.fragment_info, 0x12);
        assert_eq!(response.command_packet, vec![0xDE, 0xAD, 0xBE]);
    }

    #[test]
    fn avr_event_response_parses_events() {
        // size=2 (big-endian), event bytes
        let buffer = [0x00u8, 0x02, 0x40, 0x01];
        let response = AvrEventResponse::from_bytes(&buffer, 0).unwrap();
        assert_eq!(response.events, vec![0x40, 0x01]);
    }

    #[test]
    fn avr_event_response_parses_events_larger_than_one_byte() {
        let mut buffer = vec![0x01u8, 0x00]; // size=256, big-endian
        buffer.extend(std::iter::repeat(0x55u8).take(256));
        let response = AvrEventResponse::from_bytes(&buffer, 0).unwrap();
        assert_eq!(response.events.len(), 256);
        assert!(response.events.iter().all(|&b| b == 0x55));
    }

    #[test]
    fn avr_command_size_field_is_big_endian() {
        let payload = vec![0u8; 256];
        let cmd = AvrCommand {
            fragment_info: 0x11,
            command_packet: &payload,
        };
        let mut buffer = vec![0u8; 260];
        cmd.to_bytes(&mut buffer, 0).unwrap();
        assert_eq!(&buffer[1..3], &[0x01, 0x00], "size=256 big-endian");
    }
}
