//! The EDBG sub-protocol (C3) and the drivers layered on top of it: AVR8-Generic
//! (C4), AVR ISP (C5) and EDBG power management (C6).
//!
//! Grounded on `probe-rs/src/probe/edbg/mod.rs` (`send_command`, fragmentation,
//! `check_event`) and cross-checked against `original_source/.../AvrCommandFrame.hpp`
//! for the exact frame layout.

pub mod avr8generic;
pub mod avrisp;
pub mod housekeeping;
pub mod power;

use std::time::Duration;

use enum_primitive_derive::Primitive;
use num_traits::FromPrimitive;
use thiserror::Error;

use crate::clock::Clock;
use crate::cmsisdap::edbg::{
    AvrCommand, AvrCommandResponse, AvrEventRequest, AvrEventResponse, AvrRspRequest,
    AvrRspResponse,
};
use crate::cmsisdap::CmsisDapFramer;

#[derive(Debug, Error)]
pub enum EdbgError {
    #[error("debug tool returned failure code {0:#04x}")]
    Failed(u8),
    #[error("unexpected response from debug tool")]
    UnexpectedResponse,
    #[error("debugWIRE physical interface activation failed")]
    DebugWirePhysicalInterface,
    #[error("no free hardware breakpoint slots")]
    OutOfHardwareBreakpoints,
    #[error("BREAK event was not delivered in time")]
    EventTimeout,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EdbgError>;

/// EDBG sub-protocol handler ids (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Primitive)]
pub enum HandlerId {
    Discovery = 0x00,
    HouseKeeping = 0x01,
    AvrIsp = 0x11,
    Avr8Generic = 0x12,
    Avr32Generic = 0x13,
    EdbgControl = 0x20,
}

const SOF: u8 = 0x0E;
const FRAME_VERSION: u8 = 0x00;

/// `AvrCommandFrame` / `AvrResponseFrame` (§3): `[SOF, ver, seq_lo, seq_hi, handler_id, payload...]`.
#[derive(Debug, Clone)]
pub struct AvrCommandFrame {
    pub sequence_id: u16,
    pub handler_id: HandlerId,
    pub payload: Vec<u8>,
}

impl AvrCommandFrame {
    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(5 + self.payload.len());
        bytes.push(SOF);
        bytes.push(FRAME_VERSION);
        bytes.extend_from_slice(&self.sequence_id.to_le_bytes());
        bytes.push(self.handler_id as u8);
        bytes.extend_from_slice(&self.payload);
        bytes
    }
}

#[derive(Debug, Clone)]
pub struct AvrResponseFrame {
    pub sequence_id: u16,
    pub handler_id: u8,
    pub payload: Vec<u8>,
}

impl AvrResponseFrame {
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 5 || bytes[0] != SOF {
            return Err(EdbgError::UnexpectedResponse);
        }
        let sequence_id = u16::from_le_bytes([bytes[2], bytes[3]]);
        Ok(AvrResponseFrame {
            sequence_id,
            handler_id: bytes[4],
            payload: bytes[5..].to_vec(),
        })
    }
}

/// The asynchronous AVR event id signalling a target BREAK.
pub const AVR_EVENT_BREAK: u8 = 0x40;

pub struct AvrEvent {
    pub event_id: u8,
    pub event_data: Vec<u8>,
}

/// The EDBG sub-protocol layer: owns the per-stream sequence counter and the
/// fragmentation/reassembly logic described in §4.3.
pub struct EdbgSubProtocol {
    framer: CmsisDapFramer,
    sequence_counter: u16,
}

impl EdbgSubProtocol {
    pub fn new(framer: CmsisDapFramer) -> Self {
        Self {
            framer,
            sequence_counter: 0,
        }
    }

    fn next_sequence_id(&mut self) -> u16 {
        let id = self.sequence_counter;
        self.sequence_counter = self.sequence_counter.wrapping_add(1);
        id
    }

    /// Send one `AvrCommandFrame`, fragmenting it across one or more
    /// `AvrCommand` (0x80) vendor commands, then reassemble the reply via
    /// repeated `AvrRsp` (0x81) polls. Returns the parsed `AvrResponseFrame`.
    pub fn send_frame(
        &mut self,
        handler_id: HandlerId,
        payload: Vec<u8>,
        clock: &dyn Clock,
    ) -> Result<AvrResponseFrame> {
        let sequence_id = self.next_sequence_id();
        let frame = AvrCommandFrame {
            sequence_id,
            handler_id,
            payload,
        };
        let bytes = frame.to_bytes();

        // Fragment size: the transport's unit size minus the 3-byte AvrCommand
        // fragment metadata (fragment_info + 2-byte length).
        let fragment_payload_size = self.framer.transport().unit_size().saturating_sub(3).max(1);
        let fragments: Vec<&[u8]> = bytes.chunks(fragment_payload_size).collect();
        let fragment_count = fragments.len() as u8;

        for (index, fragment) in fragments.iter().enumerate() {
            let fragment_number = (index + 1) as u8;
            let fragment_info = (fragment_number << 4) | fragment_count;
            let response: AvrCommandResponse = self
                .framer
                .send_command(
                    AvrCommand {
                        fragment_info,
                        command_packet: fragment,
                    },
                    clock,
                )
                .map_err(EdbgError::Other)?;

            let is_last = fragment_number == fragment_count;
            if is_last && !response.done {
                return Err(EdbgError::UnexpectedResponse);
            }
        }

        let response = self.receive_frame(clock)?;
        if response.sequence_id != sequence_id {
            return Err(EdbgError::UnexpectedResponse);
        }
        Ok(response)
    }

    fn receive_frame(&mut self, clock: &dyn Clock) -> Result<AvrResponseFrame> {
        let mut assembled = Vec::new();
        let mut expected_fragments: Option<u8> = None;
        let mut received_fragments = 0u8;

        loop {
            let response: AvrRspResponse = self
                .framer
                .send_command(AvrRspRequest, clock)
                .map_err(EdbgError::Other)?;

            if response.fragment_info == 0 {
                break;
            }

            let fragment_count = response.fragment_info & 0x0F;
            let fragment_number = response.fragment_info >> 4;

            match expected_fragments {
                None => expected_fragments = Some(fragment_count),
                Some(expected) if expected != fragment_count => {
                    return Err(EdbgError::UnexpectedResponse)
                }
                _ => {}
            }

            if fragment_number == 0 || fragment_number != received_fragments + 1 {
                return Err(EdbgError::UnexpectedResponse);
            }
            received_fragments = fragment_number;

            assembled.extend_from_slice(&response.command_packet);

            if received_fragments == fragment_count {
                break;
            }
        }

        AvrResponseFrame::from_bytes(&assembled)
    }

    /// Poll once for a pending asynchronous event; `None` means no event is
    /// currently available.
    pub fn poll_event(&mut self, clock: &dyn Clock) -> Result<Option<AvrEvent>> {
        let response: AvrEventResponse = self
            .framer
            .send_command(AvrEventRequest, clock)
            .map_err(EdbgError::Other)?;

        if response.events.is_empty() {
            return Ok(None);
        }

        Ok(Some(AvrEvent {
            event_id: response.events[0],
            event_data: response.events[1..].to_vec(),
        }))
    }

    /// Poll for an event matching `predicate` at 50ms intervals, up to
    /// `max_attempts` times (§4.4 "Event polling and BREAK delivery").
    pub fn wait_for_event(
        &mut self,
        max_attempts: u32,
        predicate: impl Fn(&AvrEvent) -> bool,
        clock: &dyn Clock,
    ) -> Result<Option<AvrEvent>> {
        for attempt in 0..max_attempts {
            if let Some(event) = self.poll_event(clock)? {
                if predicate(&event) {
                    return Ok(Some(event));
                }
            }
            if attempt + 1 < max_attempts {
                clock.sleep(Duration::from_millis(50));
            }
        }
        Ok(None)
    }

    /// Forwards an opaque command to whichever handler the caller names,
    /// without interpreting it (C9 `PassthroughCommand`/`PassthroughResponse`,
    /// used by diagnostic tooling that wants a command this crate doesn't
    /// otherwise model).
    pub fn passthrough(
        &mut self,
        command: dbgtool_types::PassthroughCommand,
        clock: &dyn Clock,
    ) -> Result<dbgtool_types::PassthroughResponse> {
        let handler_id =
            HandlerId::from_u8(command.handler_id).ok_or(EdbgError::UnexpectedResponse)?;
        let frame = self.send_frame(handler_id, command.payload, clock)?;
        Ok(dbgtool_types::PassthroughResponse {
            payload: frame.payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_frame_layout() {
        let frame = AvrCommandFrame {
            sequence_id: 0x0102,
            handler_id: HandlerId::Avr8Generic,
            payload: vec![0xAA, 0xBB],
        };
        let bytes = frame.to_bytes();
        assert_eq!(bytes, vec![SOF, 0x00, 0x02, 0x01, 0x12, 0xAA, 0xBB]);
    }

    #[test]
    fn response_frame_parses_sequence_and_handler() {
        let bytes = vec![SOF, 0x00, 0x05, 0x00, 0x12, 0x80];
        let frame = AvrResponseFrame::from_bytes(&bytes).unwrap();
        assert_eq!(frame.sequence_id, 5);
        assert_eq!(frame.handler_id, 0x12);
        assert_eq!(frame.payload, vec![0x80]);
    }

    #[test]
    fn response_frame_rejects_bad_sof() {
        let bytes = vec![0xFF, 0x00, 0x00, 0x00, 0x12, 0x80];
        assert!(AvrResponseFrame::from_bytes(&bytes).is_err());
    }

    #[test]
    fn sequence_counter_wraps_at_u16_overflow() {
        let mut counter = 0xFFFFu16;
        let id = counter;
        counter = counter.wrapping_add(1);
        assert_eq!(id, 0xFFFF);
        assert_eq!(counter, 0);
    }

    #[test]
    fn handler_id_round_trips_through_primitive() {
        assert_eq!(HandlerId::from_u8(0x12), Some(HandlerId::Avr8Generic));
        assert_eq!(HandlerId::from_u8(0x20), Some(HandlerId::EdbgControl));
    }

    /// §8 property 3 ("id match"): a response carrying the wrong sequence id
    /// must raise, never be silently accepted.
    #[test]
    fn send_frame_rejects_mismatched_sequence_id() {
        use crate::clock::fake::FakeClock;
        use crate::cmsisdap::CmsisDapFramer;
        use crate::transport::{fake::FakeTransport, UsbTransport};

        let fake_transport = FakeTransport::new(64);
        // AvrCommand ack: category 0x80, done=true.
        fake_transport.queue_read(vec![0x80, 0x00, 0x01]);
        // AvrRsp poll carries a frame whose sequence id (0x0099) does not
        // match the request's (0x0000).
        let bogus_frame = [SOF, 0x00, 0x99, 0x00, HandlerId::HouseKeeping as u8, 0x80];
        let mut rsp = vec![0x81u8, 0x11, 0x00, bogus_frame.len() as u8];
        rsp.extend_from_slice(&bogus_frame);
        fake_transport.queue_read(rsp);

        let transport = UsbTransport::fake(fake_transport);
        let framer = CmsisDapFramer::new(transport, 0);
        let mut sub_protocol = EdbgSubProtocol::new(framer);
        let clock = FakeClock::default();

        let result = sub_protocol.send_frame(HandlerId::HouseKeeping, vec![0x10], &clock);
        assert!(matches!(result, Err(EdbgError::UnexpectedResponse)));
    }

    #[test]
    fn passthrough_forwards_handler_id_and_payload_unmodified() {
        use crate::clock::fake::FakeClock;
        use crate::cmsisdap::CmsisDapFramer;
        use crate::transport::{fake::FakeTransport, UsbTransport};

        let fake_transport = FakeTransport::new(64);
        fake_transport.queue_read(vec![0x80, 0x00, 0x01]);
        let frame = [SOF, 0x00, 0x00, 0x00, HandlerId::EdbgControl as u8, 0x84, 0xAB];
        let mut rsp = vec![0x81u8, 0x11, 0x00, frame.len() as u8];
        rsp.extend_from_slice(&frame);
        fake_transport.queue_read(rsp);

        let transport = UsbTransport::fake(fake_transport);
        let framer = CmsisDapFramer::new(transport, 0);
        let mut sub_protocol = EdbgSubProtocol::new(framer);
        let clock = FakeClock::default();

        let command = dbgtool_types::PassthroughCommand {
            handler_id: HandlerId::EdbgControl as u8,
            payload: vec![0x02, 0x00, 0x00, 0x10],
        };
        let response = sub_protocol.passthrough(command, &clock).unwrap();
        assert_eq!(response.payload, vec![0x84, 0xAB]);
    }

    #[test]
    fn passthrough_rejects_unknown_handler_id() {
        use crate::clock::fake::FakeClock;
        use crate::cmsisdap::CmsisDapFramer;
        use crate::transport::{fake::FakeTransport, UsbTransport};

        let transport = UsbTransport::fake(FakeTransport::new(64));
        let framer = CmsisDapFramer::new(transport, 0);
        let mut sub_protocol = EdbgSubProtocol::new(framer);
        let clock = FakeClock::default();

        let command = dbgtool_types::PassthroughCommand {
            handler_id: 0x77,
            payload: vec![],
        };
        assert!(matches!(
            sub_protocol.passthrough(command, &clock),
            Err(EdbgError::UnexpectedResponse)
        ));
    }
}
