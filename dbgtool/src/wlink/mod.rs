//! The WCH-Link DTM and debug driver (C7): framed command I/O, IAP-mode
//! recovery, DMI read/write with retry, the vendor flash-program path, and
//! session caching — serving the generic RISC-V Debug-Module translator
//! (external collaborator) through [`dtm::read_dmi_register`]/
//! [`dtm::write_dmi_register`].
//!
//! Grounded on `probe-rs/src/probe_drivers/wlink/commands.rs` (cleaner and
//! more complete than the older `probe/wlink/mod.rs` snapshot, which depends
//! on `nusb` — not a declared dependency) and cross-checked against
//! `original_source/.../WchLinkInterface.cpp`/`WchFirmwareVersion.hpp` for
//! the device-info payload and the firmware-version comparison.

pub mod commands;
pub mod dtm;
pub mod flash;

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::clock::Clock;
use crate::transport::{DeviceSelector, TransportError, UsbTransport};
use commands::{
    AttachChip, AttachChipResponse, DetachChip, GetDeviceInfo, GetDeviceInfoResponse, ResetTarget,
    SetSpeed, Speed, WchLinkCommand, WchLinkCommandResponse,
};

#[derive(Debug, Error)]
pub enum WchLinkError {
    #[error("WCH-Link reported protocol error {0:#04x}")]
    Protocol(u8, Vec<u8>),
    #[error("malformed response payload from WCH-Link")]
    InvalidPayload,
    #[error("operation timed out")]
    Timeout,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, WchLinkError>;

/// Minimum supported firmware version; older firmware is usable but logs a
/// warning on `post_init()` (§4.7 "Firmware-version gate").
const MINIMUM_FIRMWARE: (u8, u8) = (2, 9);

/// Frames one `WchLinkCommand` per round-trip over a bulk transport.
pub struct WchLinkFramer {
    transport: UsbTransport,
}

impl WchLinkFramer {
    pub fn new(transport: UsbTransport) -> Self {
        Self { transport }
    }

    pub fn send_command<C: WchLinkCommand>(&mut self, command: C) -> Result<C::Response> {
        let unit = self.transport.unit_size().max(64);
        let mut buffer = vec![0u8; unit];
        let size = command.to_bytes(&mut buffer)?;
        self.transport.write(&buffer[..size])?;

        let mut response_buffer = vec![0u8; unit];
        let read = self
            .transport
            .read(&mut response_buffer, Duration::from_millis(1000))?;
        if read == 0 {
            return Err(WchLinkError::InvalidPayload);
        }
        C::Response::from_raw(&response_buffer[..read])
    }
}

/// Cached per-session identity derived from the `Attach` response (§4.7
/// "Session caching").
#[derive(Debug, Clone, Copy)]
pub struct WchLinkSession {
    pub family_group_id: u8,
    pub target_variant_id: u32,
}

pub struct WchLinkDriver {
    framer: WchLinkFramer,
    session: Option<WchLinkSession>,
    dmi_retry_delay: Duration,
}

impl WchLinkDriver {
    pub fn new(transport: UsbTransport, dmi_retry_delay: Duration) -> Self {
        Self {
            framer: WchLinkFramer::new(transport),
            session: None,
            dmi_retry_delay,
        }
    }

    /// Opens the normal (vid,pid); if absent but the IAP pair is present,
    /// runs the bootloader-exit recovery sequence first (§4.1/§4.7).
    pub fn open(
        normal: DeviceSelector,
        iap: DeviceSelector,
        iap_reenumerate_timeout: Duration,
        dmi_retry_delay: Duration,
        clock: &dyn Clock,
    ) -> Result<Self> {
        if !crate::transport::bulk_device_present(normal)
            && crate::transport::bulk_device_present(iap)
        {
            crate::transport::exit_iap_mode(iap, normal, iap_reenumerate_timeout, clock)?;
        }
        let transport = crate::transport::open_unique_bulk(normal, 0, 0x01, 0x81, 64)?;
        Ok(Self::new(transport, dmi_retry_delay))
    }

    pub fn device_info(&mut self) -> Result<GetDeviceInfoResponse> {
        self.framer.send_command(GetDeviceInfo)
    }

    /// Reads firmware version and logs a warning if it is below the minimum
    /// supported version (non-fatal, §4.7).
    pub fn post_init(&mut self) -> Result<()> {
        let info = self.device_info()?;
        if (info.firmware_major, info.firmware_minor) < MINIMUM_FIRMWARE {
            warn!(
                "WCH-Link firmware {}.{} is older than the minimum supported {}.{}",
                info.firmware_major, info.firmware_minor, MINIMUM_FIRMWARE.0, MINIMUM_FIRMWARE.1
            );
        }
        Ok(())
    }

    pub fn attach(&mut self) -> Result<WchLinkSession> {
        let response: AttachChipResponse = self.framer.send_command(AttachChip)?;
        let session = WchLinkSession {
            family_group_id: response.family_group_id,
            target_variant_id: response.target_variant_id,
        };
        self.session = Some(session);
        Ok(session)
    }

    pub fn detach(&mut self) -> Result<()> {
        self.framer.send_command(DetachChip)?;
        self.session = None;
        Ok(())
    }

    fn session(&self) -> Result<WchLinkSession> {
        self.session.ok_or(WchLinkError::InvalidPayload)
    }

    pub fn set_speed(&mut self, speed: Speed) -> Result<()> {
        let family_group_id = self.session()?.family_group_id;
        self.framer
            .send_command(SetSpeed { family_group_id, speed })?;
        Ok(())
    }

    pub fn reset_target(&mut self) -> Result<()> {
        self.framer.send_command(ResetTarget)
    }

    pub fn read_dmi_register(&mut self, addr: u8, clock: &dyn Clock) -> Result<u32> {
        dtm::read_dmi_register(&mut self.framer, addr, self.dmi_retry_delay, clock)
    }

    pub fn write_dmi_register(&mut self, addr: u8, data: u32, clock: &dyn Clock) -> Result<()> {
        dtm::write_dmi_register(&mut self.framer, addr, data, self.dmi_retry_delay, clock)
    }

    pub fn erase_program_memory(&mut self) -> Result<()> {
        self.framer.send_command(commands::EraseProgramMemory)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn firmware_below_minimum_is_detected() {
        assert!((2u8, 8u8) < MINIMUM_FIRMWARE);
        assert!((2u8, 9u8) >= MINIMUM_FIRMWARE);
        assert!((3u8, 0u8) >= MINIMUM_FIRMWARE);
    }
}
