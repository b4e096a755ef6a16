//! CMSIS-DAP request/response framing (C2).
//!
//! Grounded on `probe-rs/src/probe/cmsisdap/commands/mod.rs`: the `Category`
//! newtype, the `Request`/`Response` trait pair, and the generic
//! `send_command<Req, Res>` function are kept essentially as-is; this module
//! adds the inter-command delay the spec calls for (§4.2).

pub mod edbg;

use std::ops::Deref;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use thiserror::Error;

use crate::clock::Clock;
use crate::transport::UsbTransport;

#[derive(Debug, Error)]
pub enum CmsisDapError {
    #[error("unexpected answer to command")]
    UnexpectedAnswer,
    #[error("CMSIS-DAP responded with an error")]
    ErrorResponse,
    #[error("not enough data in response from probe")]
    NotEnoughData,
    #[error("error in the USB HID access")]
    HidApi(#[from] hidapi::HidError),
    #[error("error in the USB access")]
    UsbError(#[from] rusb::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// The one-byte CMSIS-DAP command category (e.g. `0x80` for `AvrCommand`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Category(pub u8);

impl Deref for Category {
    type Target = u8;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

pub trait Request {
    const CATEGORY: Category;

    /// Serialize into `buffer` starting at `offset`; returns the number of
    /// bytes written.
    fn to_bytes(&self, buffer: &mut [u8], offset: usize) -> Result<usize>;
}

pub trait Response: Sized {
    fn from_bytes(buffer: &[u8], offset: usize) -> Result<Self>;
}

/// Paces successive commands on one framer instance (§4.2): some EDBG tools
/// corrupt state silently without a minimum inter-command interval.
#[derive(Debug)]
pub struct CommandPacer {
    delay: Duration,
    last_command_at: Option<std::time::Instant>,
}

impl CommandPacer {
    pub fn new(delay_ms: u32) -> Self {
        Self {
            delay: Duration::from_millis(delay_ms as u64),
            last_command_at: None,
        }
    }

    fn wait_if_needed(&mut self, clock: &dyn Clock) {
        if self.delay.is_zero() {
            return;
        }
        if let Some(last) = self.last_command_at {
            let elapsed = clock.now().saturating_duration_since(last);
            if elapsed < self.delay {
                clock.sleep(self.delay - elapsed);
            }
        }
        self.last_command_at = Some(clock.now());
    }
}

/// The CMSIS-DAP framer for one transport.
pub struct CmsisDapFramer {
    transport: UsbTransport,
    pacer: CommandPacer,
}

impl CmsisDapFramer {
    pub fn new(transport: UsbTransport, command_delay_ms: u32) -> Self {
        Self {
            transport,
            pacer: CommandPacer::new(command_delay_ms),
        }
    }

    pub fn transport(&self) -> &UsbTransport {
        &self.transport
    }

    /// Serialize `request`, write one unit (report or bulk transfer), read one
    /// unit back, and validate the echoed category before parsing the
    /// response. Mirrors `probe-rs`'s `send_command`.
    pub fn send_command<Req: Request, Res: Response>(
        &mut self,
        request: Req,
        clock: &dyn Clock,
    ) -> Result<Res> {
        self.pacer.wait_if_needed(clock);

        let unit = self.transport.unit_size();
        let mut buffer = vec![0u8; unit.max(64)];
        buffer[0] = *Req::CATEGORY;
        let size = request.to_bytes(&mut buffer, 1)? + 1;

        self.transport.write(&buffer[..size])?;

        let mut response_buffer = vec![0u8; unit.max(64)];
        self.transport
            .read(&mut response_buffer, Duration::from_millis(1000))?;

        if response_buffer[0] == *Req::CATEGORY {
            Res::from_bytes(&response_buffer, 1)
        } else {
            Err(anyhow!(CmsisDapError::UnexpectedAnswer))
                .with_context(|| format!("expected category {:#04x}", *Req::CATEGORY))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::fake::FakeClock;

    struct Echo(u8);

    impl Request for Echo {
        const CATEGORY: Category = Category(0x7F);

        fn to_bytes(&self, buffer: &mut [u8], offset: usize) -> Result<usize> {
            buffer[offset] = self.0;
            Ok(1)
        }
    }

    #[test]
    fn pacer_sleeps_for_remaining_delay() {
        let clock = FakeClock::default();
        let mut pacer = CommandPacer::new(50);
        pacer.wait_if_needed(&clock);
        assert!(clock.sleeps().is_empty());

        clock.sleep(Duration::from_millis(10));
        pacer.wait_if_needed(&clock);
        assert_eq!(clock.sleeps(), vec![Duration::from_millis(10), Duration::from_millis(40)]);
    }

    #[test]
    fn pacer_disabled_when_delay_zero() {
        let clock = FakeClock::default();
        let mut pacer = CommandPacer::new(0);
        pacer.wait_if_needed(&clock);
        pacer.wait_if_needed(&clock);
        assert!(clock.sleeps().is_empty());
    }

    #[test]
    fn category_deref_returns_inner_byte() {
        assert_eq!(*Category(0x80), 0x80);
        assert_eq!(Echo::CATEGORY, Category(0x7F));
    }
}
