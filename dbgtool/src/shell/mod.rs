//! The Debug Tool Shell (C8): a capability dispatcher binding C1-C7 into one
//! object per connected tool, re-expressed from the original's virtual
//! `getXInterface()` accessors as idiomatic `Option`/`Result`-returning
//! methods (REDESIGN FLAGS: no deep virtual inheritance of tool classes).
//!
//! Grounded on `original_source/.../DebugTool.hpp` for the capability surface
//! (`init`/`postInit`/`close`/`getSerialNumber`, `getAvr8DebugInterface`,
//! `getAvrIspInterface`, `getTargetPowerManagementInterface`,
//! `getRiscVDebugInterface`) and on `probe-rs/src/probe/edbg/mod.rs`'s
//! `has_avr_interface`/`try_get_avr_interface` naming for the Rust-idiomatic
//! accessor shape.

pub mod identity;

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use identity::ToolModel;

use crate::clock::Clock;
use crate::cmsisdap::CmsisDapFramer;
use crate::config::ToolConfig;
use crate::edbg::{avr8generic::Avr8GenericDriver, avrisp, housekeeping, power, EdbgSubProtocol};
use crate::error::DriverError;
use crate::transport::{self, DeviceSelector, UsbTransport};
use crate::wlink::WchLinkDriver;

const CMSIS_HID_REPORT_SIZE: usize = 64;
const DEFAULT_IAP_REENUMERATE_TIMEOUT: Duration = Duration::from_secs(8);
const DEFAULT_DMI_RETRY_DELAY: Duration = Duration::from_micros(10);

enum Connection {
    Uninitialized,
    Edbg(Rc<RefCell<EdbgSubProtocol>>),
    Wch(WchLinkDriver),
}

/// One shell per connected tool. Not `Send`/`Sync`: per §5, all calls happen
/// on the single target-controller thread.
pub struct DebugToolShell {
    model: ToolModel,
    config: ToolConfig,
    connection: Connection,
    initialised: bool,
    avr8: Option<Avr8GenericDriver>,
    avr_isp: Option<avrisp::AvrIspDriver>,
}

impl DebugToolShell {
    pub fn new(model: ToolModel, config: ToolConfig) -> Self {
        Self {
            model,
            config,
            connection: Connection::Uninitialized,
            initialised: false,
            avr8: None,
            avr_isp: None,
        }
    }

    pub fn is_initialised(&self) -> bool {
        self.initialised
    }

    pub fn name(&self) -> &'static str {
        self.model.identity().name
    }

    /// Opens the USB device, claims the interface, and starts the handler
    /// session (EDBG HouseKeeping, or the WCH DeviceInfo handshake).
    pub fn init(&mut self, clock: &dyn Clock) -> Result<(), DriverError> {
        let identity = self.model.identity();
        let selector = DeviceSelector {
            vendor_id: identity.vendor_id,
            product_id: identity.product_id,
        };

        if self.model.is_wch() {
            let iap = self
                .model
                .iap_identity()
                .map(|iap| DeviceSelector {
                    vendor_id: iap.vendor_id,
                    product_id: iap.product_id,
                })
                .ok_or(DriverError::InvalidConfig(
                    "WCH tool model is missing an IAP identity".into(),
                ))?;

            let mut driver = if self.config.exit_iap_mode {
                WchLinkDriver::open(
                    selector,
                    iap,
                    DEFAULT_IAP_REENUMERATE_TIMEOUT,
                    DEFAULT_DMI_RETRY_DELAY,
                    clock,
                )?
            } else {
                let transport = transport::open_unique_bulk(selector, 0, 0x01, 0x81, 64)?;
                WchLinkDriver::new(transport, DEFAULT_DMI_RETRY_DELAY)
            };
            driver.attach()?;
            self.connection = Connection::Wch(driver);
        } else {
            let transport: UsbTransport =
                transport::open_unique_hid(selector, CMSIS_HID_REPORT_SIZE)?;
            let framer = CmsisDapFramer::new(transport, self.config.cmsis_command_delay_ms);
            let mut sub_protocol = EdbgSubProtocol::new(framer);
            housekeeping::start_session(&mut sub_protocol, clock)?;
            self.connection = Connection::Edbg(Rc::new(RefCell::new(sub_protocol)));
        }

        self.initialised = true;
        Ok(())
    }

    /// Logs/enforces firmware-version policy (WCH only; EDBG tools have no
    /// equivalent gate in §4.8).
    pub fn post_init(&mut self) -> Result<(), DriverError> {
        if let Connection::Wch(driver) = &mut self.connection {
            driver.post_init()?;
        }
        Ok(())
    }

    /// Tears down in strict reverse order of `init()`.
    pub fn close(&mut self, clock: &dyn Clock) -> Result<(), DriverError> {
        self.avr8 = None;
        self.avr_isp = None;
        match std::mem::replace(&mut self.connection, Connection::Uninitialized) {
            Connection::Edbg(sub_protocol) => {
                housekeeping::end_session(&mut sub_protocol.borrow_mut(), false, clock)?;
            }
            Connection::Wch(mut driver) => {
                driver.detach()?;
            }
            Connection::Uninitialized => {}
        }
        self.initialised = false;
        Ok(())
    }

    fn edbg_sub_protocol(&self) -> Result<Rc<RefCell<EdbgSubProtocol>>, DriverError> {
        match &self.connection {
            Connection::Edbg(sub_protocol) => Ok(sub_protocol.clone()),
            _ => Err(DriverError::InvalidConfig(
                "this tool does not speak the EDBG protocol".into(),
            )),
        }
    }

    /// Lazy, idempotent: applies per-tool post-configuration (e.g. Xplained
    /// Pro caps requests at 256 bytes) only on first construction.
    pub fn avr8_debug(&mut self) -> Result<&mut Avr8GenericDriver, DriverError> {
        if self.avr8.is_none() {
            let sub_protocol = self.edbg_sub_protocol()?;
            let mut driver = Avr8GenericDriver::new(sub_protocol, self.config.clone());
            if matches!(self.model, ToolModel::XplainedPro) {
                driver.set_max_bytes_per_request(Some(256));
            }
            self.avr8 = Some(driver);
        }
        Ok(self.avr8.as_mut().expect("just inserted"))
    }

    pub fn avr_isp(
        &mut self,
        parameters: avrisp::IspParameters,
    ) -> Result<&mut avrisp::AvrIspDriver, DriverError> {
        if self.avr_isp.is_none() {
            let sub_protocol = self.edbg_sub_protocol()?;
            self.avr_isp = Some(avrisp::AvrIspDriver::new(sub_protocol, parameters));
        }
        Ok(self.avr_isp.as_mut().expect("just inserted"))
    }

    pub fn riscv_debug(&mut self) -> Result<&mut WchLinkDriver, DriverError> {
        match &mut self.connection {
            Connection::Wch(driver) => Ok(driver),
            _ => Err(DriverError::InvalidConfig(
                "this tool is not a WCH-Link variant".into(),
            )),
        }
    }

    /// Forwards a raw command to the tool without interpreting it (C9
    /// passthrough). Only EDBG tools support this; WCH-Link has no generic
    /// handler-id dispatch to forward through.
    pub fn passthrough(
        &mut self,
        command: dbgtool_types::PassthroughCommand,
        clock: &dyn Clock,
    ) -> Result<dbgtool_types::PassthroughResponse, DriverError> {
        let sub_protocol = self.edbg_sub_protocol()?;
        let response = sub_protocol.borrow_mut().passthrough(command, clock)?;
        Ok(response)
    }

    pub fn has_power_management(&self) -> bool {
        self.model.identity().supports_target_power
    }

    pub fn enable_target_power(&mut self, clock: &dyn Clock) -> Result<(), DriverError> {
        if !self.has_power_management() {
            return Err(DriverError::InvalidConfig(format!(
                "{} has no on-board target power switch",
                self.name()
            )));
        }
        let sub_protocol = self.edbg_sub_protocol()?;
        power::enable_target_power(&mut sub_protocol.borrow_mut(), clock)?;
        Ok(())
    }

    pub fn disable_target_power(&mut self, clock: &dyn Clock) -> Result<(), DriverError> {
        if !self.has_power_management() {
            return Err(DriverError::InvalidConfig(format!(
                "{} has no on-board target power switch",
                self.name()
            )));
        }
        let sub_protocol = self.edbg_sub_protocol()?;
        power::disable_target_power(&mut sub_protocol.borrow_mut(), clock)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn power_management_gated_by_identity() {
        let shell = DebugToolShell::new(ToolModel::AtmelIce, ToolConfig::default());
        assert!(!shell.has_power_management());

        let shell = DebugToolShell::new(ToolModel::XplainedPro, ToolConfig::default());
        assert!(shell.has_power_management());
    }

    #[test]
    fn uninitialised_shell_rejects_capability_access() {
        let mut shell = DebugToolShell::new(ToolModel::AtmelIce, ToolConfig::default());
        assert!(shell.avr8_debug().is_err());
        assert!(shell.riscv_debug().is_err());
    }

    #[test]
    fn wch_shell_rejects_edbg_capabilities() {
        let mut shell = DebugToolShell::new(ToolModel::WchLinkE, ToolConfig::default());
        assert!(shell.avr8_debug().is_err());
    }

    #[test]
    fn uninitialised_shell_rejects_passthrough() {
        let mut shell = DebugToolShell::new(ToolModel::AtmelIce, ToolConfig::default());
        let clock = crate::clock::fake::FakeClock::default();
        let command = dbgtool_types::PassthroughCommand {
            handler_id: crate::edbg::HandlerId::HouseKeeping as u8,
            payload: vec![housekeeping::Commands::Query as u8],
        };
        assert!(shell.passthrough(command, &clock).is_err());
    }
}
