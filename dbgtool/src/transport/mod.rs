//! USB transport (C1): enumeration, HID and bulk I/O, and the two recovery
//! sequences (WCH IAP bootloader exit, EDBG bootloader-mode commands) that
//! depend only on raw transport primitives.
//!
//! Grounded on `probe-rs`'s `CmsisDapDevice` enum (HID-vs-bulk split) and
//! `probe-rs/src/probe/wlink/usb_interface.rs`/`ti_icdi/usb_interface.rs` for
//! the rusb enumeration and claim pattern.

mod iap;
pub mod fake;

pub use iap::exit_iap_mode;

use std::time::Duration;

use rusb::UsbContext;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no matching USB device found")]
    DeviceNotFound,
    #[error("more than one matching USB device found")]
    AmbiguousDevice,
    #[error("operation timed out")]
    Timeout,
    #[error("error in the USB HID access")]
    HidApi(#[from] hidapi::HidError),
    #[error("error in the USB access")]
    UsbError(#[from] rusb::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// A USB device identity to enumerate by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceSelector {
    pub vendor_id: u16,
    pub product_id: u16,
}

/// The claimed connection to one debug tool. Mirrors `probe-rs`'s
/// `CmsisDapDevice` V1/V2 split: HID devices speak in whole fixed-size reports;
/// bulk devices speak raw endpoint transfers with no report-size constraint.
pub enum UsbTransport {
    Hid {
        handle: hidapi::HidDevice,
        report_size: usize,
    },
    Bulk {
        handle: rusb::DeviceHandle<rusb::Context>,
        out_ep: u8,
        in_ep: u8,
        max_packet_size: usize,
    },
    /// A scripted transport used by scenario tests (§9.1); never constructed
    /// outside test code.
    Fake(fake::FakeTransport),
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsbTransport::Hid { report_size, .. } => f
                .debug_struct("UsbTransport::Hid")
                .field("report_size", report_size)
                .finish(),
            UsbTransport::Bulk {
                out_ep,
                in_ep,
                max_packet_size,
                ..
            } => f
                .debug_struct("UsbTransport::Bulk")
                .field("out_ep", out_ep)
                .field("in_ep", in_ep)
                .field("max_packet_size", max_packet_size)
                .finish(),
            UsbTransport::Fake(_) => f.debug_struct("UsbTransport::Fake").finish(),
        }
    }
}

impl UsbTransport {
    /// The size of one report (HID) or the max single-transfer size (bulk).
    pub fn unit_size(&self) -> usize {
        match self {
            UsbTransport::Hid { report_size, .. } => *report_size,
            UsbTransport::Bulk {
                max_packet_size, ..
            } => *max_packet_size,
            UsbTransport::Fake(transport) => transport.unit_size(),
        }
    }

    /// Write exactly one HID report, or one or more bulk transfers (the final
    /// short fragment implicitly terminates the transfer, per §4.1).
    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        match self {
            UsbTransport::Hid {
                handle,
                report_size,
            } => {
                let mut report = vec![0u8; *report_size + 1];
                let n = buf.len().min(*report_size);
                report[1..1 + n].copy_from_slice(&buf[..n]);
                Ok(handle.write(&report)?)
            }
            UsbTransport::Bulk {
                handle,
                out_ep,
                max_packet_size,
                ..
            } => {
                let timeout = Duration::from_millis(1000);
                let mut total = 0;
                for chunk in buf.chunks(*max_packet_size) {
                    total += handle.write_bulk(*out_ep, chunk, timeout)?;
                }
                Ok(total)
            }
            UsbTransport::Fake(transport) => transport.write(buf),
        }
    }

    /// Read at most one report (HID) or one bulk transfer.
    pub fn read(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        match self {
            UsbTransport::Hid { handle, .. } => Ok(handle
                .read_timeout(buf, timeout.as_millis() as i32)
                .map_err(TransportError::HidApi)?),
            UsbTransport::Bulk {
                handle, in_ep, ..
            } => match handle.read_bulk(*in_ep, buf, timeout) {
                Ok(n) => Ok(n),
                Err(rusb::Error::Timeout) => Err(TransportError::Timeout),
                Err(e) => Err(e.into()),
            },
            UsbTransport::Fake(transport) => transport.read(buf),
        }
    }

    /// Wraps a [`fake::FakeTransport`] handle for scenario tests. Clone the
    /// handle first if the test needs to keep driving its script afterwards.
    pub fn fake(transport: fake::FakeTransport) -> Self {
        UsbTransport::Fake(transport)
    }

    /// Discard any pending, unread data. Used when re-synchronizing after a
    /// protocol error.
    pub fn drain(&self) {
        match self {
            UsbTransport::Hid { report_size, .. } => {
                let mut discard = vec![0u8; report_size + 1];
                while matches!(self.read(&mut discard, Duration::from_millis(1)), Ok(n) if n != 0)
                {
                }
            }
            UsbTransport::Bulk {
                max_packet_size, ..
            } => {
                let mut discard = vec![0u8; *max_packet_size];
                while matches!(self.read(&mut discard, Duration::from_millis(1)), Ok(n) if n != 0)
                {
                }
            }
            UsbTransport::Fake(_) => {}
        }
    }
}

/// Enumerate HID devices matching `selector`; returns `DeviceNotFound` or
/// `AmbiguousDevice` rather than an empty/multi-element Vec, per §7's kinds 1-2.
pub fn open_unique_hid(
    selector: DeviceSelector,
    report_size: usize,
) -> Result<UsbTransport> {
    let api = hidapi::HidApi::new()?;
    let mut matches: Vec<_> = api
        .device_list()
        .filter(|info| {
            info.vendor_id() == selector.vendor_id && info.product_id() == selector.product_id
        })
        .collect();

    match matches.len() {
        0 => Err(TransportError::DeviceNotFound),
        1 => {
            let info = matches.remove(0);
            let handle = info.open_device(&api)?;
            Ok(UsbTransport::Hid {
                handle,
                report_size,
            })
        }
        _ => Err(TransportError::AmbiguousDevice),
    }
}

/// Enumerate and claim a bulk device matching `selector`. `detach_kernel_driver`
/// is idempotent: a failure to detach (e.g. already detached, or unsupported on
/// this platform) is swallowed, matching the "attempted once, idempotent"
/// requirement; only the final `claim_interface` failure is fatal.
pub fn open_unique_bulk(
    selector: DeviceSelector,
    interface_number: u8,
    out_ep: u8,
    in_ep: u8,
    max_packet_size: usize,
) -> Result<UsbTransport> {
    let context = rusb::Context::new()?;
    let devices = context.devices()?;

    let mut matches: Vec<_> = devices
        .iter()
        .filter(|device| {
            device
                .device_descriptor()
                .map(|descriptor| {
                    descriptor.vendor_id() == selector.vendor_id
                        && descriptor.product_id() == selector.product_id
                })
                .unwrap_or(false)
        })
        .collect();

    match matches.len() {
        0 => Err(TransportError::DeviceNotFound),
        1 => {
            let device = matches.remove(0);
            let mut handle = device.open()?;
            let _ = handle.set_auto_detach_kernel_driver(true);
            handle.claim_interface(interface_number)?;
            Ok(UsbTransport::Bulk {
                handle,
                out_ep,
                in_ep,
                max_packet_size,
            })
        }
        _ => Err(TransportError::AmbiguousDevice),
    }
}

/// True iff exactly one device matching `selector` is present. Used to decide
/// whether to attempt the IAP-exit recovery path before giving up.
pub fn bulk_device_present(selector: DeviceSelector) -> bool {
    rusb::Context::new()
        .and_then(|ctx| ctx.devices())
        .map(|devices| {
            devices.iter().any(|device| {
                device
                    .device_descriptor()
                    .map(|descriptor| {
                        descriptor.vendor_id() == selector.vendor_id
                            && descriptor.product_id() == selector.product_id
                    })
                    .unwrap_or(false)
            })
        })
        .unwrap_or(false)
}
