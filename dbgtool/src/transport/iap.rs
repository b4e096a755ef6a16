//! WCH IAP bootloader-exit sequence (§4.1): when only the IAP (vid, pid) pair
//! is present, write the exit command and poll for the normal pair to
//! reappear.

use std::time::Duration;

use crate::clock::Clock;

use super::{bulk_device_present, open_unique_bulk, DeviceSelector, Result, TransportError};

const IAP_INTERFACE_NUMBER: u8 = 0;
const IAP_COMMAND_ENDPOINT: u8 = 0x02;
const IAP_EXIT_COMMAND: u8 = 0x83;

/// Issue the IAP-exit command to `iap_selector`'s device, then poll
/// `normal_selector` at 100ms intervals until it reappears or `timeout`
/// elapses.
pub fn exit_iap_mode(
    iap_selector: DeviceSelector,
    normal_selector: DeviceSelector,
    timeout: Duration,
    clock: &dyn Clock,
) -> Result<()> {
    let transport = open_unique_bulk(
        iap_selector,
        IAP_INTERFACE_NUMBER,
        IAP_COMMAND_ENDPOINT,
        IAP_COMMAND_ENDPOINT | 0x80,
        64,
    )?;
    transport.write(&[IAP_EXIT_COMMAND])?;
    drop(transport);

    let deadline = clock.now() + timeout;
    let poll_interval = Duration::from_millis(100);
    while clock.now() < deadline {
        if bulk_device_present(normal_selector) {
            return Ok(());
        }
        clock.sleep(poll_interval);
    }

    Err(TransportError::Timeout)
}
