use serde::{Deserialize, Serialize};

/// Static per-model USB identity record (§6). One of these exists per
/// supported EDBG tool model; the debug tool shell (C8) is constructed from
/// one of these rather than from a dedicated subclass per model.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolIdentity {
    pub name: &'static str,
    pub vendor_id: u16,
    pub product_id: u16,
    pub cmsis_hid_interface_number: u8,
    pub supports_target_power: bool,
    pub usb_configuration_index: Option<u8>,
}

/// The IAP-mode (vid, pid) pair a WCH-Link variant re-enumerates as while its
/// firmware is being recovered/updated.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WchIapIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}
