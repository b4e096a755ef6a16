//! Per-model static identity records (§6 "USB identities").

use dbgtool_types::{ToolIdentity, WchIapIdentity};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolModel {
    AtmelIce,
    PowerDebugger,
    Jtagice3,
    MplabSnap,
    MplabPickit4,
    XplainedPro,
    XplainedMini,
    XplainedNano,
    CuriosityNano,
    WchLinkE,
}

impl ToolModel {
    pub const fn identity(self) -> ToolIdentity {
        match self {
            ToolModel::AtmelIce => ToolIdentity {
                name: "Atmel-ICE",
                vendor_id: 0x03eb,
                product_id: 0x2141,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: Some(0),
            },
            ToolModel::PowerDebugger => ToolIdentity {
                name: "Power Debugger",
                vendor_id: 0x03eb,
                product_id: 0x2144,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: None,
            },
            ToolModel::Jtagice3 => ToolIdentity {
                name: "JTAGICE3",
                vendor_id: 0x03eb,
                product_id: 0x2140,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: Some(0),
            },
            ToolModel::MplabSnap => ToolIdentity {
                name: "MPLAB Snap (AVR mode)",
                vendor_id: 0x03eb,
                product_id: 0x2180,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: None,
            },
            ToolModel::MplabPickit4 => ToolIdentity {
                name: "MPLAB PICkit4 (AVR mode)",
                vendor_id: 0x03eb,
                product_id: 0x2177,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: None,
            },
            ToolModel::XplainedPro => ToolIdentity {
                name: "Xplained Pro",
                vendor_id: 0x03eb,
                product_id: 0x2111,
                cmsis_hid_interface_number: 0,
                supports_target_power: true,
                usb_configuration_index: None,
            },
            ToolModel::XplainedMini => ToolIdentity {
                name: "Xplained Mini",
                vendor_id: 0x03eb,
                product_id: 0x2145,
                cmsis_hid_interface_number: 0,
                supports_target_power: true,
                usb_configuration_index: None,
            },
            ToolModel::XplainedNano => ToolIdentity {
                name: "Xplained Nano",
                vendor_id: 0x03eb,
                product_id: 0x2145,
                cmsis_hid_interface_number: 0,
                supports_target_power: true,
                usb_configuration_index: None,
            },
            ToolModel::CuriosityNano => ToolIdentity {
                name: "Curiosity Nano",
                vendor_id: 0x03eb,
                product_id: 0x2175,
                cmsis_hid_interface_number: 0,
                supports_target_power: true,
                usb_configuration_index: None,
            },
            ToolModel::WchLinkE => ToolIdentity {
                name: "WCH-LinkE",
                vendor_id: 0x1a86,
                product_id: 0x8010,
                cmsis_hid_interface_number: 0,
                supports_target_power: false,
                usb_configuration_index: None,
            },
        }
    }

    pub const fn is_wch(self) -> bool {
        matches!(self, ToolModel::WchLinkE)
    }

    /// The WCH IAP (vid, pid) pair used for bootloader-exit recovery; only
    /// meaningful for [`ToolModel::WchLinkE`].
    pub const fn iap_identity(self) -> Option<WchIapIdentity> {
        match self {
            ToolModel::WchLinkE => Some(WchIapIdentity {
                vendor_id: 0x1a86,
                product_id: 0x8011,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xplained_pro_supports_target_power() {
        assert!(ToolModel::XplainedPro.identity().supports_target_power);
        assert!(!ToolModel::AtmelIce.identity().supports_target_power);
    }

    #[test]
    fn wch_link_e_carries_an_iap_identity() {
        assert!(ToolModel::WchLinkE.iap_identity().is_some());
        assert!(ToolModel::AtmelIce.iap_identity().is_none());
    }

    #[test]
    fn xplained_mini_and_nano_share_a_product_id() {
        assert_eq!(
            ToolModel::XplainedMini.identity().product_id,
            ToolModel::XplainedNano.identity().product_id
        );
    }
}
