//! The configuration surface consumed from the external collaborator (§6).
//!
//! Project/YAML configuration loading is out of scope; this module only turns
//! an already-parsed value bag into a typed, validated [`ToolConfig`]. Grounded
//! on the teacher's CLI config layer, which likewise treats the parsed value as
//! the boundary and never owns the file format itself.

use serde::Deserialize;

use crate::error::DriverError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PhysicalInterface {
    Isp,
    Jtag,
    DebugWire,
    Pdi,
    Updi,
    Sdi,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiscvDebugTranslatorConfig {
    pub target_response_timeout_us: u64,
}

impl Default for RiscvDebugTranslatorConfig {
    fn default() -> Self {
        Self {
            target_response_timeout_us: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    pub cmsis_command_delay_ms: u32,
    pub exit_iap_mode: bool,
    pub riscv_debug_translator: RiscvDebugTranslatorConfig,

    pub physical_interface: Option<PhysicalInterface>,
    pub disable_debug_wire_on_deactivate: bool,
    pub manage_dwen_fuse_bit: bool,
    pub cycle_target_power_post_dwen_update: bool,
    pub target_power_cycle_delay_ms: u32,
    pub manage_ocden_fuse_bit: bool,
    pub preserve_eeprom: bool,
    pub signature_validation: bool,
    pub stop_all_timers: bool,
    pub avoid_masked_read: bool,
    pub max_bytes_per_request: Option<u32>,
    pub reactivate_jtag_post_programming_mode: bool,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            cmsis_command_delay_ms: 0,
            exit_iap_mode: true,
            riscv_debug_translator: RiscvDebugTranslatorConfig::default(),
            physical_interface: None,
            disable_debug_wire_on_deactivate: false,
            manage_dwen_fuse_bit: false,
            cycle_target_power_post_dwen_update: true,
            target_power_cycle_delay_ms: 250,
            manage_ocden_fuse_bit: false,
            preserve_eeprom: true,
            signature_validation: true,
            stop_all_timers: true,
            avoid_masked_read: true,
            max_bytes_per_request: None,
            reactivate_jtag_post_programming_mode: false,
        }
    }
}

impl ToolConfig {
    /// Build a config from an already-parsed value bag, validating the ranges
    /// the spec calls out explicitly.
    pub fn from_value(value: serde_json::Value) -> Result<Self, DriverError> {
        let config: ToolConfig = serde_json::from_value(value)
            .map_err(|e| DriverError::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), DriverError> {
        if self.cmsis_command_delay_ms > 200 {
            return Err(DriverError::InvalidConfig(format!(
                "cmsis_command_delay_ms must be in 0..=200, got {}",
                self.cmsis_command_delay_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let config = ToolConfig::default();
        assert_eq!(config.cmsis_command_delay_ms, 0);
        assert!(config.exit_iap_mode);
        assert!(config.preserve_eeprom);
        assert!(config.avoid_masked_read);
        assert!(config.cycle_target_power_post_dwen_update);
        assert_eq!(config.target_power_cycle_delay_ms, 250);
    }

    #[test]
    fn rejects_out_of_range_command_delay() {
        let value = serde_json::json!({ "cmsis_command_delay_ms": 500 });
        let err = ToolConfig::from_value(value).unwrap_err();
        assert!(matches!(err, DriverError::InvalidConfig(_)));
    }

    #[test]
    fn accepts_partial_value_bag() {
        let value = serde_json::json!({ "physical_interface": "JTAG" });
        let config = ToolConfig::from_value(value).unwrap();
        assert_eq!(config.physical_interface, Some(PhysicalInterface::Jtag));
        assert_eq!(config.cmsis_command_delay_ms, 0);
    }
}
