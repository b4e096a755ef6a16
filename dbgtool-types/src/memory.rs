use core::ops::Range;
use serde::{Deserialize, Serialize};

/// Byte address in target address space.
pub type MemoryAddress = u32;

/// Byte count.
pub type MemorySize = u32;

/// Enables the caller to reason about whether two ranges overlap or nest, the
/// same way `probe-rs-target::MemoryRange` does for ARM memory maps.
pub trait MemoryRange {
    /// Returns true if `self` contains `range` fully.
    fn contains_range(&self, range: &Range<MemoryAddress>) -> bool;

    /// Returns true if `self` intersects `range` partially or fully.
    fn intersects_range(&self, range: &Range<MemoryAddress>) -> bool;
}

impl MemoryRange for Range<MemoryAddress> {
    fn contains_range(&self, range: &Range<MemoryAddress>) -> bool {
        if range.end == 0 {
            false
        } else {
            self.contains(&range.start) && self.contains(&(range.end - 1))
        }
    }

    fn intersects_range(&self, range: &Range<MemoryAddress>) -> bool {
        if range.end == 0 {
            false
        } else {
            self.contains(&range.start) && !self.contains(&(range.end - 1))
                || !self.contains(&range.start) && self.contains(&(range.end - 1))
                || self.contains_range(range)
                || range.contains_range(self)
        }
    }
}

/// The abstract memory kinds exposed by the AVR8-Generic driver (§4.4 rule 1).
///
/// Maps onto AVR8-Generic protocol memtype codes, but which code a given variant
/// maps to depends on `(config_variant, programming_mode)` — that mapping lives
/// in `dbgtool::edbg::avr8generic`, not here.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryType {
    Sram,
    Eeprom,
    EepromAtomic,
    EepromPage,
    FlashPage,
    ApplFlash,
    BootFlash,
    ApplFlashAtomic,
    Spm,
    RegisterFile,
    Fuses,
    LockBits,
    Signature,
    Osccal,
}

impl MemoryType {
    /// Whether reads/writes of this type must be aligned to, and sized in
    /// multiples of, a page (flash, EEPROM page).
    pub fn requires_page_alignment(self) -> bool {
        matches!(
            self,
            MemoryType::FlashPage
                | MemoryType::ApplFlash
                | MemoryType::BootFlash
                | MemoryType::ApplFlashAtomic
                | MemoryType::EepromPage
        )
    }

    /// Only SRAM reads support the masked-read command and exclusion ranges.
    pub fn supports_exclusion_ranges(self) -> bool {
        matches!(self, MemoryType::Sram)
    }

    /// Flash-programming memtypes that are only reachable while the NVM
    /// controller is in programming mode (§4.4 testable property 5).
    pub fn requires_programming_mode(self) -> bool {
        matches!(
            self,
            MemoryType::ApplFlash
                | MemoryType::BootFlash
                | MemoryType::ApplFlashAtomic
                | MemoryType::Spm
        )
    }
}

/// A named region of target memory, mirroring the Ram/Nvm/Generic split in
/// `probe-rs-target::MemoryRegion`, generalised over AVR memory spaces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemoryRegion {
    Ram(RamRegion),
    Nvm(NvmRegion),
    Generic(GenericRegion),
}

impl MemoryRegion {
    pub fn range(&self) -> &Range<MemoryAddress> {
        match self {
            MemoryRegion::Ram(r) => &r.range,
            MemoryRegion::Nvm(r) => &r.range,
            MemoryRegion::Generic(r) => &r.range,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RamRegion {
    pub range: Range<MemoryAddress>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NvmRegion {
    pub range: Range<MemoryAddress>,
    pub memory_type: MemoryType,
    pub page_size: Option<MemorySize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GenericRegion {
    pub range: Range<MemoryAddress>,
    pub memory_type: MemoryType,
}
