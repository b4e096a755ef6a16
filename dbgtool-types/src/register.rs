use serde::{Deserialize, Serialize};

use crate::memory::MemoryAddress;

/// Where a register lives: a fixed SRAM/IO address, or an index into the
/// XMEGA/UPDI register file (accessed via the REGISTER_FILE memtype rather
/// than SRAM).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegisterLocation {
    Address(MemoryAddress),
    RegisterFileIndex(u8),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RegisterDescriptor {
    pub name: String,
    pub location: RegisterLocation,
    /// Width in bytes.
    pub size: u8,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakpointKind {
    Hardware,
    Software,
}
