//! Shared data types for the `dbgtool` EDBG / WCH-Link debug-probe driver stack.
//!
//! This crate carries no USB or HID bindings; it is the plain-data counterpart
//! consumed both by the driver crate and by anything upstream that wants to talk
//! about memory ranges, registers or tool identities without linking USB code.

mod identity;
mod memory;
mod passthrough;
mod pin;
mod register;

pub use identity::{ToolIdentity, WchIapIdentity};
pub use memory::{MemoryAddress, MemoryRange, MemoryRegion, MemoryType, MemorySize};
pub use passthrough::{PassthroughCommand, PassthroughResponse};
pub use pin::{PadState, PinState};
pub use register::{BreakpointKind, RegisterDescriptor, RegisterLocation};
