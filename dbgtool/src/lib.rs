//! Driver stack for Microchip EDBG-family debug tools (Atmel-ICE, Power Debugger,
//! MPLAB Snap/PICkit-4, JTAGICE3, Xplained Pro/Mini/Nano, Curiosity Nano) and
//! WCH WCH-Link RISC-V probes.
//!
//! The stack is layered bottom-up: USB transport ([`transport`]), CMSIS-DAP
//! request/response framing ([`cmsisdap`]), the EDBG sub-protocol and AVR8/AVR-ISP
//! drivers ([`edbg`]), the WCH-Link DTM ([`wlink`]), and finally the capability
//! dispatcher that callers actually construct ([`shell`]).

pub mod clock;
pub mod cmsisdap;
pub mod config;
pub mod edbg;
pub mod error;
pub mod shell;
pub mod transport;
pub mod wlink;

pub use crate::error::DriverError;
pub use crate::shell::DebugToolShell;
