//! The top-level error sink. Every component defines its own `thiserror` enum
//! naming only the failure kinds it can locally produce; each of those converts
//! into a [`DriverError`] variant, the way `probe-rs`'s `DebugProbeError` sinks
//! `CmsisDapError`/`WchLinkError`/`EdbgError`.

use crate::cmsisdap::CmsisDapError;
use crate::edbg::EdbgError;
use crate::transport::TransportError;
use crate::wlink::WchLinkError;

/// The nine error kinds of the debug-tool driver subsystem.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("no matching USB device found")]
    DeviceNotFound,

    #[error("more than one matching USB device found; disconnect the extras")]
    AmbiguousDevice,

    #[error("failed to open or configure the USB device")]
    DeviceInitializationFailure(#[source] anyhow::Error),

    #[error("communication with the debug tool failed")]
    DeviceCommunicationFailure(#[source] anyhow::Error),

    #[error("the debug tool reported a protocol-level error")]
    ProtocolError(#[source] anyhow::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("debugWIRE physical interface activation failed (DWEN fuse may be unset)")]
    DebugWirePhysicalInterfaceError,

    #[error("no free hardware breakpoint slots")]
    OutOfHardwareBreakpoints,

    #[error("operation timed out")]
    Timeout,
}

impl From<TransportError> for DriverError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::DeviceNotFound => DriverError::DeviceNotFound,
            TransportError::AmbiguousDevice => DriverError::AmbiguousDevice,
            TransportError::Timeout => DriverError::Timeout,
            other => DriverError::DeviceInitializationFailure(other.into()),
        }
    }
}

impl From<CmsisDapError> for DriverError {
    fn from(error: CmsisDapError) -> Self {
        DriverError::DeviceCommunicationFailure(error.into())
    }
}

impl From<EdbgError> for DriverError {
    fn from(error: EdbgError) -> Self {
        match error {
            EdbgError::DebugWirePhysicalInterface => DriverError::DebugWirePhysicalInterfaceError,
            EdbgError::OutOfHardwareBreakpoints => DriverError::OutOfHardwareBreakpoints,
            EdbgError::Failed(_) => DriverError::ProtocolError(error.into()),
            other => DriverError::DeviceCommunicationFailure(other.into()),
        }
    }
}

impl From<WchLinkError> for DriverError {
    fn from(error: WchLinkError) -> Self {
        match error {
            WchLinkError::Protocol(..) => DriverError::ProtocolError(error.into()),
            WchLinkError::Timeout => DriverError::Timeout,
            other => DriverError::DeviceCommunicationFailure(other.into()),
        }
    }
}
