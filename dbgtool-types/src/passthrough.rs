use serde::{Deserialize, Serialize};

/// An opaque raw EDBG or WCH-Link command, forwarded through C3/C7 framing
/// without the driver understanding its semantics. Used by diagnostic tooling
/// that needs to issue a command this crate doesn't otherwise model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughCommand {
    pub handler_id: u8,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassthroughResponse {
    pub payload: Vec<u8>,
}
