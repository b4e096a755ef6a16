use serde::{Deserialize, Serialize};

/// Logic-level readback of a target pad/pin.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PinState {
    Low,
    High,
    Floating,
    Unknown,
}

/// A pad index paired with its last-observed state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PadState {
    pub pad_index: u8,
    pub state: PinState,
}
