//! Vendor flash-programming path (§4.7): the RISC-V abstract-command flash
//! write is known not to work on these targets, so WCH-Link exposes a
//! separate code-stub-plus-data-stream sequence over the data endpoint.
//!
//! Grounded on `probe-rs/src/probe/wlink/usb_interface.rs`'s declared-length
//! bulk write/read validation pattern, generalised from the single fixed
//! endpoint pair that file uses to the explicit data endpoint this driver
//! targets.

use super::WchLinkError;
use crate::transport::UsbTransport;

/// Family-specific opcodes for the program-counter-agnostic code stub
/// uploaded before a full-block write (§4.7).
#[derive(Debug, Clone)]
pub struct FlashStubOpcodes(pub Vec<u8>);

fn write_chunk(transport: &mut UsbTransport, chunk: &[u8]) -> Result<(), WchLinkError> {
    transport.write(chunk)?;
    let mut ack = [0u8; 64];
    let read = transport.read(&mut ack, std::time::Duration::from_millis(2000))?;
    if read == 0 || ack[0] != 0x82 {
        return Err(WchLinkError::Protocol(ack.first().copied().unwrap_or(0), vec![]));
    }
    Ok(())
}

/// Uploads the code stub, then streams `block_size`-aligned data. Only valid
/// when `buffer.len() >= block_size` and `start` is block-aligned (§4.7).
pub fn write_flash_full_block(
    data_transport: &mut UsbTransport,
    start: u32,
    buffer: &[u8],
    block_size: usize,
    opcodes: &FlashStubOpcodes,
) -> Result<(), WchLinkError> {
    if block_size == 0 || buffer.len() < block_size || start as usize % block_size != 0 {
        return Err(WchLinkError::InvalidPayload);
    }

    write_chunk(data_transport, &opcodes.0)?;

    for chunk in buffer.chunks(block_size) {
        if chunk.len() < block_size {
            break;
        }
        write_chunk(data_transport, chunk)?;
    }
    Ok(())
}

/// Up to 64 bytes; used for the tail that doesn't fill a full block (§4.7).
pub fn write_flash_partial_block(
    data_transport: &mut UsbTransport,
    buffer: &[u8],
) -> Result<(), WchLinkError> {
    if buffer.len() > 64 {
        return Err(WchLinkError::InvalidPayload);
    }
    write_chunk(data_transport, buffer)
}
