//! DAP_SWJ_Clock and DAP_SWJ_Sequence.

use scroll::{Pwrite, LE};

use super::{CommandId, Request, SendError, Status};

#[derive(Clone, Copy, Debug)]
pub struct SwjClockRequest {
    pub clock_speed_hz: u32,
}

#[derive(Clone, Copy, Debug)]
pub struct SwjClockResponse(pub Status);

impl Request for SwjClockRequest {
    const COMMAND_ID: CommandId = CommandId::SwjClock;

    type Response = SwjClockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer
            .pwrite_with(self.clock_speed_hz, 0, LE)
            .map_err(|_| SendError::NotEnoughData)?;
        Ok(4)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        Ok(SwjClockResponse(Status::from_byte(buffer[0])?))
    }
}

/// Clocks up to 64 bits out on SWDIO/TMS, LSB first.
#[derive(Clone, Copy, Debug)]
pub struct SwjSequenceRequest {
    bit_count: u8,
    bits: u64,
}

#[derive(Clone, Copy, Debug)]
pub struct SwjSequenceResponse(pub Status);

impl SwjSequenceRequest {
    pub fn new(bit_count: u8, bits: u64) -> Self {
        debug_assert!(bit_count as usize <= 64);
        Self { bit_count, bits }
    }
}

impl Request for SwjSequenceRequest {
    const COMMAND_ID: CommandId = CommandId::SwjSequence;

    type Response = SwjSequenceResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        // Sequence count of 0 means 256 bits; we never need that many.
        buffer[0] = self.bit_count;
        let byte_count = (self.bit_count as usize).div_ceil(8);
        let bytes = self.bits.to_le_bytes();
        buffer[1..1 + byte_count].copy_from_slice(&bytes[..byte_count]);
        Ok(1 + byte_count)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        Ok(SwjSequenceResponse(Status::from_byte(buffer[0])?))
    }
}
