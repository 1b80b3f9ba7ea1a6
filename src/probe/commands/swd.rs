//! DAP_SWD_Configure.

use super::{CommandId, Request, SendError, Status};

/// Default configuration: one turnaround cycle, no data phase on WAIT/FAULT.
#[derive(Clone, Copy, Debug, Default)]
pub struct ConfigureRequest;

#[derive(Clone, Copy, Debug)]
pub struct ConfigureResponse(pub Status);

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::SwdConfigure;

    type Response = ConfigureResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = 0x00;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        Ok(ConfigureResponse(Status::from_byte(buffer[0])?))
    }
}
