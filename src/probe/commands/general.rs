//! DAP_Info, DAP_Connect, DAP_Disconnect and DAP_ResetTarget.

use super::{CommandId, Request, SendError, Status};

/// DAP_Info id for the maximum packet size.
const DAP_INFO_PACKET_SIZE: u8 = 0xFF;

/// Asks the probe for its maximum packet size.
#[derive(Clone, Copy, Debug)]
pub struct PacketSizeCommand;

impl Request for PacketSizeCommand {
    const COMMAND_ID: CommandId = CommandId::Info;

    type Response = u16;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = DAP_INFO_PACKET_SIZE;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        // One length byte (always 2 for this id) followed by a LE u16.
        if buffer.len() < 3 || buffer[0] != 2 {
            return Err(SendError::UnexpectedAnswer);
        }
        Ok(u16::from_le_bytes([buffer[1], buffer[2]]))
    }
}

#[derive(Clone, Copy, Debug)]
pub enum ConnectRequest {
    DefaultPort = 0x00,
    Swd = 0x01,
    Jtag = 0x02,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectResponse {
    InitFailed = 0x00,
    SuccessfulInitForSwd = 0x01,
    SuccessfulInitForJtag = 0x02,
}

impl Request for ConnectRequest {
    const COMMAND_ID: CommandId = CommandId::Connect;

    type Response = ConnectResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = *self as u8;
        Ok(1)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        match buffer[0] {
            0 => Ok(ConnectResponse::InitFailed),
            1 => Ok(ConnectResponse::SuccessfulInitForSwd),
            2 => Ok(ConnectResponse::SuccessfulInitForJtag),
            other => Err(SendError::ConnectResponse(other)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct DisconnectRequest;

#[derive(Clone, Copy, Debug)]
pub struct DisconnectResponse(pub Status);

impl Request for DisconnectRequest {
    const COMMAND_ID: CommandId = CommandId::Disconnect;

    type Response = DisconnectResponse;

    fn to_bytes(&self, _buffer: &mut [u8]) -> Result<usize, SendError> {
        Ok(0)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        Ok(DisconnectResponse(Status::from_byte(buffer[0])?))
    }
}

/// Requests a device-specific reset sequence from the probe, if it has one.
#[derive(Clone, Copy, Debug)]
pub struct ResetRequest;

#[derive(Clone, Copy, Debug)]
pub struct ResetResponse {
    pub status: Status,
    /// Whether the probe actually implements a reset sequence.
    pub executed: bool,
}

impl Request for ResetRequest {
    const COMMAND_ID: CommandId = CommandId::ResetTarget;

    type Response = ResetResponse;

    fn to_bytes(&self, _buffer: &mut [u8]) -> Result<usize, SendError> {
        Ok(0)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.len() < 2 {
            return Err(SendError::NotEnoughData);
        }
        Ok(ResetResponse {
            status: Status::from_byte(buffer[0])?,
            executed: buffer[1] == 1,
        })
    }
}
