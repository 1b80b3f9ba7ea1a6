//! CMSIS-DAP command framing.
//!
//! Every request is serialized into a single packet, sent to the probe, and
//! answered by a single response packet starting with the echoed command id.
//! The probe processes at most one outstanding request; serialization is
//! guaranteed by the exclusive ownership of [`CmsisDapDevice`].

pub mod general;
pub mod swd;
pub mod swj;
pub mod transfer;

use std::time::Duration;

use crate::probe::CmsisDapDevice;

/// Errors at the USB packet layer.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("error in the USB HID access")]
    HidApi(#[from] hidapi::HidError),
    #[error("error in the USB access")]
    Usb(rusb::Error),
    #[error("probe did not reply within the deadline")]
    Timeout,
    #[error("not enough data in response from probe")]
    NotEnoughData,
    #[error("status can only be 0x00 or 0xFF, got {0:#04x}")]
    InvalidStatus(u8),
    #[error("connecting to target failed, received: {0:#04x}")]
    ConnectResponse(u8),
    #[error("response began with {0:#04x} instead of the echoed command id")]
    WrongCommandEcho(u8),
    #[error("unexpected answer to command")]
    UnexpectedAnswer,
}

impl From<rusb::Error> for SendError {
    fn from(error: rusb::Error) -> Self {
        match error {
            rusb::Error::Timeout => SendError::Timeout,
            other => SendError::Usb(other),
        }
    }
}

/// All CMSIS-DAP command ids this crate speaks.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandId {
    Info = 0x00,
    Connect = 0x02,
    Disconnect = 0x03,
    TransferConfigure = 0x04,
    Transfer = 0x05,
    TransferBlock = 0x06,
    ResetTarget = 0x0A,
    SwjPins = 0x10,
    SwjClock = 0x11,
    SwjSequence = 0x12,
    SwdConfigure = 0x13,
}

/// DAP_OK / DAP_ERROR status byte carried by most responses.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Status {
    DapOk = 0x00,
    DapError = 0xFF,
}

impl Status {
    pub fn from_byte(value: u8) -> Result<Self, SendError> {
        match value {
            0x00 => Ok(Status::DapOk),
            0xFF => Ok(Status::DapError),
            other => Err(SendError::InvalidStatus(other)),
        }
    }
}

/// A CMSIS-DAP request with its strongly typed response.
pub trait Request {
    const COMMAND_ID: CommandId;

    type Response;

    /// Serialize the request payload into `buffer`, returning the number of
    /// bytes written. The command id itself is framed by [`send_command`].
    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError>;

    /// Parse the response payload (everything after the echoed command id).
    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError>;
}

/// Send one request and read back its response.
///
/// The buffer is sized to the probe's negotiated packet size. Byte 0 is left
/// as the HID report id; v2 devices skip it on the wire. `timeout` bounds the
/// wait for the response packet.
pub fn send_command<R: Request>(
    device: &mut CmsisDapDevice,
    request: &R,
    timeout: Duration,
) -> Result<R::Response, SendError> {
    let buffer_len = device.packet_size() + 1;
    let mut buffer = vec![0; buffer_len];

    buffer[1] = R::COMMAND_ID as u8;
    let mut size = request.to_bytes(&mut buffer[2..])? + 2;

    // HID devices must always write a full report.
    if device.is_hid() {
        size = buffer_len;
    }

    device.write(&buffer[..size])?;
    trace_buffer("transmit buffer", &buffer[..size]);

    let bytes_read = device.read(&mut buffer, timeout)?;
    let response = &buffer[..bytes_read];
    trace_buffer("receive buffer", response);

    if response.is_empty() {
        return Err(SendError::NotEnoughData);
    }

    if response[0] != R::COMMAND_ID as u8 {
        return Err(SendError::WrongCommandEcho(response[0]));
    }

    request.parse_response(&response[1..])
}

/// Trace log a buffer, trimming the run of trailing zeros the USB APIs
/// require but which make the output unreadable.
fn trace_buffer(name: &str, buf: &[u8]) {
    if tracing::enabled!(tracing::Level::TRACE) {
        let len = buf.len();
        let cut = len + 1 - buf.iter().rev().position(|&x| x != 0).unwrap_or(len);
        let end = len.min(cut.max(1));
        tracing::trace!("{}: {:02X?}...", name, &buf[..end]);
    }
}
