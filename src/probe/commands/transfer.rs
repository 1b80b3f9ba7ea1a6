//! DAP_Transfer, DAP_TransferBlock and DAP_TransferConfigure.

use scroll::{Pread, Pwrite, LE};

use super::{CommandId, Request, SendError, Status};

/// Whether a transfer addresses the debug port or the selected access port.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortType {
    DebugPort = 0,
    AccessPort = 1,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Rw {
    Write = 0,
    Read = 1,
}

/// Target acknowledge of the last executed transfer.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Ack {
    Ok = 1,
    Wait = 2,
    Fault = 4,
    NoAck = 7,
}

impl Ack {
    fn from_byte(byte: u8) -> Self {
        match byte & 0x7 {
            1 => Ack::Ok,
            2 => Ack::Wait,
            4 => Ack::Fault,
            _ => Ack::NoAck,
        }
    }
}

/// One register access inside a DAP_Transfer packet.
#[derive(Clone, Copy, Debug)]
pub struct InnerTransferRequest {
    pub port: PortType,
    pub rw: Rw,
    /// Register address; only bits 2 and 3 go on the wire, the bank bits are
    /// routed through DP SELECT by the session.
    pub address: u8,
    /// Data word for writes.
    pub data: Option<u32>,
}

impl InnerTransferRequest {
    pub fn read(port: PortType, address: u8) -> Self {
        Self { port, rw: Rw::Read, address, data: None }
    }

    pub fn write(port: PortType, address: u8, data: u32) -> Self {
        Self { port, rw: Rw::Write, address, data: Some(data) }
    }

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = (self.port as u8)
            | (self.rw as u8) << 1
            | ((self.address >> 2) & 0x01) << 2
            | ((self.address >> 3) & 0x01) << 3;
        if let Some(data) = self.data {
            buffer[1..5].copy_from_slice(&data.to_le_bytes());
            Ok(5)
        } else {
            Ok(1)
        }
    }
}

/// Read/write a short run of DP/AP registers in one packet.
#[derive(Clone, Debug)]
pub struct TransferRequest {
    pub transfers: Vec<InnerTransferRequest>,
}

impl TransferRequest {
    pub fn new(transfers: &[InnerTransferRequest]) -> Self {
        Self { transfers: transfers.into() }
    }
}

#[derive(Debug)]
pub struct TransferResponse {
    /// How many transfers the probe executed.
    pub count: u8,
    /// Acknowledge of the last executed transfer.
    pub ack: Ack,
    pub protocol_error: bool,
    /// Read data, in request order. Writes contribute no entries.
    pub data: Vec<u32>,
}

impl Request for TransferRequest {
    const COMMAND_ID: CommandId = CommandId::Transfer;

    type Response = TransferResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = 0; // DAP index, SWD ignores it
        buffer[1] = self.transfers.len() as u8;
        let mut size = 2;
        for transfer in &self.transfers {
            size += transfer.to_bytes(&mut buffer[size..])?;
        }
        Ok(size)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.len() < 2 {
            return Err(SendError::NotEnoughData);
        }
        let count = buffer[0];
        if count as usize > self.transfers.len() {
            return Err(SendError::UnexpectedAnswer);
        }
        let ack = Ack::from_byte(buffer[1]);
        let protocol_error = buffer[1] & 0x08 != 0;

        // Response data exists only for reads that were actually executed.
        // The last transfer carries no data unless it was acknowledged OK.
        let executed = &self.transfers[..count as usize];
        let mut expected = executed.iter().filter(|t| t.rw == Rw::Read).count();
        if ack != Ack::Ok {
            if let Some(last) = executed.last() {
                expected -= (last.rw == Rw::Read) as usize;
            }
        }

        let mut data = Vec::with_capacity(expected);
        let mut offset = 2;
        for _ in 0..expected {
            if buffer.len() < offset + 4 {
                return Err(SendError::NotEnoughData);
            }
            data.push(buffer.pread_with(offset, LE).unwrap());
            offset += 4;
        }

        Ok(TransferResponse { count, ack, protocol_error, data })
    }
}

/// Stream many words to/from a single DP/AP register (DRW, in practice).
#[derive(Clone, Debug)]
pub struct TransferBlockRequest {
    transfer_count: u16,
    port: PortType,
    rw: Rw,
    address: u8,
    data: Vec<u32>,
}

impl TransferBlockRequest {
    pub fn write_request(port: PortType, address: u8, data: Vec<u32>) -> Self {
        Self {
            transfer_count: data.len() as u16,
            port,
            rw: Rw::Write,
            address,
            data,
        }
    }

    pub fn read_request(port: PortType, address: u8, count: u16) -> Self {
        Self {
            transfer_count: count,
            port,
            rw: Rw::Read,
            address,
            data: Vec::new(),
        }
    }
}

#[derive(Debug)]
pub struct TransferBlockResponse {
    pub count: u16,
    pub ack: Ack,
    pub data: Vec<u32>,
}

impl Request for TransferBlockRequest {
    const COMMAND_ID: CommandId = CommandId::TransferBlock;

    type Response = TransferBlockResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = 0; // DAP index
        buffer
            .pwrite_with(self.transfer_count, 1, LE)
            .map_err(|_| SendError::NotEnoughData)?;
        buffer[3] = (self.port as u8)
            | (self.rw as u8) << 1
            | ((self.address >> 2) & 0x01) << 2
            | ((self.address >> 3) & 0x01) << 3;
        let mut size = 4;
        for word in &self.data {
            buffer
                .pwrite_with(*word, size, LE)
                .map_err(|_| SendError::NotEnoughData)?;
            size += 4;
        }
        Ok(size)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.len() < 3 {
            return Err(SendError::NotEnoughData);
        }
        let count: u16 = buffer.pread_with(0, LE).unwrap();
        let ack = Ack::from_byte(buffer[2]);

        let mut data = Vec::new();
        if self.rw == Rw::Read {
            for i in 0..count as usize {
                let offset = 3 + i * 4;
                if buffer.len() < offset + 4 {
                    return Err(SendError::NotEnoughData);
                }
                data.push(buffer.pread_with(offset, LE).unwrap());
            }
        }

        Ok(TransferBlockResponse { count, ack, data })
    }
}

/// Configures idle cycles and WAIT retry behavior in the probe.
#[derive(Clone, Copy, Debug)]
pub struct ConfigureRequest {
    pub idle_cycles: u8,
    pub wait_retry: u16,
    pub match_retry: u16,
}

#[derive(Clone, Copy, Debug)]
pub struct ConfigureResponse(pub Status);

impl Request for ConfigureRequest {
    const COMMAND_ID: CommandId = CommandId::TransferConfigure;

    type Response = ConfigureResponse;

    fn to_bytes(&self, buffer: &mut [u8]) -> Result<usize, SendError> {
        buffer[0] = self.idle_cycles;
        buffer
            .pwrite_with(self.wait_retry, 1, LE)
            .map_err(|_| SendError::NotEnoughData)?;
        buffer
            .pwrite_with(self.match_retry, 3, LE)
            .map_err(|_| SendError::NotEnoughData)?;
        Ok(5)
    }

    fn parse_response(&self, buffer: &[u8]) -> Result<Self::Response, SendError> {
        if buffer.is_empty() {
            return Err(SendError::NotEnoughData);
        }
        Ok(ConfigureResponse(Status::from_byte(buffer[0])?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_transfer_request_encodes_address_bits() {
        let req = InnerTransferRequest::write(PortType::DebugPort, 0x8, 0xDEAD_BEEF);
        let mut buf = [0u8; 8];
        let len = req.to_bytes(&mut buf).unwrap();
        assert_eq!(len, 5);
        // A3 set, A2 clear, write, DP
        assert_eq!(buf[0], 0b1000);
        assert_eq!(&buf[1..5], &0xDEAD_BEEFu32.to_le_bytes());
    }

    #[test]
    fn transfer_response_carries_read_data() {
        let req = TransferRequest::new(&[
            InnerTransferRequest::read(PortType::AccessPort, 0xC),
            InnerTransferRequest::read(PortType::DebugPort, 0xC),
        ]);
        let mut resp = vec![2u8, 0x01];
        resp.extend_from_slice(&0x1111_2222u32.to_le_bytes());
        resp.extend_from_slice(&0x3333_4444u32.to_le_bytes());
        let parsed = req.parse_response(&resp).unwrap();
        assert_eq!(parsed.ack, Ack::Ok);
        assert_eq!(parsed.data, vec![0x1111_2222, 0x3333_4444]);
    }

    #[test]
    fn transfer_block_write_round_trip_framing() {
        let req =
            TransferBlockRequest::write_request(PortType::AccessPort, 0xC, vec![1, 2, 3]);
        let mut buf = [0u8; 32];
        let len = req.to_bytes(&mut buf).unwrap();
        assert_eq!(len, 4 + 12);
        assert_eq!(buf[1], 3); // LE count
        assert_eq!(buf[3], 0b1101); // AP, write, A2|A3 for 0xC
    }

    #[test]
    fn wait_ack_parses_without_data() {
        let req = TransferRequest::new(&[InnerTransferRequest::read(PortType::AccessPort, 0x0)]);
        let parsed = req.parse_response(&[1, 0x02]).unwrap();
        assert_eq!(parsed.ack, Ack::Wait);
        assert!(parsed.data.is_empty());
    }
}
