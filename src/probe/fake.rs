//! An in-process CMSIS-DAP responder backed by a simulated nRF52832.
//!
//! Parses the same packets the real probe would receive and answers them
//! against an in-memory model of the target: flash with AND-write semantics
//! behind the NVMC write-enable, UICR, FICR identity, the CTRL-AP erase
//! machine and a small RAM window. Used by the bus-level tests.

use std::collections::{HashMap, VecDeque};

use super::commands::{CommandId, SendError};

const FLASH_SIZE: usize = 512 * 1024;
const UICR_BASE: u32 = 0x1000_1000;
const UICR_SIZE: usize = 0x400;
const FICR_BASE: u32 = 0x1000_0000;
const RAM_BASE: u32 = 0x2000_0000;
const RAM_SIZE: u32 = 0x1_0000;

const NVMC_READY: u32 = 0x4001_E400;
const NVMC_CONFIG: u32 = 0x4001_E504;
const NVMC_ERASEPAGE: u32 = 0x4001_E508;
const AIRCR: u32 = 0xE000_ED0C;

/// SW-DP IDCODE of an nRF52832.
const DPIDR_VALUE: u32 = 0x2BA0_1477;
const MEM_AP_IDR: u32 = 0x2477_0011;
const CTRL_AP_IDR: u32 = 0x0288_0000;

/// How many ERASEALLSTATUS polls read busy before the erase finishes.
const ERASE_BUSY_POLLS: u32 = 2;

pub(crate) struct FakeDevice {
    responses: VecDeque<Vec<u8>>,
    target: FakeTarget,
    select_writes: usize,
}

struct FakeTarget {
    flash: Vec<u8>,
    uicr: Vec<u8>,
    ram: HashMap<u32, u32>,

    // DP state.
    select: u32,
    ctrl_stat: u32,
    rdbuff: u32,

    // MEM-AP state.
    csw: u32,
    tar: u32,

    // Peripherals.
    nvmc_config: u32,
    erase_busy: u32,
}

impl FakeDevice {
    pub(crate) fn new() -> Self {
        Self {
            responses: VecDeque::new(),
            target: FakeTarget::new(),
            select_writes: 0,
        }
    }

    /// Number of DP SELECT writes observed, for cache tests.
    pub(crate) fn select_writes(&self) -> usize {
        self.select_writes
    }

    pub(crate) fn drain(&mut self) {
        self.responses.clear();
    }

    pub(crate) fn read(&mut self, buf: &mut [u8]) -> Result<usize, SendError> {
        let response = self.responses.pop_front().ok_or(SendError::Timeout)?;
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }

    /// `packet` starts with the command id (the HID report byte is already
    /// stripped, as on the v2 wire).
    pub(crate) fn write(&mut self, packet: &[u8]) -> Result<usize, SendError> {
        let response = self.handle(packet);
        let len = response.len();
        self.responses.push_back(response);
        Ok(len)
    }

    fn handle(&mut self, packet: &[u8]) -> Vec<u8> {
        let command = packet[0];
        match command {
            c if c == CommandId::Info as u8 => {
                // Only the packet-size id is ever requested.
                vec![c, 2, 0x00, 0x02] // 512 bytes
            }
            c if c == CommandId::Connect as u8 => vec![c, 0x01],
            c if c == CommandId::Disconnect as u8 => vec![c, 0x00],
            c if c == CommandId::TransferConfigure as u8 => vec![c, 0x00],
            c if c == CommandId::SwjClock as u8 => vec![c, 0x00],
            c if c == CommandId::SwjSequence as u8 => vec![c, 0x00],
            c if c == CommandId::SwdConfigure as u8 => vec![c, 0x00],
            c if c == CommandId::ResetTarget as u8 => vec![c, 0x00, 0x01],
            c if c == CommandId::Transfer as u8 => self.handle_transfer(packet),
            c if c == CommandId::TransferBlock as u8 => self.handle_transfer_block(packet),
            c => vec![c, 0xFF],
        }
    }

    fn handle_transfer(&mut self, packet: &[u8]) -> Vec<u8> {
        let count = packet[2];
        let mut offset = 3;
        let mut response = vec![CommandId::Transfer as u8, 0, 0x01];
        let mut executed = 0u8;

        for _ in 0..count {
            let request = packet[offset];
            offset += 1;
            let is_ap = request & 0x01 != 0;
            let is_read = request & 0x02 != 0;
            let address = (request >> 2 & 0x3) << 2;

            if is_read {
                let value = if is_ap {
                    self.ap_read(address)
                } else {
                    self.dp_read(address)
                };
                response.extend_from_slice(&value.to_le_bytes());
            } else {
                let value = u32::from_le_bytes(packet[offset..offset + 4].try_into().unwrap());
                offset += 4;
                if is_ap {
                    self.ap_write(address, value);
                } else {
                    self.dp_write(address, value);
                }
            }
            executed += 1;
        }

        response[1] = executed;
        response
    }

    fn handle_transfer_block(&mut self, packet: &[u8]) -> Vec<u8> {
        let count = u16::from_le_bytes(packet[2..4].try_into().unwrap());
        let request = packet[4];
        let is_ap = request & 0x01 != 0;
        let is_read = request & 0x02 != 0;
        let address = (request >> 2 & 0x3) << 2;

        let mut response = vec![CommandId::TransferBlock as u8];
        response.extend_from_slice(&count.to_le_bytes());
        response.push(0x01);

        if is_read {
            for _ in 0..count {
                let value = if is_ap {
                    self.ap_read(address)
                } else {
                    self.dp_read(address)
                };
                response.extend_from_slice(&value.to_le_bytes());
            }
        } else {
            let mut offset = 5;
            for _ in 0..count {
                let value = u32::from_le_bytes(packet[offset..offset + 4].try_into().unwrap());
                offset += 4;
                if is_ap {
                    self.ap_write(address, value);
                } else {
                    self.dp_write(address, value);
                }
            }
        }
        response
    }

    fn dp_read(&mut self, address: u8) -> u32 {
        match address {
            0x0 => DPIDR_VALUE,
            0x4 => {
                // Power-up requests are acknowledged immediately.
                let mut value = self.target.ctrl_stat;
                if value & (1 << 30) != 0 {
                    value |= 1 << 31;
                }
                if value & (1 << 28) != 0 {
                    value |= 1 << 29;
                }
                value
            }
            0x8 => self.target.select,
            0xC => self.target.rdbuff,
            _ => 0,
        }
    }

    fn dp_write(&mut self, address: u8, value: u32) {
        match address {
            0x0 => {} // ABORT: sticky flags are not modeled
            0x4 => self.target.ctrl_stat = value,
            0x8 => {
                self.target.select = value;
                self.select_writes += 1;
            }
            _ => {}
        }
    }

    fn ap_register(&self, address: u8) -> u8 {
        ((self.target.select >> 4 & 0xF) as u8) << 4 | address
    }

    fn ap_read(&mut self, address: u8) -> u32 {
        let apsel = (self.target.select >> 24) as u8;
        let register = self.ap_register(address);
        let value = match (apsel, register) {
            (0, 0x00) => self.target.csw,
            (0, 0x04) => self.target.tar,
            (0, 0x0C) => {
                let value = self.target.mem_read(self.target.tar);
                self.target.advance_tar();
                value
            }
            (0, 0xFC) => MEM_AP_IDR,
            (1, 0x08) => {
                if self.target.erase_busy > 0 {
                    self.target.erase_busy -= 1;
                    1
                } else {
                    0
                }
            }
            (1, 0xFC) => CTRL_AP_IDR,
            _ => 0,
        };
        self.target.rdbuff = value;
        value
    }

    fn ap_write(&mut self, address: u8, value: u32) {
        let apsel = (self.target.select >> 24) as u8;
        let register = self.ap_register(address);
        match (apsel, register) {
            (0, 0x00) => self.target.csw = value,
            (0, 0x04) => self.target.tar = value,
            (0, 0x0C) => {
                self.target.mem_write(self.target.tar, value);
                self.target.advance_tar();
            }
            (1, 0x00) => {} // CTRL-AP RESET
            (1, 0x04) => {
                if value == 1 {
                    self.target.erase_all();
                }
            }
            _ => {}
        }
    }
}

impl FakeTarget {
    fn new() -> Self {
        Self {
            flash: vec![0xFF; FLASH_SIZE],
            uicr: vec![0xFF; UICR_SIZE],
            ram: HashMap::new(),
            select: 0,
            ctrl_stat: 0,
            rdbuff: 0,
            csw: 0,
            tar: 0,
            nvmc_config: 0,
            erase_busy: 0,
        }
    }

    fn write_enabled(&self) -> bool {
        self.nvmc_config & 1 == 1
    }

    fn erase_enabled(&self) -> bool {
        self.nvmc_config & 2 == 2
    }

    /// TAR auto-increments by 4, wrapping inside a 1-KiB window like the
    /// real MEM-AP.
    fn advance_tar(&mut self) {
        if self.csw & 0x10 != 0 {
            self.tar = (self.tar & !0x3FF) | (self.tar.wrapping_add(4) & 0x3FF);
        }
    }

    fn ficr_read(&self, offset: u32) -> u32 {
        match offset {
            0x010 => 4096,        // CODEPAGESIZE
            0x014 => 128,         // CODESIZE
            0x060 => 0xDEAD_BEEF, // DEVICEID[0]
            0x064 => 0x1234_5678, // DEVICEID[1]
            0x0A0 => 1,           // DEVICEADDRTYPE
            0x0A4 => 0xAABB_CCDD, // DEVICEADDR[0]
            0x0A8 => 0x0000_EEFF, // DEVICEADDR[1]
            0x100 => 0x52832,     // INFO.PART
            0x104 => 0x4141_4230, // INFO.VARIANT "AAB0"
            0x108 => 0x2000,      // INFO.PACKAGE
            0x10C => 64,          // INFO.RAM
            0x110 => 512,         // INFO.FLASH
            _ => 0xFFFF_FFFF,
        }
    }

    fn mem_read(&self, address: u32) -> u32 {
        let word = |bytes: &[u8], offset: usize| {
            u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
        };

        if (address as usize) < FLASH_SIZE {
            word(&self.flash, address as usize)
        } else if (FICR_BASE..FICR_BASE + 0x1000).contains(&address) {
            self.ficr_read(address - FICR_BASE)
        } else if (UICR_BASE..UICR_BASE + UICR_SIZE as u32).contains(&address) {
            word(&self.uicr, (address - UICR_BASE) as usize)
        } else if (RAM_BASE..RAM_BASE + RAM_SIZE).contains(&address) {
            self.ram.get(&address).copied().unwrap_or(0)
        } else {
            match address {
                NVMC_READY => 1,
                NVMC_CONFIG => self.nvmc_config,
                _ => 0,
            }
        }
    }

    fn mem_write(&mut self, address: u32, value: u32) {
        if (address as usize) < FLASH_SIZE {
            // NOR flash can only clear bits, and only under write-enable.
            if self.write_enabled() {
                let offset = address as usize;
                let old = u32::from_le_bytes(self.flash[offset..offset + 4].try_into().unwrap());
                self.flash[offset..offset + 4].copy_from_slice(&(old & value).to_le_bytes());
            }
        } else if (UICR_BASE..UICR_BASE + UICR_SIZE as u32).contains(&address) {
            if self.write_enabled() {
                let offset = (address - UICR_BASE) as usize;
                let old = u32::from_le_bytes(self.uicr[offset..offset + 4].try_into().unwrap());
                self.uicr[offset..offset + 4].copy_from_slice(&(old & value).to_le_bytes());
            }
        } else if (RAM_BASE..RAM_BASE + RAM_SIZE).contains(&address) {
            self.ram.insert(address, value);
        } else {
            match address {
                NVMC_CONFIG => self.nvmc_config = value,
                NVMC_ERASEPAGE => {
                    if self.erase_enabled() && (value as usize) < FLASH_SIZE {
                        let page = value as usize & !0xFFF;
                        self.flash[page..page + 0x1000].fill(0xFF);
                    }
                }
                AIRCR => {} // soft reset request, nothing to model
                _ => {}
            }
        }
    }

    fn erase_all(&mut self) {
        self.flash.fill(0xFF);
        self.uicr.fill(0xFF);
        self.erase_busy = ERASE_BUSY_POLLS;
    }
}
