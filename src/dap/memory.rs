//! Memory access through MEM-AP #0: CSW/TAR/DRW with auto-increment.
//!
//! The TAR auto-increment on the nRF52 wraps at 1 KiB, so block transfers
//! re-arm TAR at every 1-KiB boundary. All addresses must be word aligned;
//! byte-granular access is not needed anywhere in this tool.

use super::registers::{Csw, Register, DRW, MEM_AP, TAR};
use super::DapSession;
use crate::error::{Error, Result};

/// Auto-increment wrap of the MEM-AP.
const AUTOINC_WRAP: usize = 0x400;

impl DapSession {
    /// Program CSW for 32-bit auto-increment access, if it is not already.
    fn arm_csw(&mut self) -> Result<()> {
        let csw: u32 = Csw::word_autoinc().into();
        if self.csw != Some(csw) {
            self.write_ap(MEM_AP, Csw::ADDRESS, csw)?;
            self.csw = Some(csw);
        }
        Ok(())
    }

    fn check_aligned(address: u32) -> Result<()> {
        if address % 4 != 0 {
            return Err(Error::InvalidData(format!(
                "address {address:#010x} is not word aligned"
            )));
        }
        Ok(())
    }

    /// Read one 32-bit word from a word-aligned address.
    pub fn read_u32(&mut self, address: u32) -> Result<u32> {
        Self::check_aligned(address)?;
        self.arm_csw()?;
        self.write_ap(MEM_AP, TAR, address)?;
        let value = self.read_ap(MEM_AP, DRW).inspect_err(|_| {
            let _ = self.clear_errors();
        })?;
        Ok(value)
    }

    /// Write one 32-bit word to a word-aligned address.
    pub fn write_u32(&mut self, address: u32, value: u32) -> Result<()> {
        Self::check_aligned(address)?;
        self.arm_csw()?;
        self.write_ap(MEM_AP, TAR, address)?;
        self.write_ap(MEM_AP, DRW, value).inspect_err(|_| {
            let _ = self.clear_errors();
        })
    }

    /// Read `data.len()` consecutive words starting at `address`.
    pub fn read_block(&mut self, address: u32, data: &mut [u32]) -> Result<()> {
        Self::check_aligned(address)?;
        if data.is_empty() {
            return Ok(());
        }
        self.arm_csw()?;

        let mut address = address;
        let mut remaining = data;
        // First chunk ends at the next wrap boundary, the rest are full wraps.
        let mut chunk_words =
            (AUTOINC_WRAP - (address as usize % AUTOINC_WRAP)) / 4;

        while !remaining.is_empty() {
            let words = chunk_words.min(remaining.len());
            let (chunk, rest) = remaining.split_at_mut(words);

            self.write_ap(MEM_AP, TAR, address)?;
            self.read_ap_block(MEM_AP, DRW, chunk).inspect_err(|_| {
                let _ = self.clear_errors();
            })?;

            address += (words * 4) as u32;
            remaining = rest;
            chunk_words = AUTOINC_WRAP / 4;
        }
        Ok(())
    }

    /// Write `data.len()` consecutive words starting at `address`.
    pub fn write_block(&mut self, address: u32, data: &[u32]) -> Result<()> {
        Self::check_aligned(address)?;
        if data.is_empty() {
            return Ok(());
        }
        self.arm_csw()?;

        let mut address = address;
        let mut remaining = data;
        let mut chunk_words =
            (AUTOINC_WRAP - (address as usize % AUTOINC_WRAP)) / 4;

        while !remaining.is_empty() {
            let words = chunk_words.min(remaining.len());
            let (chunk, rest) = remaining.split_at(words);

            self.write_ap(MEM_AP, TAR, address)?;
            self.write_ap_block(MEM_AP, DRW, chunk).inspect_err(|_| {
                let _ = self.clear_errors();
            })?;

            address += (words * 4) as u32;
            remaining = rest;
            chunk_words = AUTOINC_WRAP / 4;
        }
        Ok(())
    }

    /// Read a byte region. `length` may be any multiple of 4.
    pub fn read_bytes(&mut self, address: u32, length: usize) -> Result<Vec<u8>> {
        if length % 4 != 0 {
            return Err(Error::InvalidData(format!(
                "read length {length} is not a multiple of 4"
            )));
        }
        let mut words = vec![0u32; length / 4];
        self.read_block(address, &mut words)?;
        let mut bytes = Vec::with_capacity(length);
        for word in words {
            bytes.extend_from_slice(&word.to_le_bytes());
        }
        Ok(bytes)
    }
}

/// Pack little-endian bytes into words, padding a trailing partial word with
/// the erased-flash value `0xFF`.
pub fn bytes_to_words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut word = [0xFF; 4];
            word[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(word)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dap::fake_session;

    #[test]
    fn word_round_trip_in_ram_region() {
        let mut session = fake_session();
        session.write_u32(0x2000_0000, 0xCAFE_F00D).unwrap();
        assert_eq!(session.read_u32(0x2000_0000).unwrap(), 0xCAFE_F00D);
    }

    #[test]
    fn unaligned_access_is_rejected() {
        let mut session = fake_session();
        assert!(matches!(
            session.read_u32(0x2000_0001),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn block_round_trip_across_1k_boundary() {
        let mut session = fake_session();
        // 600 words starting 40 words below a wrap boundary spans three
        // auto-increment windows.
        let base = 0x2000_0000 + 0x400 - 40 * 4;
        let data: Vec<u32> = (0..600u32).map(|i| i.wrapping_mul(0x0101_0101)).collect();
        session.write_block(base, &data).unwrap();

        let mut readback = vec![0u32; data.len()];
        session.read_block(base, &mut readback).unwrap();
        assert_eq!(readback, data);

        // Spot-check a word on each side of the boundary through single reads.
        assert_eq!(
            session.read_u32(0x2000_0400 - 4).unwrap(),
            data[39]
        );
        assert_eq!(session.read_u32(0x2000_0400).unwrap(), data[40]);
    }

    #[test]
    fn bytes_to_words_pads_with_erased_value() {
        let words = bytes_to_words(&[0x01, 0x02, 0x03, 0x04, 0x05]);
        assert_eq!(words, vec![0x0403_0201, 0xFFFF_FF05]);
    }
}
