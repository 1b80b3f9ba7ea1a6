//! The bootloader settings page (`nrf_dfu_settings_t`, settings version 1)
//! and the CRC-32 flavor shared by the settings header and the app image.

use std::fmt;

use crc::{Crc, CRC_32_ISO_HDLC};
use scroll::{Pread, Pwrite, LE};

use crate::error::{Error, Result};

/// Flash address of the bootloader settings page.
pub const BL_SETTINGS_ADDR: u32 = 0x0007_F000;
/// Start of the application image in flash.
pub const APP_START: u32 = 0x0002_3000;
/// Size of the CRC-covered part of the settings struct.
pub const SETTINGS_SIZE: usize = 92;
/// Byte offset of `bank0.image_crc` within the settings struct.
pub const BANK0_CRC_OFFSET: usize = 0x1C;

/// Bank code flag: the bank holds a valid application.
pub const BANK_VALID_APP: u32 = 0x0000_0001;

/// IEEE CRC-32 (poly 0xEDB88320 reflected, init/xorout 0xFFFFFFFF), the
/// variant the Nordic DFU bootloader uses for both CRC slots.
pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

pub fn crc32(data: &[u8]) -> u32 {
    CRC32.checksum(data)
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DfuBank {
    pub image_size: u32,
    pub image_crc: u32,
    pub bank_code: u32,
}

impl DfuBank {
    pub fn holds_valid_app(&self) -> bool {
        self.image_size != 0 && self.bank_code & BANK_VALID_APP != 0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DfuProgress {
    pub command_size: u32,
    pub command_offset: u32,
    pub command_crc: u32,
    pub data_object_size: u32,
    pub firmware_image_crc: u32,
    pub firmware_image_crc_last: u32,
    pub firmware_image_offset: u32,
    pub firmware_image_offset_last: u32,
}

/// Decoded `nrf_dfu_settings_t`, settings version 1. Field offsets are fixed
/// by the vendor SDK; the codec below is the authority for them.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BootloaderSettings {
    pub crc: u32,
    pub settings_version: u32,
    pub app_version: u32,
    pub bootloader_version: u32,
    pub bank_layout: u32,
    pub bank_current: u32,
    pub bank0: DfuBank,
    pub bank1: DfuBank,
    pub write_offset: u32,
    pub sd_size: u32,
    pub progress: DfuProgress,
    pub enter_buttonless_dfu: u32,
}

impl BootloaderSettings {
    /// Decode from the first [`SETTINGS_SIZE`] bytes of the settings page.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < SETTINGS_SIZE {
            return Err(Error::InvalidData(format!(
                "bootloader settings need {SETTINGS_SIZE} bytes, got {}",
                bytes.len()
            )));
        }

        let word = |offset: usize| -> u32 { bytes.pread_with(offset, LE).unwrap() };
        let bank = |offset: usize| -> DfuBank {
            DfuBank {
                image_size: word(offset),
                image_crc: word(offset + 4),
                bank_code: word(offset + 8),
            }
        };

        Ok(Self {
            crc: word(0x00),
            settings_version: word(0x04),
            app_version: word(0x08),
            bootloader_version: word(0x0C),
            bank_layout: word(0x10),
            bank_current: word(0x14),
            bank0: bank(0x18),
            bank1: bank(0x24),
            write_offset: word(0x30),
            sd_size: word(0x34),
            progress: DfuProgress {
                command_size: word(0x38),
                command_offset: word(0x3C),
                command_crc: word(0x40),
                data_object_size: word(0x44),
                firmware_image_crc: word(0x48),
                firmware_image_crc_last: word(0x4C),
                firmware_image_offset: word(0x50),
                firmware_image_offset_last: word(0x54),
            },
            enter_buttonless_dfu: word(0x58),
        })
    }

    /// Encode back to the on-flash layout.
    pub fn encode(&self) -> [u8; SETTINGS_SIZE] {
        let mut bytes = [0u8; SETTINGS_SIZE];
        {
            let put = |bytes: &mut [u8; SETTINGS_SIZE], offset: usize, value: u32| {
                bytes.pwrite_with(value, offset, LE).unwrap();
            };
            put(&mut bytes, 0x00, self.crc);
            put(&mut bytes, 0x04, self.settings_version);
            put(&mut bytes, 0x08, self.app_version);
            put(&mut bytes, 0x0C, self.bootloader_version);
            put(&mut bytes, 0x10, self.bank_layout);
            put(&mut bytes, 0x14, self.bank_current);
            put(&mut bytes, 0x18, self.bank0.image_size);
            put(&mut bytes, 0x1C, self.bank0.image_crc);
            put(&mut bytes, 0x20, self.bank0.bank_code);
            put(&mut bytes, 0x24, self.bank1.image_size);
            put(&mut bytes, 0x28, self.bank1.image_crc);
            put(&mut bytes, 0x2C, self.bank1.bank_code);
            put(&mut bytes, 0x30, self.write_offset);
            put(&mut bytes, 0x34, self.sd_size);
            put(&mut bytes, 0x38, self.progress.command_size);
            put(&mut bytes, 0x3C, self.progress.command_offset);
            put(&mut bytes, 0x40, self.progress.command_crc);
            put(&mut bytes, 0x44, self.progress.data_object_size);
            put(&mut bytes, 0x48, self.progress.firmware_image_crc);
            put(&mut bytes, 0x4C, self.progress.firmware_image_crc_last);
            put(&mut bytes, 0x50, self.progress.firmware_image_offset);
            put(&mut bytes, 0x54, self.progress.firmware_image_offset_last);
            put(&mut bytes, 0x58, self.enter_buttonless_dfu);
        }
        bytes
    }

    /// The header CRC covers bytes `[4..92)` of the page.
    pub fn compute_crc(page: &[u8]) -> u32 {
        crc32(&page[4..SETTINGS_SIZE])
    }

    pub fn crc_valid(&self, page: &[u8]) -> bool {
        self.crc == Self::compute_crc(page)
    }

    /// Derive the application size, preferring a bank flagged as holding a
    /// valid app over any non-empty bank.
    pub fn app_size(&self) -> Option<u32> {
        for bank in [&self.bank0, &self.bank1] {
            if bank.holds_valid_app() {
                return Some(bank.image_size);
            }
        }
        for bank in [&self.bank0, &self.bank1] {
            if bank.image_size != 0 {
                return Some(bank.image_size);
            }
        }
        None
    }
}

impl fmt::Display for BootloaderSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Settings CRC:    {:#010x}", self.crc)?;
        writeln!(f, "Versions:        settings {}, app {}, bootloader {}",
            self.settings_version, self.app_version, self.bootloader_version)?;
        writeln!(
            f,
            "Banks:           layout {}, current {}",
            self.bank_layout, self.bank_current
        )?;
        writeln!(
            f,
            "Bank 0:          {} bytes, CRC {:#010x}, code {:#x}",
            self.bank0.image_size, self.bank0.image_crc, self.bank0.bank_code
        )?;
        writeln!(
            f,
            "Bank 1:          {} bytes, CRC {:#010x}, code {:#x}",
            self.bank1.image_size, self.bank1.image_crc, self.bank1.bank_code
        )?;
        writeln!(f, "Write offset:    {:#x}", self.write_offset)?;
        writeln!(f, "SoftDevice size: {:#x}", self.sd_size)?;
        write!(
            f,
            "Buttonless DFU:  {:#x}",
            self.enter_buttonless_dfu
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn sample_settings() -> BootloaderSettings {
        BootloaderSettings {
            crc: 0,
            settings_version: 1,
            app_version: 6,
            bootloader_version: 2,
            bank_layout: 0,
            bank_current: 0,
            bank0: DfuBank {
                image_size: 0x2_4000,
                image_crc: 0x1234_5678,
                bank_code: BANK_VALID_APP,
            },
            bank1: DfuBank::default(),
            write_offset: 0,
            sd_size: 0x2_3000,
            progress: DfuProgress::default(),
            enter_buttonless_dfu: 0,
        }
    }

    #[test]
    fn codec_round_trip() {
        let mut settings = sample_settings();
        let mut page = settings.encode().to_vec();
        settings.crc = BootloaderSettings::compute_crc(&page);
        page = settings.encode().to_vec();

        let decoded = BootloaderSettings::decode(&page).unwrap();
        assert_eq!(decoded, settings);
        assert!(decoded.crc_valid(&page));
    }

    #[test]
    fn fields_land_on_vendor_offsets() {
        let settings = sample_settings();
        let page = settings.encode();
        // bank0 at 0x18, bank1 at 0x24, enter_buttonless_dfu at 0x58.
        assert_eq!(&page[0x18..0x1C], &0x2_4000u32.to_le_bytes());
        assert_eq!(&page[0x1C..0x20], &0x1234_5678u32.to_le_bytes());
        assert_eq!(&page[0x20..0x24], &BANK_VALID_APP.to_le_bytes());
        assert_eq!(&page[0x24..0x28], &[0, 0, 0, 0]);
        assert_eq!(&page[0x34..0x38], &0x2_3000u32.to_le_bytes());
    }

    #[test]
    fn short_buffer_is_invalid_data() {
        assert!(matches!(
            BootloaderSettings::decode(&[0u8; 12]),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn crc32_matches_reference_vector() {
        // The classic IEEE check value.
        assert_eq!(crc32(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn app_size_prefers_valid_bank() {
        let mut settings = sample_settings();
        settings.bank0.bank_code = 0;
        settings.bank1 = DfuBank {
            image_size: 0x8000,
            image_crc: 0,
            bank_code: BANK_VALID_APP,
        };
        assert_eq!(settings.app_size(), Some(0x8000));

        settings.bank1.bank_code = 0;
        // No valid flag anywhere: first non-empty bank wins.
        assert_eq!(settings.app_size(), Some(0x2_4000));

        settings.bank0.image_size = 0;
        settings.bank1.image_size = 0;
        assert_eq!(settings.app_size(), None);
    }
}
