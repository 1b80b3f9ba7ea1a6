//! Decoded views of the nRF52 factory (FICR) and user (UICR) registers.

use std::fmt;

/// FICR offsets of the fields captured in [`DeviceInfo`].
pub mod ficr {
    pub const CODEPAGESIZE: u32 = 0x010;
    pub const CODESIZE: u32 = 0x014;
    pub const DEVICEID0: u32 = 0x060;
    pub const DEVICEID1: u32 = 0x064;
    pub const DEVICEADDRTYPE: u32 = 0x0A0;
    pub const DEVICEADDR0: u32 = 0x0A4;
    pub const DEVICEADDR1: u32 = 0x0A8;
    pub const INFO_PART: u32 = 0x100;
    pub const INFO_VARIANT: u32 = 0x104;
    pub const INFO_PACKAGE: u32 = 0x108;
    pub const INFO_RAM: u32 = 0x10C;
    pub const INFO_FLASH: u32 = 0x110;
}

/// UICR offsets of the registers captured in [`UicrRegisters`].
pub mod uicr {
    pub const NRFFW0: u32 = 0x014;
    pub const NRFFW1: u32 = 0x018;
    pub const PSELRESET0: u32 = 0x200;
    pub const PSELRESET1: u32 = 0x204;
    pub const APPROTECT: u32 = 0x208;
    pub const NFCPINS: u32 = 0x20C;
}

/// Snapshot of the factory information registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    pub part: u32,
    pub variant: u32,
    pub package: u32,
    pub ram_kb: u32,
    pub flash_kb: u32,
    pub device_id: [u32; 2],
    pub device_addr: [u32; 2],
    pub device_addr_type: u32,
    pub codepagesize: u32,
    pub codesize: u32,
}

impl DeviceInfo {
    /// Total flash size in bytes.
    pub fn flash_bytes(&self) -> usize {
        self.flash_kb as usize * 1024
    }

    /// The variant field holds four ASCII characters, MSB first
    /// (e.g. `0x41414141` is "AAAA"), with trailing NUL padding.
    pub fn variant_string(&self) -> String {
        let bytes = self.variant.to_be_bytes();
        let mut end = bytes.len();
        while end > 0 && bytes[end - 1] == 0 {
            end -= 1;
        }
        bytes[..end].iter().map(|&b| b as char).collect()
    }

    /// Marketing name of the package code.
    pub fn package_string(&self) -> &'static str {
        match self.package {
            0x2000 => "QF",
            0x2001 => "CH",
            0x2002 => "CI",
            0x2005 => "QK",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Part:            nRF{:X}", self.part)?;
        writeln!(
            f,
            "Variant:         {} ({})",
            self.variant_string(),
            self.package_string()
        )?;
        writeln!(f, "RAM:             {} KiB", self.ram_kb)?;
        writeln!(f, "Flash:           {} KiB", self.flash_kb)?;
        writeln!(
            f,
            "Device ID:       {:08X}{:08X}",
            self.device_id[1], self.device_id[0]
        )?;
        writeln!(
            f,
            "Device address:  {:04X}{:08X} ({})",
            self.device_addr[1] & 0xFFFF,
            self.device_addr[0],
            if self.device_addr_type & 1 == 1 {
                "random static"
            } else {
                "public"
            }
        )?;
        writeln!(f, "Code page size:  {} bytes", self.codepagesize)?;
        write!(f, "Code size:       {} pages", self.codesize)
    }
}

/// Raw values of the interesting UICR registers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UicrRegisters {
    pub pselreset0: u32,
    pub pselreset1: u32,
    pub approtect: u32,
    pub nfcpins: u32,
    pub nrffw0: u32,
    pub nrffw1: u32,
}

impl UicrRegisters {
    /// APPROTECT is enabled when the low byte reads 0x00.
    pub fn approtect_enabled(&self) -> bool {
        self.approtect & 0xFF == 0x00
    }

    /// Human-readable reset pin mapping: bit 31 disconnects the pin.
    pub fn pselreset_string(value: u32) -> String {
        if value & (1 << 31) != 0 {
            "Disconnected".to_string()
        } else {
            format!("Pin {}", value & 0xFF)
        }
    }

    /// NFC pad usage: bit 0 selects plain GPIO (0) or the NFC antenna (1).
    pub fn nfcpins_string(&self) -> &'static str {
        if self.nfcpins & 1 == 0 {
            "GPIO"
        } else {
            "NFC Antenna"
        }
    }

    /// Bootloader address slot; all ones means unprogrammed.
    pub fn nrffw0_string(&self) -> String {
        if self.nrffw0 == 0xFFFF_FFFF {
            "Not Set".to_string()
        } else {
            format!("{:#010x}", self.nrffw0)
        }
    }
}

impl fmt::Display for UicrRegisters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "APPROTECT:       {} ({:#010x})",
            if self.approtect_enabled() {
                "Enabled"
            } else {
                "Disabled"
            },
            self.approtect
        )?;
        writeln!(
            f,
            "PSELRESET[0]:    {}",
            Self::pselreset_string(self.pselreset0)
        )?;
        writeln!(
            f,
            "PSELRESET[1]:    {}",
            Self::pselreset_string(self.pselreset1)
        )?;
        writeln!(f, "NFC pins:        {}", self.nfcpins_string())?;
        writeln!(f, "NRFFW[0]:        {}", self.nrffw0_string())?;
        write!(
            f,
            "NRFFW[1]:        {}",
            if self.nrffw1 == 0xFFFF_FFFF {
                "Not Set".to_string()
            } else {
                format!("{:#010x}", self.nrffw1)
            }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info() -> DeviceInfo {
        DeviceInfo {
            part: 0x52832,
            variant: 0x41414230, // "AAB0"
            package: 0x2000,
            ram_kb: 64,
            flash_kb: 512,
            device_id: [0xDEADBEEF, 0x12345678],
            device_addr: [0xAABBCCDD, 0x0000EEFF],
            device_addr_type: 1,
            codepagesize: 4096,
            codesize: 128,
        }
    }

    #[test]
    fn variant_strips_trailing_nuls() {
        let mut i = info();
        i.variant = 0x41414200; // "AAB\0"
        assert_eq!(i.variant_string(), "AAB");

        i.variant = 0x41410000; // "AA\0\0"
        assert_eq!(i.variant_string(), "AA");

        // Only the trailing run is padding; an embedded NUL stays.
        i.variant = 0x41004142; // "A\0AB"
        assert_eq!(i.variant_string(), "A\0AB");
    }

    #[test]
    fn package_table() {
        let mut i = info();
        assert_eq!(i.package_string(), "QF");
        i.package = 0x2001;
        assert_eq!(i.package_string(), "CH");
        i.package = 0x2005;
        assert_eq!(i.package_string(), "QK");
        i.package = 0x1234;
        assert_eq!(i.package_string(), "Unknown");
    }

    #[test]
    fn approtect_interpretation() {
        let mut u = UicrRegisters {
            pselreset0: 21,
            pselreset1: 21,
            approtect: 0xFFFF_FF00,
            nfcpins: 0xFFFF_FFFE,
            nrffw0: 0xFFFF_FFFF,
            nrffw1: 0xFFFF_FFFF,
        };
        assert!(u.approtect_enabled());
        u.approtect = 0xFFFF_FFFF;
        assert!(!u.approtect_enabled());
    }

    #[test]
    fn pselreset_interpretation() {
        assert_eq!(UicrRegisters::pselreset_string(21), "Pin 21");
        assert_eq!(
            UicrRegisters::pselreset_string(0x8000_0000),
            "Disconnected"
        );
    }
}
