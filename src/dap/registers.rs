//! ADIv5 register definitions used by the session.

use bitfield::bitfield;

/// A 32-bit DP or AP register with a fixed address.
pub trait Register: From<u32> + Into<u32> + Sized {
    const ADDRESS: u8;
    const NAME: &'static str;
}

bitfield! {
    /// DP ABORT (write-only). The four `*CLR` bits are the sticky-error
    /// clear mask `0x1E`.
    #[derive(Clone, Copy)]
    pub struct Abort(u32);
    impl Debug;
    pub _, set_orunerrclr: 4;
    pub _, set_wderrclr: 3;
    pub _, set_stkerrclr: 2;
    pub _, set_stkcmpclr: 1;
    pub _, set_dapabort: 0;
}

impl From<u32> for Abort {
    fn from(raw: u32) -> Self {
        Abort(raw)
    }
}

impl From<Abort> for u32 {
    fn from(raw: Abort) -> Self {
        raw.0
    }
}

impl Register for Abort {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "ABORT";
}

bitfield! {
    /// DP CTRL/STAT.
    #[derive(Clone, Copy, Default)]
    pub struct Ctrl(u32);
    impl Debug;
    pub csyspwrupack, _: 31;
    pub csyspwrupreq, set_csyspwrupreq: 30;
    pub cdbgpwrupack, _: 29;
    pub cdbgpwrupreq, set_cdbgpwrupreq: 28;
    pub w_data_err, _: 7;
    pub read_ok, _: 6;
    pub sticky_err, _: 5;
    pub sticky_cmp, _: 4;
    pub sticky_orun, _: 1;
    pub orun_detect, set_orun_detect: 0;
}

impl From<u32> for Ctrl {
    fn from(raw: u32) -> Self {
        Ctrl(raw)
    }
}

impl From<Ctrl> for u32 {
    fn from(raw: Ctrl) -> Self {
        raw.0
    }
}

impl Register for Ctrl {
    const ADDRESS: u8 = 0x4;
    const NAME: &'static str = "CTRL/STAT";
}

bitfield! {
    /// DP SELECT: routes AP accesses to `APSEL<<24 | APBANKSEL<<4`.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Select(u32);
    impl Debug;
    pub u8, ap_sel, set_ap_sel: 31, 24;
    pub u8, ap_bank_sel, set_ap_bank_sel: 7, 4;
    pub u8, dp_bank_sel, set_dp_bank_sel: 3, 0;
}

impl From<u32> for Select {
    fn from(raw: u32) -> Self {
        Select(raw)
    }
}

impl From<Select> for u32 {
    fn from(raw: Select) -> Self {
        raw.0
    }
}

impl Register for Select {
    const ADDRESS: u8 = 0x8;
    const NAME: &'static str = "SELECT";
}

bitfield! {
    /// DP identification register, read at address 0x0 (the "IDCODE" read
    /// that concludes the connect sequence).
    #[derive(Clone, Copy)]
    pub struct DpIdr(u32);
    impl Debug;
    pub u8, revision, _: 31, 28;
    pub u8, part_no, _: 27, 20;
    pub min, _: 16;
    pub u8, version, _: 15, 12;
    pub u16, designer, _: 11, 1;
}

impl From<u32> for DpIdr {
    fn from(raw: u32) -> Self {
        DpIdr(raw)
    }
}

impl From<DpIdr> for u32 {
    fn from(raw: DpIdr) -> Self {
        raw.0
    }
}

impl Register for DpIdr {
    const ADDRESS: u8 = 0x0;
    const NAME: &'static str = "DPIDR";
}

/// DP RDBUFF address: reading it realizes the previous pipelined AP read.
pub const RDBUFF: u8 = 0xC;

bitfield! {
    /// MEM-AP CSW.
    #[derive(Clone, Copy, Default, PartialEq, Eq)]
    pub struct Csw(u32);
    impl Debug;
    pub dbg_sw_enable, set_dbg_sw_enable: 31;
    pub u8, prot, set_prot: 30, 24;
    pub spiden, _: 23;
    pub tr_in_prog, _: 7;
    pub device_en, _: 6;
    pub u8, addr_inc, set_addr_inc: 5, 4;
    pub u8, size, set_size: 2, 0;
}

impl Csw {
    /// 32-bit accesses, auto-increment single, AHB data/privileged access.
    pub fn word_autoinc() -> Self {
        let mut csw = Csw(0);
        csw.set_dbg_sw_enable(true);
        csw.set_prot(0b110); // HPROT: privileged data access, default master
        csw.set_addr_inc(0b01); // increment single
        csw.set_size(0b010); // 32 bit
        csw
    }
}

impl From<u32> for Csw {
    fn from(raw: u32) -> Self {
        Csw(raw)
    }
}

impl From<Csw> for u32 {
    fn from(raw: Csw) -> Self {
        raw.0
    }
}

impl Register for Csw {
    const ADDRESS: u8 = 0x00;
    const NAME: &'static str = "CSW";
}

/// MEM-AP transfer address register.
pub const TAR: u8 = 0x04;
/// MEM-AP data read/write register.
pub const DRW: u8 = 0x0C;
/// AP identification register (bank 0xF, address 0xC).
pub const AP_IDR: u8 = 0xFC;

/// The MEM-AP giving access to the nRF52 memory map.
pub const MEM_AP: u8 = 0;

/// Nordic CTRL-AP: AP #1, reachable even with APPROTECT enabled.
pub mod ctrl_ap {
    /// APSEL value of the CTRL-AP.
    pub const APSEL: u8 = 1;
    /// Soft reset of the core; write 1 then 0.
    pub const RESET: u8 = 0x00;
    /// Writing 1 starts a chip erase of flash and UICR.
    pub const ERASEALL: u8 = 0x04;
    /// Reads 1 while the erase is in progress.
    pub const ERASEALLSTATUS: u8 = 0x08;
    /// Expected CTRL-AP IDR value on nRF52 parts.
    pub const IDR_VALUE: u32 = 0x0288_0000;
}
