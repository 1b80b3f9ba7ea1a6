//! The nRF52 non-volatile memory controller and the CTRL-AP recovery path.

use std::time::{Duration, Instant};

use crate::dap::memory::bytes_to_words;
use crate::dap::registers::ctrl_ap;
use crate::dap::{registers, DapSession};
use crate::device::{ficr, uicr, DeviceInfo, UicrRegisters};
use crate::error::{Error, Result};
use crate::ops::CancelToken;
use crate::settings::{BootloaderSettings, BL_SETTINGS_ADDR, SETTINGS_SIZE};

pub const FLASH_BASE: u32 = 0x0000_0000;
pub const FICR_BASE: u32 = 0x1000_0000;
pub const UICR_BASE: u32 = 0x1000_1000;
pub const UICR_SIZE: usize = 0x400;

pub const NVMC_READY: u32 = 0x4001_E400;
pub const NVMC_CONFIG: u32 = 0x4001_E504;
pub const NVMC_ERASEPAGE: u32 = 0x4001_E508;

/// Flash page size; also the chunk size for writes and the erase granularity.
pub const PAGE_SIZE: usize = 4096;

/// CONFIG values.
const CONFIG_READ_ONLY: u32 = 0;
const CONFIG_WEN: u32 = 1;
const CONFIG_EEN: u32 = 2;

/// Budget for one 4-KiB write chunk, including the READY wait.
const CHUNK_TIMEOUT: Duration = Duration::from_secs(5);
/// Budget for a page erase.
const ERASE_PAGE_TIMEOUT: Duration = Duration::from_secs(5);
/// Total budget for CTRL-AP ERASEALL polling.
const ERASE_ALL_TIMEOUT: Duration = Duration::from_secs(15);
const ERASE_ALL_POLL: Duration = Duration::from_millis(100);

/// Pacing between flash write chunks, giving the NVMC time to settle.
const CHUNK_PACING: Duration = Duration::from_millis(10);

/// Driver for flash, UICR and FICR access on one SWD session.
pub struct NvmController<'probe> {
    session: &'probe mut DapSession,
}

impl<'probe> NvmController<'probe> {
    pub fn new(session: &'probe mut DapSession) -> Self {
        Self { session }
    }

    pub fn session(&mut self) -> &mut DapSession {
        self.session
    }

    /// Snapshot the factory information registers.
    pub fn read_device_info(&mut self) -> Result<DeviceInfo> {
        let read = |s: &mut DapSession, offset: u32| s.read_u32(FICR_BASE + offset);

        let info = DeviceInfo {
            part: read(self.session, ficr::INFO_PART)?,
            variant: read(self.session, ficr::INFO_VARIANT)?,
            package: read(self.session, ficr::INFO_PACKAGE)?,
            ram_kb: read(self.session, ficr::INFO_RAM)?,
            flash_kb: read(self.session, ficr::INFO_FLASH)?,
            device_id: [
                read(self.session, ficr::DEVICEID0)?,
                read(self.session, ficr::DEVICEID1)?,
            ],
            device_addr: [
                read(self.session, ficr::DEVICEADDR0)?,
                read(self.session, ficr::DEVICEADDR1)?,
            ],
            device_addr_type: read(self.session, ficr::DEVICEADDRTYPE)?,
            codepagesize: read(self.session, ficr::CODEPAGESIZE)?,
            codesize: read(self.session, ficr::CODESIZE)?,
        };
        tracing::debug!(
            "FICR: part nRF{:X}, {} KiB flash, {} KiB RAM",
            info.part,
            info.flash_kb,
            info.ram_kb
        );
        Ok(info)
    }

    /// Read the six interpreted UICR registers.
    pub fn read_uicr(&mut self) -> Result<UicrRegisters> {
        let read = |s: &mut DapSession, offset: u32| s.read_u32(UICR_BASE + offset);

        Ok(UicrRegisters {
            pselreset0: read(self.session, uicr::PSELRESET0)?,
            pselreset1: read(self.session, uicr::PSELRESET1)?,
            approtect: read(self.session, uicr::APPROTECT)?,
            nfcpins: read(self.session, uicr::NFCPINS)?,
            nrffw0: read(self.session, uicr::NRFFW0)?,
            nrffw1: read(self.session, uicr::NRFFW1)?,
        })
    }

    /// Read the whole 1-KiB UICR region.
    pub fn read_uicr_binary(&mut self) -> Result<Vec<u8>> {
        self.session.read_bytes(UICR_BASE, UICR_SIZE)
    }

    /// Read and decode the bootloader settings page. An erased page (first
    /// word all ones) yields `None` rather than an error.
    pub fn read_bootloader_settings(&mut self) -> Result<Option<BootloaderSettings>> {
        let bytes = self.session.read_bytes(BL_SETTINGS_ADDR, SETTINGS_SIZE)?;
        if bytes[..4] == [0xFF; 4] {
            return Ok(None);
        }
        let settings = BootloaderSettings::decode(&bytes)?;
        if !settings.crc_valid(&bytes) {
            tracing::warn!(
                "bootloader settings CRC mismatch: stored {:#010x}, computed {:#010x}",
                settings.crc,
                BootloaderSettings::compute_crc(&bytes)
            );
        }
        Ok(Some(settings))
    }

    fn wait_ready(&mut self, deadline: Instant) -> Result<()> {
        loop {
            if self.session.read_u32(NVMC_READY)? & 1 == 1 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn set_config(&mut self, value: u32) -> Result<()> {
        self.session.write_u32(NVMC_CONFIG, value)
    }

    /// Write `data` to flash or UICR starting at `base`, in page-sized
    /// chunks under write-enable. A trailing partial word is padded with
    /// `0xFF`. `on_chunk(written, total)` fires after every chunk.
    pub fn write_region(
        &mut self,
        base: u32,
        data: &[u8],
        cancel: &CancelToken,
        mut on_chunk: impl FnMut(usize, usize),
    ) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        if base % 4 != 0 {
            return Err(Error::InvalidData(format!(
                "write base {base:#010x} is not word aligned"
            )));
        }

        self.set_config(CONFIG_WEN)?;
        let result = self.write_region_inner(base, data, cancel, &mut on_chunk);
        // Leave the NVMC read-only even when the write bailed out.
        let restore = self.set_config(CONFIG_READ_ONLY);
        result?;
        restore.map_err(|e| Error::WriteFailed(format!("could not re-lock NVMC: {e}")))
    }

    fn write_region_inner(
        &mut self,
        base: u32,
        data: &[u8],
        cancel: &CancelToken,
        on_chunk: &mut impl FnMut(usize, usize),
    ) -> Result<()> {
        let total = data.len();
        let mut written = 0usize;

        for chunk in data.chunks(PAGE_SIZE) {
            cancel.check()?;

            let deadline = Instant::now() + CHUNK_TIMEOUT;
            self.wait_ready(deadline)?;

            let words = bytes_to_words(chunk);
            self.session
                .write_block(base + written as u32, &words)
                .map_err(|e| match e {
                    e if e.is_recoverable() => e,
                    e => Error::WriteFailed(e.to_string()),
                })?;

            written += chunk.len();
            on_chunk(written, total);
            std::thread::sleep(CHUNK_PACING);
        }

        let deadline = Instant::now() + CHUNK_TIMEOUT;
        self.wait_ready(deadline)
    }

    /// Erase one 4-KiB flash page.
    pub fn erase_page(&mut self, address: u32) -> Result<()> {
        if address as usize % PAGE_SIZE != 0 {
            return Err(Error::InvalidData(format!(
                "{address:#010x} is not a page boundary"
            )));
        }
        self.set_config(CONFIG_EEN)?;
        let deadline = Instant::now() + ERASE_PAGE_TIMEOUT;
        let result = self
            .session
            .write_u32(NVMC_ERASEPAGE, address)
            .and_then(|()| self.wait_ready(deadline));
        let restore = self.set_config(CONFIG_READ_ONLY);
        result?;
        restore
    }

    /// Compare flash against `expected`, counting mismatched words. The
    /// first few mismatches are logged with their absolute addresses.
    pub fn verify_region(
        &mut self,
        base: u32,
        expected: &[u8],
        cancel: &CancelToken,
        mut on_chunk: impl FnMut(usize, usize),
    ) -> Result<()> {
        let expected_words = bytes_to_words(expected);
        let total = expected_words.len();
        let mut mismatches = 0usize;
        let mut checked = 0usize;

        for chunk in expected_words.chunks(PAGE_SIZE / 4) {
            cancel.check()?;

            let address = base + (checked * 4) as u32;
            let mut readback = vec![0u32; chunk.len()];
            self.session.read_block(address, &mut readback)?;

            for (i, (got, want)) in readback.iter().zip(chunk).enumerate() {
                if got != want {
                    if mismatches < 5 {
                        tracing::warn!(
                            "verify mismatch at {:#010x}: wrote {:#010x}, read {:#010x}",
                            address + (i * 4) as u32,
                            want,
                            got
                        );
                    }
                    mismatches += 1;
                }
            }

            checked += chunk.len();
            on_chunk(checked, total);
        }

        if mismatches != 0 {
            return Err(Error::VerifyFailed { mismatches });
        }
        Ok(())
    }

    /// Erase all flash and UICR through the CTRL-AP, clearing APPROTECT.
    ///
    /// This works even when the MEM-AP is locked out. Polls every 100 ms
    /// within a 15 s budget; a target that answers but never finishes is
    /// `ERASE_FAILED`, a target that never answers is `TIMEOUT`.
    pub fn erase_all(&mut self, cancel: &CancelToken) -> Result<()> {
        self.session.clear_errors()?;

        let idr = self.session.read_ctrl_ap_idr()?;
        if idr != ctrl_ap::IDR_VALUE {
            tracing::warn!(
                "unexpected CTRL-AP IDR {:#010x} (expected {:#010x}), continuing anyway",
                idr,
                ctrl_ap::IDR_VALUE
            );
        }

        tracing::info!("starting chip erase via CTRL-AP");
        self.session.write_ap(ctrl_ap::APSEL, ctrl_ap::ERASEALL, 0)?;
        self.session.write_ap(ctrl_ap::APSEL, ctrl_ap::ERASEALL, 1)?;

        let deadline = Instant::now() + ERASE_ALL_TIMEOUT;
        let mut last_error: Option<Error> = None;
        let done = loop {
            cancel.check()?;
            match self.session.read_ap(ctrl_ap::APSEL, ctrl_ap::ERASEALLSTATUS) {
                Ok(0) => break true,
                Ok(_) => last_error = None,
                // An unlocking erase resets the debug interface underneath
                // us; transient poll failures are expected.
                Err(e) => {
                    tracing::debug!("ERASEALLSTATUS poll failed: {e}");
                    last_error = Some(e);
                }
            }
            if Instant::now() >= deadline {
                break false;
            }
            std::thread::sleep(ERASE_ALL_POLL);
        };

        if !done {
            return match last_error {
                // The target answered; the erase itself is stuck.
                None => Err(Error::EraseFailed),
                Some(_) => Err(Error::Timeout),
            };
        }

        // Reset pulse and ERASEALL re-arm are best-effort: the erase has
        // already succeeded and some targets drop off the bus here.
        if let Err(e) = self
            .session
            .write_ap(ctrl_ap::APSEL, ctrl_ap::RESET, 1)
            .and_then(|()| self.session.write_ap(ctrl_ap::APSEL, ctrl_ap::RESET, 0))
        {
            tracing::warn!("post-erase reset pulse failed: {e}");
        }
        if let Err(e) = self.session.write_ap(ctrl_ap::APSEL, ctrl_ap::ERASEALL, 0) {
            tracing::warn!("could not re-arm ERASEALL register: {e}");
        }

        let _ = self.session.clear_errors();
        // Route subsequent accesses back to the MEM-AP. The reset pulse also
        // cleared the target's CSW, so the cached value is stale.
        self.session.select_ap_bank(registers::MEM_AP, 0)?;
        self.session.csw = None;

        // Give the target time to re-enumerate its debug interface.
        std::thread::sleep(Duration::from_secs(1));
        tracing::info!("chip erase complete");
        Ok(())
    }
}
