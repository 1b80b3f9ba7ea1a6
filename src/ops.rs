//! The three user-facing operations: backup, erase and restore.
//!
//! Each takes an open [`DapSession`], a progress sink and a cancel token.
//! Operations never retry on their own; recoverable errors are surfaced so
//! the caller can decide to reconnect and re-invoke.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dap::DapSession;
use crate::error::{Error, Result};
use crate::nvmc::{NvmController, FLASH_BASE, UICR_BASE, UICR_SIZE};

/// Where operations report their progress.
///
/// Implemented for any `FnMut(u8, Option<&str>)` closure; percent runs 0–100.
pub trait ProgressSink {
    fn report(&mut self, percent: u8, message: Option<&str>);
}

impl<F: FnMut(u8, Option<&str>)> ProgressSink for F {
    fn report(&mut self, percent: u8, message: Option<&str>) {
        self(percent, message)
    }
}

/// A sink that drops every report.
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _percent: u8, _message: Option<&str>) {}
}

/// Cooperative cancellation flag, checked at every suspension point.
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// The images a backup produces and a restore consumes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackupImage {
    pub flash: Vec<u8>,
    pub uicr: Vec<u8>,
}

#[derive(Clone, Copy, Debug)]
pub struct RestoreOptions {
    /// Read back and compare after writing flash.
    pub verify: bool,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self { verify: true }
    }
}

/// Read all of flash and the UICR into memory.
///
/// Flash size is taken from the FICR, so this works unchanged on 256 and
/// 512 KiB parts. Progress is reported in 10 % steps.
pub fn backup(
    session: &mut DapSession,
    progress: &mut impl ProgressSink,
    cancel: &CancelToken,
) -> Result<BackupImage> {
    let mut nvmc = NvmController::new(session);

    progress.report(0, Some("reading device info"));
    let info = nvmc.read_device_info()?;
    let flash_bytes = info.flash_bytes();
    tracing::info!("backing up {} KiB of flash", info.flash_kb);

    let mut flash = vec![0u8; flash_bytes];
    // 16 KiB read granularity keeps the progress display lively without
    // hurting throughput.
    const READ_CHUNK: usize = 16 * 1024;
    let mut last_decile = 0;
    for (i, chunk) in flash.chunks_mut(READ_CHUNK).enumerate() {
        cancel.check()?;
        let address = FLASH_BASE + (i * READ_CHUNK) as u32;
        let mut words = vec![0u32; chunk.len() / 4];
        nvmc.session().read_block(address, &mut words)?;
        for (bytes, word) in chunk.chunks_mut(4).zip(&words) {
            bytes.copy_from_slice(&word.to_le_bytes());
        }

        let percent = ((i + 1) * READ_CHUNK * 100 / flash_bytes).min(100) as u8;
        if percent / 10 > last_decile {
            last_decile = percent / 10;
            progress.report(percent.min(95), Some("reading flash"));
        }
    }

    cancel.check()?;
    progress.report(95, Some("reading UICR"));
    let uicr = nvmc.read_uicr_binary()?;

    progress.report(100, Some("backup complete"));
    Ok(BackupImage { flash, uicr })
}

/// Unlock and blank the chip via CTRL-AP ERASEALL, then spot-check three
/// well-known words.
///
/// The spot-check is advisory: a failed probe read after a successful erase
/// (the target may still be re-enumerating) logs a warning but does not fail
/// the operation.
pub fn erase(
    session: &mut DapSession,
    progress: &mut impl ProgressSink,
    cancel: &CancelToken,
) -> Result<()> {
    let mut nvmc = NvmController::new(session);

    progress.report(0, Some("erasing chip via CTRL-AP"));
    nvmc.erase_all(cancel)?;
    progress.report(90, Some("checking erase"));

    let probes = [
        ("flash[0x0]", FLASH_BASE),
        ("flash[0x400]", FLASH_BASE + 0x400),
        ("UICR APPROTECT", UICR_BASE + 0x208),
    ];
    let mut all_blank = true;
    for (name, address) in probes {
        match nvmc.session().read_u32(address) {
            Ok(0xFFFF_FFFF) => tracing::debug!("{name} reads 0xFFFFFFFF"),
            Ok(value) => {
                tracing::warn!("{name} reads {value:#010x} after erase");
                all_blank = false;
            }
            Err(e) => {
                tracing::warn!("could not probe {name} after erase: {e}");
                all_blank = false;
            }
        }
    }

    if all_blank {
        progress.report(100, Some("erase complete, chip is blank"));
    } else {
        progress.report(100, Some("erase complete (spot-check inconclusive)"));
    }
    Ok(())
}

/// Write a full flash + UICR image back to the target.
///
/// Assumes the chip was erased beforehand (restore writes without per-page
/// erase). Ends with a best-effort soft reset so the display boots into the
/// restored firmware.
pub fn restore(
    session: &mut DapSession,
    image: &BackupImage,
    options: RestoreOptions,
    progress: &mut impl ProgressSink,
    cancel: &CancelToken,
) -> Result<()> {
    let mut nvmc = NvmController::new(session);

    progress.report(0, Some("checking image sizes"));
    let info = nvmc.read_device_info()?;
    if image.flash.len() != info.flash_bytes() {
        return Err(Error::InvalidData(format!(
            "flash image is {} bytes but the target has {}",
            image.flash.len(),
            info.flash_bytes()
        )));
    }
    if image.uicr.len() != UICR_SIZE {
        return Err(Error::InvalidData(format!(
            "UICR image is {} bytes, expected {UICR_SIZE}",
            image.uicr.len()
        )));
    }

    // Writing takes the 0-70% band, verification 70-90%, UICR the rest.
    let write_band_end = if options.verify { 70 } else { 90 };
    nvmc.write_region(FLASH_BASE, &image.flash, cancel, |written, total| {
        let percent = (written * write_band_end / total) as u8;
        progress.report(percent, Some("writing flash"));
    })?;

    if options.verify {
        tracing::info!("verifying {} bytes of flash", image.flash.len());
        nvmc.verify_region(FLASH_BASE, &image.flash, cancel, |checked, total| {
            let percent = (70 + checked * 20 / total) as u8;
            progress.report(percent, Some("verifying flash"));
        })?;
    }

    progress.report(90, Some("writing UICR"));
    nvmc.write_region(UICR_BASE, &image.uicr, cancel, |_, _| {})?;

    progress.report(95, Some("resetting target"));
    // Soft reset so the display boots the restored firmware: AIRCR first,
    // then the probe's own reset sequence in case the write was lost.
    const AIRCR: u32 = 0xE000_ED0C;
    const AIRCR_SYSRESETREQ: u32 = 0x05FA_0004;
    if let Err(e) = nvmc.session().write_u32(AIRCR, AIRCR_SYSRESETREQ) {
        tracing::debug!("AIRCR reset request failed: {e}");
    }
    nvmc.session().reset_target();

    progress.report(100, Some("restore complete"));
    Ok(())
}

/// Convenience wrapper for `read_info`-style callers: device, UICR and
/// bootloader settings in one call.
pub fn read_target_summary(
    session: &mut DapSession,
) -> Result<(
    crate::device::DeviceInfo,
    crate::device::UicrRegisters,
    Option<crate::settings::BootloaderSettings>,
)> {
    let mut nvmc = NvmController::new(session);
    let info = nvmc.read_device_info()?;
    let uicr = nvmc.read_uicr()?;
    let settings = nvmc.read_bootloader_settings()?;
    Ok((info, uicr, settings))
}
