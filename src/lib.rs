//! Host-side tooling for the nRF52832-based ebike display: full flash/UICR
//! backup, APPROTECT unlock via CTRL-AP chip erase, restore with
//! verification, and an offline "kitchen" that applies typed patches to
//! firmware dumps.
//!
//! The stack is layered the way the hardware is:
//!
//! * [`probe`]: CMSIS-DAP packet transport over USB (v1 HID or v2 bulk).
//! * [`dap`]: ADIv5 debug-port driver with the connect sequence, DP/AP
//!   register access behind a cached SELECT, sticky-error handling, and the
//!   MEM-AP memory engine.
//! * [`nvmc`]: the nRF52 non-volatile memory controller and the CTRL-AP
//!   ERASEALL recovery path.
//! * [`ops`]: `backup`, `erase` and `restore` orchestration with progress
//!   reporting and cooperative cancellation.
//! * [`device`] and [`settings`]: decoded FICR/UICR records and the
//!   bootloader settings page.
//! * [`archive`] and [`kitchen`]: the backup ZIP format and the pure
//!   image-patching pipeline. Neither touches the probe.
//!
//! ```no_run
//! use displayflash::{DapSession, CancelToken, NoProgress};
//!
//! # fn main() -> displayflash::Result<()> {
//! let mut session = DapSession::open(0x303A, 0x1002)?;
//! session.connect()?;
//! let image = displayflash::backup(&mut session, &mut NoProgress, &CancelToken::new())?;
//! std::fs::write("flash.bin", &image.flash)?;
//! std::fs::write("uicr.bin", &image.uicr)?;
//! # Ok(())
//! # }
//! ```

pub mod archive;
pub mod dap;
pub mod device;
pub mod error;
pub mod kitchen;
pub mod nvmc;
pub mod ops;
pub mod probe;
pub mod settings;

pub use dap::{DapSession, SessionState};
pub use device::{DeviceInfo, UicrRegisters};
pub use error::{Error, Result};
pub use ops::{
    backup, erase, restore, BackupImage, CancelToken, NoProgress, ProgressSink, RestoreOptions,
};
pub use settings::BootloaderSettings;
