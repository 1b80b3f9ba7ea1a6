//! Backup, erase and restore CLI for the display.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use displayflash::archive::{read_backup_zip, write_backup_zip, BackupMetadata};
use displayflash::nvmc::NvmController;
use displayflash::ops::read_target_summary;
use displayflash::probe::{list_probes, DEFAULT_PID, DEFAULT_VID};
use displayflash::{
    backup, erase, restore, BackupImage, CancelToken, DapSession, Error, ProgressSink,
    RestoreOptions,
};

/// How often a recoverable failure is retried before giving up.
const RECOVERY_ATTEMPTS: usize = 3;
const RECOVERY_PAUSE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "displayflash", version, about = "nRF52 display backup/restore over CMSIS-DAP")]
struct Cli {
    /// Probe USB vendor id (hex), when not using the built-in probe identity.
    #[arg(long, value_parser = parse_hex_u16)]
    vid: Option<u16>,
    /// Probe USB product id (hex).
    #[arg(long, value_parser = parse_hex_u16)]
    pid: Option<u16>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print device, UICR and bootloader-settings information.
    ReadInfo,
    /// Read flash and UICR into <dir>/flash.bin and <dir>/uicr.bin.
    Backup {
        dir: PathBuf,
        /// Additionally write a backup.zip archive with metadata.
        #[arg(long)]
        zip: bool,
    },
    /// Erase the whole chip (flash + UICR) via CTRL-AP, clearing APPROTECT.
    Erase,
    /// Write a previous backup back to the target.
    Restore {
        /// Either a flash.bin (with a uicr.bin argument) or a backup.zip.
        flash: PathBuf,
        /// uicr.bin; omitted when restoring from an archive.
        uicr: Option<PathBuf>,
        /// Skip the post-write readback comparison.
        #[arg(long)]
        no_verify: bool,
    },
    /// Experiments; lists matching probes.
    Dev,
}

fn parse_hex_u16(input: &str) -> Result<u16, String> {
    let digits = input
        .strip_prefix("0x")
        .or_else(|| input.strip_prefix("0X"))
        .unwrap_or(input);
    u16::from_str_radix(digits, 16).map_err(|e| e.to_string())
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let vid = cli.vid.unwrap_or(DEFAULT_VID);
    let pid = cli.pid.unwrap_or(DEFAULT_PID);

    match cli.command {
        Command::ReadInfo => {
            let mut session = open_session(vid, pid)?;
            let (info, uicr, settings) = read_target_summary(&mut session)?;
            println!("{info}");
            println!();
            println!("{uicr}");
            println!();
            match settings {
                Some(settings) => println!("{settings}"),
                None => println!("Bootloader settings page is erased"),
            }
            session.disconnect();
            Ok(())
        }
        Command::Backup { dir, zip } => {
            std::fs::create_dir_all(&dir)
                .with_context(|| format!("creating {}", dir.display()))?;

            let mut session = open_session(vid, pid)?;
            let cancel = cancel_on_ctrlc();
            let image = with_recovery(&mut session, &cancel, "backup", |session, cancel| {
                let bar = operation_bar("backing up");
                let mut progress = bar_sink(&bar);
                let result = backup(session, &mut progress, cancel);
                bar.finish_and_clear();
                result
            })?;

            std::fs::write(dir.join("flash.bin"), &image.flash)?;
            std::fs::write(dir.join("uicr.bin"), &image.uicr)?;
            println!(
                "Wrote {} ({} bytes) and {} ({} bytes)",
                dir.join("flash.bin").display(),
                image.flash.len(),
                dir.join("uicr.bin").display(),
                image.uicr.len()
            );

            if zip {
                let mut nvmc = NvmController::new(&mut session);
                let info = nvmc.read_device_info()?;
                let metadata =
                    BackupMetadata::new(&info, &image, chrono::Utc::now().to_rfc3339());
                let path = dir.join("backup.zip");
                write_backup_zip(&path, &image, &metadata)?;
                println!("Wrote {}", path.display());
            }
            session.disconnect();
            Ok(())
        }
        Command::Erase => {
            let mut session = open_session(vid, pid)?;
            let cancel = cancel_on_ctrlc();
            with_recovery(&mut session, &cancel, "erase", |session, cancel| {
                let bar = operation_bar("erasing");
                let mut progress = bar_sink(&bar);
                let result = erase(session, &mut progress, cancel);
                bar.finish_and_clear();
                result
            })?;
            println!("Chip erased; APPROTECT is clear.");
            session.disconnect();
            Ok(())
        }
        Command::Restore {
            flash,
            uicr,
            no_verify,
        } => {
            let image = load_restore_image(&flash, uicr.as_deref())?;
            let options = RestoreOptions {
                verify: !no_verify,
            };

            let mut session = open_session(vid, pid)?;
            let cancel = cancel_on_ctrlc();
            with_recovery(&mut session, &cancel, "restore", |session, cancel| {
                let bar = operation_bar("restoring");
                let mut progress = bar_sink(&bar);
                let result = restore(session, &image, options, &mut progress, cancel);
                bar.finish_and_clear();
                result
            })?;
            println!("Restore complete.");
            session.disconnect();
            Ok(())
        }
        Command::Dev => {
            let probes = list_probes(vid, pid);
            if probes.is_empty() {
                println!("No probes matching {vid:04x}:{pid:04x}");
            }
            for probe in probes {
                println!("{probe}");
            }
            Ok(())
        }
    }
}

fn open_session(vid: u16, pid: u16) -> anyhow::Result<DapSession> {
    let mut session = DapSession::open(vid, pid)
        .with_context(|| format!("opening probe {vid:04x}:{pid:04x}"))?;
    session.connect().context("connecting to target")?;
    Ok(session)
}

/// Run `operation`, and on a recoverable error reconnect and retry a couple
/// of times. Non-recoverable errors surface immediately.
fn with_recovery<T>(
    session: &mut DapSession,
    cancel: &CancelToken,
    name: &str,
    mut operation: impl FnMut(&mut DapSession, &CancelToken) -> Result<T, Error>,
) -> anyhow::Result<T> {
    let mut attempt = 0;
    loop {
        match operation(session, cancel) {
            Ok(value) => return Ok(value),
            Err(e) if e.is_recoverable() && attempt + 1 < RECOVERY_ATTEMPTS => {
                attempt += 1;
                eprintln!(
                    "{name} hit a recoverable error ({e}); reconnecting (attempt {}/{})",
                    attempt + 1,
                    RECOVERY_ATTEMPTS
                );
                session.disconnect();
                std::thread::sleep(RECOVERY_PAUSE);
                session.connect().context("reconnecting to target")?;
            }
            Err(e) => return Err(e.into()),
        }
    }
}

fn load_restore_image(
    flash: &std::path::Path,
    uicr: Option<&std::path::Path>,
) -> anyhow::Result<BackupImage> {
    if flash.extension().is_some_and(|ext| ext == "zip") {
        let (image, metadata) = read_backup_zip(flash)?;
        if let Some(metadata) = metadata {
            println!(
                "Restoring backup of {} taken {}",
                metadata.device.part, metadata.timestamp
            );
        }
        return Ok(image);
    }

    let uicr = uicr.context("restore needs <flash.bin> <uicr.bin>, or a single backup.zip")?;
    Ok(BackupImage {
        flash: std::fs::read(flash).with_context(|| format!("reading {}", flash.display()))?,
        uicr: std::fs::read(uicr).with_context(|| format!("reading {}", uicr.display()))?,
    })
}

fn operation_bar(message: &'static str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::with_template("{msg:12} [{bar:40}] {pos:>3}% {prefix}")
            .expect("static template is valid")
            .progress_chars("=> "),
    );
    bar.set_message(message);
    bar
}

/// Adapt an indicatif bar to the library's progress sink.
fn bar_sink(bar: &ProgressBar) -> impl ProgressSink + '_ {
    move |percent: u8, message: Option<&str>| {
        bar.set_position(percent as u64);
        if let Some(message) = message {
            bar.set_prefix(message.to_string());
        }
    }
}

/// Cancel the running operation on Ctrl-C. The operation notices at its next
/// suspension point and unwinds through the session-close path.
fn cancel_on_ctrlc() -> CancelToken {
    let cancel = CancelToken::new();
    let token = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || token.cancel()) {
        tracing::debug!("could not install Ctrl-C handler: {e}");
    }
    cancel
}
