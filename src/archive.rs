//! The backup archive: a flat ZIP holding `flash.bin`, `uicr.bin` and an
//! advisory `metadata.json`.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::device::DeviceInfo;
use crate::error::{Error, Result};
use crate::ops::BackupImage;

const FLASH_MEMBER: &str = "flash.bin";
const UICR_MEMBER: &str = "uicr.bin";
const METADATA_MEMBER: &str = "metadata.json";

/// Metadata written alongside the images. Restore treats it as advisory:
/// any archive with the two `.bin` members is accepted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    /// RFC 3339 timestamp of when the backup was taken.
    pub timestamp: String,
    pub device: DeviceMetadata,
    pub sizes: SizeMetadata,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceMetadata {
    pub part: String,
    pub variant: String,
    pub package: String,
    pub ram: u32,
    pub flash: u32,
    pub device_id: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SizeMetadata {
    pub flash: usize,
    pub uicr: usize,
}

impl BackupMetadata {
    pub fn new(info: &DeviceInfo, image: &BackupImage, timestamp: String) -> Self {
        Self {
            timestamp,
            device: DeviceMetadata {
                part: format!("nRF{:X}", info.part),
                variant: info.variant_string(),
                package: info.package_string().to_string(),
                ram: info.ram_kb,
                flash: info.flash_kb,
                device_id: format!("{:08X}{:08X}", info.device_id[1], info.device_id[0]),
            },
            sizes: SizeMetadata {
                flash: image.flash.len(),
                uicr: image.uicr.len(),
            },
        }
    }
}

/// Write a backup archive to `path`.
pub fn write_backup_zip(
    path: &Path,
    image: &BackupImage,
    metadata: &BackupMetadata,
) -> Result<()> {
    let file = std::fs::File::create(path)?;
    let mut archive = zip::ZipWriter::new(file);
    let options = zip::write::FileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    archive.start_file(FLASH_MEMBER, options)?;
    archive.write_all(&image.flash)?;

    archive.start_file(UICR_MEMBER, options)?;
    archive.write_all(&image.uicr)?;

    archive.start_file(METADATA_MEMBER, options)?;
    let json = serde_json::to_string_pretty(metadata)?;
    archive.write_all(json.as_bytes())?;

    archive.finish()?;
    tracing::info!("wrote backup archive to {}", path.display());
    Ok(())
}

/// Read a backup archive. `flash.bin` and `uicr.bin` are required;
/// `metadata.json` is returned when present and parseable.
pub fn read_backup_zip(path: &Path) -> Result<(BackupImage, Option<BackupMetadata>)> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    let flash = read_member(&mut archive, FLASH_MEMBER)?;
    let uicr = read_member(&mut archive, UICR_MEMBER)?;

    let metadata = match read_member(&mut archive, METADATA_MEMBER) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                tracing::warn!("ignoring malformed {METADATA_MEMBER}: {e}");
                None
            }
        },
        Err(_) => None,
    };

    Ok((BackupImage { flash, uicr }, metadata))
}

fn read_member(
    archive: &mut zip::ZipArchive<std::fs::File>,
    name: &str,
) -> Result<Vec<u8>> {
    let mut member = archive
        .by_name(name)
        .map_err(|_| Error::InvalidData(format!("archive is missing {name}")))?;
    let mut data = Vec::with_capacity(member.size() as usize);
    member.read_to_end(&mut data)?;
    Ok(data)
}
