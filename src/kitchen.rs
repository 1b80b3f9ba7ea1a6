//! The firmware kitchen: deterministic patching of a raw flash image.
//!
//! A patch file describes a set of typed edits against a known firmware
//! dump. Every patch carries the expected original content; the whole run
//! aborts before the first write if anything does not match. After patching,
//! the application CRC and the bootloader-settings CRC are recomputed so the
//! DFU bootloader accepts the modified image.
//!
//! Endianness convention: the image itself and the two CRC slots are
//! little-endian, but the `u16`/`u32` patch constants are written the way
//! they appear in a hex viewer, i.e. big-endian at the byte level ("bytes
//! `01 23`" is authored as `0x0123`). This is deliberate so patches can be
//! transcribed verbatim from a hex dump; do not "fix" it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};
use crate::settings::{
    crc32, BootloaderSettings, APP_START, BANK0_CRC_OFFSET, BL_SETTINGS_ADDR, SETTINGS_SIZE,
};

/// Accept `291`, `"0x123"` or `"291"` for addresses and patch constants.
fn de_u32<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u32, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u32),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(value) => Ok(value),
        Raw::Text(text) => {
            let text = text.trim();
            let (digits, radix) = match text.strip_prefix("0x").or(text.strip_prefix("0X")) {
                Some(hex) => (hex, 16),
                None => (text, 10),
            };
            u32::from_str_radix(digits, radix)
                .map_err(|_| D::Error::custom(format!("invalid number '{text}'")))
        }
    }
}

/// Accept byte arrays either as JSON arrays or as whitespace-separated hex
/// strings (`"DE AD BE EF"`), which is how public keys end up in patch files.
fn de_bytes<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Array(Vec<u8>),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Array(bytes) => Ok(bytes),
        Raw::Text(text) => text
            .split_whitespace()
            .map(|pair| {
                u8::from_str_radix(pair, 16)
                    .map_err(|_| D::Error::custom(format!("invalid hex byte '{pair}'")))
            })
            .collect(),
    }
}

/// End of a clean region: either an absolute offset or the end of the
/// application image as recorded in the bootloader settings.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RegionEnd {
    Offset(u32),
    AppEnd,
}

impl<'de> Deserialize<'de> for RegionEnd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }
        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(RegionEnd::Offset(value)),
            Raw::Text(text) if text == "APP_END" => Ok(RegionEnd::AppEnd),
            Raw::Text(text) => {
                let digits = text
                    .strip_prefix("0x")
                    .or(text.strip_prefix("0X"))
                    .ok_or_else(|| D::Error::custom(format!("invalid region end '{text}'")))?;
                u32::from_str_radix(digits, 16)
                    .map(RegionEnd::Offset)
                    .map_err(|_| D::Error::custom(format!("invalid region end '{text}'")))
            }
        }
    }
}

/// A half-open byte range to carry over from the dirty dump into the
/// 0xFF-filled clean image.
#[derive(Clone, Debug, Deserialize)]
pub struct CleanRegion {
    #[serde(deserialize_with = "de_u32")]
    pub start: u32,
    pub end: RegionEnd,
    #[serde(default)]
    pub description: String,
}

/// One typed edit. Every variant verifies its `original` before anything is
/// written.
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Patch {
    /// ASCII bytes at a fixed address.
    String {
        #[serde(deserialize_with = "de_u32")]
        address: u32,
        original: String,
        data: String,
        #[serde(default)]
        description: String,
    },
    U8 {
        #[serde(deserialize_with = "de_u32")]
        address: u32,
        #[serde(deserialize_with = "de_u32")]
        original: u32,
        #[serde(deserialize_with = "de_u32")]
        data: u32,
        #[serde(default)]
        description: String,
    },
    /// Hex-viewer byte order: `0x0123` is the byte sequence `01 23`.
    U16 {
        #[serde(deserialize_with = "de_u32")]
        address: u32,
        #[serde(deserialize_with = "de_u32")]
        original: u32,
        #[serde(deserialize_with = "de_u32")]
        data: u32,
        #[serde(default)]
        description: String,
    },
    /// Hex-viewer byte order, like [`Patch::U16`].
    U32 {
        #[serde(deserialize_with = "de_u32")]
        address: u32,
        #[serde(deserialize_with = "de_u32")]
        original: u32,
        #[serde(deserialize_with = "de_u32")]
        data: u32,
        #[serde(default)]
        description: String,
    },
    Bytes {
        #[serde(deserialize_with = "de_u32")]
        address: u32,
        #[serde(deserialize_with = "de_bytes")]
        original: Vec<u8>,
        #[serde(deserialize_with = "de_bytes")]
        data: Vec<u8>,
        #[serde(default)]
        description: String,
    },
    /// Replace a unique byte pattern wherever it lives. The needle must
    /// occur exactly once and the replacement must have the same length.
    FindReplace {
        #[serde(deserialize_with = "de_bytes")]
        find: Vec<u8>,
        #[serde(deserialize_with = "de_bytes")]
        replace: Vec<u8>,
        #[serde(default)]
        description: String,
    },
}

impl Patch {
    fn description(&self) -> &str {
        match self {
            Patch::String { description, .. }
            | Patch::U8 { description, .. }
            | Patch::U16 { description, .. }
            | Patch::U32 { description, .. }
            | Patch::Bytes { description, .. }
            | Patch::FindReplace { description, .. } => description,
        }
    }
}

impl fmt::Display for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Patch::String { address, data, .. } => {
                write!(f, "string \"{data}\" at {address:#x}")
            }
            Patch::U8 { address, data, .. } => write!(f, "u8 {data:#04x} at {address:#x}"),
            Patch::U16 { address, data, .. } => write!(f, "u16 {data:#06x} at {address:#x}"),
            Patch::U32 { address, data, .. } => write!(f, "u32 {data:#010x} at {address:#x}"),
            Patch::Bytes { address, data, .. } => {
                write!(f, "{} bytes at {address:#x}", data.len())
            }
            Patch::FindReplace { find, .. } => {
                write!(f, "find/replace of {} bytes", find.len())
            }
        }
    }
}

/// A complete patch recipe for one firmware build.
#[derive(Clone, Debug, Deserialize)]
pub struct PatchFile {
    pub name: String,
    /// Path of the flash image, relative to the patch file.
    pub firmware_path: String,
    /// Appended to the image's base name to form the output file name.
    pub output_postfix: String,
    #[serde(default)]
    pub clean_regions: Vec<CleanRegion>,
    pub patches: Vec<Patch>,
}

impl PatchFile {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// The big-endian-on-disk width of a numeric patch.
fn be_bytes(value: u32, width: usize) -> Vec<u8> {
    value.to_be_bytes()[4 - width..].to_vec()
}

fn slice_at<'i>(image: &'i [u8], address: u32, len: usize, what: &str) -> Result<&'i [u8]> {
    let start = address as usize;
    let end = start
        .checked_add(len)
        .filter(|&end| end <= image.len())
        .ok_or_else(|| {
            Error::InvalidData(format!(
                "{what} at {address:#x}+{len} reaches past the {}-byte image",
                image.len()
            ))
        })?;
    Ok(&image[start..end])
}

fn find_unique(image: &[u8], needle: &[u8]) -> Result<usize> {
    if needle.is_empty() {
        return Err(Error::InvalidData("find pattern is empty".into()));
    }
    let mut positions = image
        .windows(needle.len())
        .enumerate()
        .filter(|(_, window)| *window == needle)
        .map(|(offset, _)| offset);

    let first = positions.next().ok_or_else(|| {
        Error::InvalidData("find pattern does not occur in the image".into())
    })?;
    if let Some(second) = positions.next() {
        return Err(Error::InvalidData(format!(
            "find pattern occurs more than once (offsets {first:#x} and {second:#x})"
        )));
    }
    Ok(first)
}

/// A patch whose target offset and byte content have been resolved and
/// verified against the image.
struct VerifiedPatch {
    offset: usize,
    data: Vec<u8>,
}

fn verify_patch(image: &[u8], patch: &Patch) -> Result<VerifiedPatch> {
    let mismatch = |address: u32, expected: &[u8], actual: &[u8]| {
        Error::InvalidData(format!(
            "patch verify failed at {address:#x}: expected {expected:02X?}, found {actual:02X?}"
        ))
    };

    match patch {
        Patch::String {
            address,
            original,
            data,
            ..
        } => {
            if original.len() != data.len() {
                return Err(Error::InvalidData(format!(
                    "string patch at {address:#x} changes length ({} -> {})",
                    original.len(),
                    data.len()
                )));
            }
            let actual = slice_at(image, *address, original.len(), "string patch")?;
            if actual != original.as_bytes() {
                return Err(mismatch(*address, original.as_bytes(), actual));
            }
            Ok(VerifiedPatch {
                offset: *address as usize,
                data: data.as_bytes().to_vec(),
            })
        }
        Patch::U8 {
            address,
            original,
            data,
            ..
        } => {
            let expected = be_bytes(*original, 1);
            let actual = slice_at(image, *address, 1, "u8 patch")?;
            if actual != expected {
                return Err(mismatch(*address, &expected, actual));
            }
            Ok(VerifiedPatch {
                offset: *address as usize,
                data: be_bytes(*data, 1),
            })
        }
        Patch::U16 {
            address,
            original,
            data,
            ..
        } => {
            let expected = be_bytes(*original, 2);
            let actual = slice_at(image, *address, 2, "u16 patch")?;
            if actual != expected {
                return Err(mismatch(*address, &expected, actual));
            }
            Ok(VerifiedPatch {
                offset: *address as usize,
                data: be_bytes(*data, 2),
            })
        }
        Patch::U32 {
            address,
            original,
            data,
            ..
        } => {
            let expected = be_bytes(*original, 4);
            let actual = slice_at(image, *address, 4, "u32 patch")?;
            if actual != expected {
                return Err(mismatch(*address, &expected, actual));
            }
            Ok(VerifiedPatch {
                offset: *address as usize,
                data: be_bytes(*data, 4),
            })
        }
        Patch::Bytes {
            address,
            original,
            data,
            ..
        } => {
            if original.len() != data.len() {
                return Err(Error::InvalidData(format!(
                    "bytes patch at {address:#x} changes length ({} -> {})",
                    original.len(),
                    data.len()
                )));
            }
            let actual = slice_at(image, *address, original.len(), "bytes patch")?;
            if actual != original.as_slice() {
                return Err(mismatch(*address, original, actual));
            }
            Ok(VerifiedPatch {
                offset: *address as usize,
                data: data.clone(),
            })
        }
        Patch::FindReplace { find, replace, .. } => {
            if find.len() != replace.len() {
                return Err(Error::InvalidData(format!(
                    "find/replace length mismatch ({} vs {})",
                    find.len(),
                    replace.len()
                )));
            }
            let offset = find_unique(image, find)?;
            tracing::info!("find pattern located at offset {offset:#x}");
            Ok(VerifiedPatch {
                offset,
                data: replace.clone(),
            })
        }
    }
}

/// Run the whole kitchen pipeline over `image`, returning the new image.
///
/// No partial output exists: every patch is verified before the first byte
/// is written.
pub fn apply(file: &PatchFile, image: &[u8]) -> Result<Vec<u8>> {
    let settings_end = BL_SETTINGS_ADDR as usize + SETTINGS_SIZE;
    if image.len() < settings_end {
        return Err(Error::InvalidData(format!(
            "image is {} bytes; the settings page ends at {settings_end:#x}",
            image.len()
        )));
    }

    let settings_page = &image[BL_SETTINGS_ADDR as usize..settings_end];
    let settings = BootloaderSettings::decode(settings_page)?;
    let app_size = if settings.bank0.image_size != 0 {
        settings.bank0.image_size
    } else {
        // Unused bank 0 is legal; fall back to scanning both banks.
        let derived = settings.app_size().unwrap_or(0);
        tracing::warn!("bank 0 is empty, derived app size {derived:#x} from bank scan");
        derived
    };
    let app_end = APP_START + app_size;
    tracing::debug!("application image spans {APP_START:#x}..{app_end:#x}");

    // Region clean: start from erased flash and copy over the wanted ranges,
    // later regions winning on overlap.
    let mut working = if file.clean_regions.is_empty() {
        image.to_vec()
    } else {
        let mut clean = vec![0xFF_u8; image.len()];
        for region in &file.clean_regions {
            let end = match region.end {
                RegionEnd::Offset(end) => end,
                RegionEnd::AppEnd => app_end,
            };
            if end < region.start || end as usize > image.len() {
                return Err(Error::InvalidData(format!(
                    "clean region {:#x}..{end:#x} does not fit the image",
                    region.start
                )));
            }
            tracing::debug!(
                "keeping {:#x}..{end:#x} ({})",
                region.start,
                region.description
            );
            let range = region.start as usize..end as usize;
            clean[range.clone()].copy_from_slice(&image[range]);
        }
        clean
    };

    // Sanity check the incoming app image against its recorded CRC.
    let app_range = APP_START as usize..app_end as usize;
    let original_crc = crc32(&working[app_range.clone()]);
    if original_crc != settings.bank0.image_crc {
        tracing::warn!(
            "input app CRC {original_crc:#010x} does not match settings ({:#010x})",
            settings.bank0.image_crc
        );
    }

    // Verify everything up front; only then write.
    let mut verified = Vec::with_capacity(file.patches.len());
    for patch in &file.patches {
        tracing::info!("verifying {patch}: {}", patch.description());
        verified.push(verify_patch(&working, patch)?);
    }
    for (patch, resolved) in file.patches.iter().zip(&verified) {
        tracing::info!("applying {patch}");
        working[resolved.offset..resolved.offset + resolved.data.len()]
            .copy_from_slice(&resolved.data);
    }

    // Repair the app CRC, then the settings CRC that covers it.
    let new_app_crc = crc32(&working[app_range]);
    let crc_slot = BL_SETTINGS_ADDR as usize + BANK0_CRC_OFFSET;
    working[crc_slot..crc_slot + 4].copy_from_slice(&new_app_crc.to_le_bytes());
    tracing::info!("new app CRC {new_app_crc:#010x}");

    let settings_base = BL_SETTINGS_ADDR as usize;
    let new_settings_crc = crc32(&working[settings_base + 4..settings_base + SETTINGS_SIZE]);
    working[settings_base..settings_base + 4].copy_from_slice(&new_settings_crc.to_le_bytes());
    tracing::info!("new settings CRC {new_settings_crc:#010x}");

    Ok(working)
}

/// Derive the output path: the input's directory and base name with the
/// postfix appended, always `.bin`.
pub fn output_path(firmware: &Path, postfix: &str) -> PathBuf {
    let stem = firmware
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    firmware.with_file_name(format!("{stem}{postfix}.bin"))
}

/// Load a patch file, run it over its firmware image and write the result
/// next to the input. Returns the output path.
pub fn run(patch_path: &Path) -> Result<PathBuf> {
    let json = std::fs::read_to_string(patch_path)?;
    let file = PatchFile::from_json(&json)?;
    tracing::info!("cooking \"{}\" ({} patches)", file.name, file.patches.len());

    let root = patch_path.parent().unwrap_or(Path::new("."));
    let firmware = root.join(&file.firmware_path);
    let image = std::fs::read(&firmware)?;

    let output = apply(&file, &image)?;

    let out_path = output_path(&firmware, &file.output_postfix);
    std::fs::write(&out_path, output)?;
    tracing::info!("wrote {}", out_path.display());
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{DfuBank, BANK_VALID_APP};

    const IMAGE_SIZE: usize = 0x8_0000;
    const APP_SIZE: u32 = 0x4000;

    /// A synthetic 512-KiB dump with a valid settings page, an app image
    /// containing the marker strings the tests patch, and noise elsewhere.
    fn test_image() -> Vec<u8> {
        let mut image = vec![0xFF_u8; IMAGE_SIZE];

        // Deterministic app content.
        for i in 0..APP_SIZE as usize {
            image[APP_START as usize + i] = (i * 7 % 253) as u8;
        }
        image[0x23A00..0x23A08].copy_from_slice(b"versions");
        image[0x2440C..0x2440E].copy_from_slice(&[0x23, 0x01]);

        // Some junk outside every clean region.
        image[0x60000..0x60004].copy_from_slice(&[1, 2, 3, 4]);

        let mut settings = BootloaderSettings {
            settings_version: 1,
            app_version: 6,
            bank0: DfuBank {
                image_size: APP_SIZE,
                image_crc: 0,
                bank_code: BANK_VALID_APP,
            },
            sd_size: APP_START,
            ..Default::default()
        };
        settings.bank0.image_crc =
            crc32(&image[APP_START as usize..(APP_START + APP_SIZE) as usize]);
        let mut page = settings.encode();
        let crc = BootloaderSettings::compute_crc(&page);
        page[..4].copy_from_slice(&crc.to_le_bytes());
        image[BL_SETTINGS_ADDR as usize..BL_SETTINGS_ADDR as usize + SETTINGS_SIZE]
            .copy_from_slice(&page);

        image
    }

    fn two_patch_file() -> PatchFile {
        PatchFile::from_json(
            r#"{
                "name": "nrf-6-221122-0",
                "firmware_path": "nrf-6-221122-0.bin",
                "output_postfix": "-patched",
                "patches": [
                    {
                        "type": "string",
                        "address": "0x23A00",
                        "original": "versions",
                        "data": "versionz",
                        "description": "rename version tag"
                    },
                    {
                        "type": "u16",
                        "address": "0x2440C",
                        "original": "0x2301",
                        "data": "0x2303",
                        "description": "bump display model"
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn two_patch_set_applies_and_repairs_crcs() {
        let image = test_image();
        let output = apply(&two_patch_file(), &image).unwrap();

        assert_eq!(&output[0x23A00..0x23A08], b"versionz");
        assert_eq!(&output[0x2440C..0x2440E], &[0x23, 0x03]);

        // App CRC slot holds the CRC of the patched app region.
        let app_crc = crc32(&output[APP_START as usize..(APP_START + APP_SIZE) as usize]);
        let slot = BL_SETTINGS_ADDR as usize + BANK0_CRC_OFFSET;
        assert_eq!(&output[slot..slot + 4], &app_crc.to_le_bytes());

        // Settings CRC covers bytes [4..92) of the page.
        let base = BL_SETTINGS_ADDR as usize;
        let settings_crc = crc32(&output[base + 4..base + SETTINGS_SIZE]);
        assert_eq!(&output[base..base + 4], &settings_crc.to_le_bytes());
    }

    #[test]
    fn rerunning_the_same_patches_fails_verification() {
        let image = test_image();
        let output = apply(&two_patch_file(), &image).unwrap();
        assert!(matches!(
            apply(&two_patch_file(), &output),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn failed_verify_aborts_before_any_write() {
        let mut file = two_patch_file();
        // Make the second patch fail; the first must not be applied.
        if let Patch::U16 { original, .. } = &mut file.patches[1] {
            *original = 0x9999;
        }
        let image = test_image();
        assert!(apply(&file, &image).is_err());
        // The caller's image is untouched by design (apply is pure), and a
        // fresh run with the corrected file still verifies.
        assert_eq!(&image[0x23A00..0x23A08], b"versions");
        assert!(apply(&two_patch_file(), &image).is_ok());
    }

    #[test]
    fn clean_regions_reset_everything_outside() {
        let mut file = two_patch_file();
        file.clean_regions = vec![
            CleanRegion {
                start: 0,
                end: RegionEnd::Offset(APP_START),
                description: "softdevice".into(),
            },
            CleanRegion {
                start: APP_START,
                end: RegionEnd::AppEnd,
                description: "application".into(),
            },
            CleanRegion {
                start: 0x73000,
                end: RegionEnd::Offset(0x80000),
                description: "bootloader + settings".into(),
            },
        ];
        let image = test_image();
        let output = apply(&file, &image).unwrap();

        // Junk outside the regions is gone, app content survives.
        assert_eq!(&output[0x60000..0x60004], &[0xFF; 4]);
        assert_eq!(&output[0x23A00..0x23A08], b"versionz");
    }

    #[test]
    fn find_replace_needs_exactly_one_occurrence() {
        let mut image = test_image();
        let key: Vec<u8> = (0..64u8).map(|i| i.wrapping_mul(37)).collect();
        image[0x30000..0x30040].copy_from_slice(&key);

        let patch = Patch::FindReplace {
            find: key.clone(),
            replace: vec![0xEE; 64],
            description: "swap DFU public key".into(),
        };
        let file = PatchFile {
            name: "key swap".into(),
            firmware_path: "x.bin".into(),
            output_postfix: "-key".into(),
            clean_regions: Vec::new(),
            patches: vec![patch],
        };

        let output = apply(&file, &image).unwrap();
        assert_eq!(&output[0x30000..0x30040], &[0xEE; 64][..]);

        // A second copy of the needle must fail the whole run.
        image[0x40000..0x40040].copy_from_slice(&key);
        assert!(matches!(apply(&file, &image), Err(Error::InvalidData(_))));

        // Zero occurrences fail too.
        let absent = PatchFile {
            patches: vec![Patch::FindReplace {
                find: vec![0xDE, 0xAD, 0xBE, 0xEF, 0x99],
                replace: vec![0; 5],
                description: String::new(),
            }],
            ..file
        };
        assert!(matches!(
            apply(&absent, &test_image()),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn find_replace_length_mismatch_is_rejected() {
        let file = PatchFile {
            name: "bad".into(),
            firmware_path: "x.bin".into(),
            output_postfix: "-bad".into(),
            clean_regions: Vec::new(),
            patches: vec![Patch::FindReplace {
                find: vec![1, 2, 3],
                replace: vec![1, 2],
                description: String::new(),
            }],
        };
        assert!(matches!(
            apply(&file, &test_image()),
            Err(Error::InvalidData(_))
        ));
    }

    #[test]
    fn numeric_patches_use_hex_viewer_byte_order() {
        let mut image = test_image();
        image[0x25000..0x25004].copy_from_slice(&[0xAA, 0xBB, 0xCC, 0xDD]);

        let file = PatchFile {
            name: "be".into(),
            firmware_path: "x.bin".into(),
            output_postfix: "-be".into(),
            clean_regions: Vec::new(),
            patches: vec![Patch::U32 {
                address: 0x25000,
                original: 0xAABBCCDD,
                data: 0x11223344,
                description: String::new(),
            }],
        };
        let output = apply(&file, &image).unwrap();
        assert_eq!(&output[0x25000..0x25004], &[0x11, 0x22, 0x33, 0x44]);
    }

    #[test]
    fn bytes_are_parsed_from_hex_strings() {
        let file = PatchFile::from_json(
            r#"{
                "name": "hex",
                "firmware_path": "x.bin",
                "output_postfix": "-hex",
                "patches": [
                    {
                        "type": "find_replace",
                        "find": "DE AD BE EF",
                        "replace": [1, 2, 3, 4],
                        "description": "hex string form"
                    }
                ]
            }"#,
        )
        .unwrap();
        match &file.patches[0] {
            Patch::FindReplace { find, replace, .. } => {
                assert_eq!(find, &[0xDE, 0xAD, 0xBE, 0xEF]);
                assert_eq!(replace, &[1, 2, 3, 4]);
            }
            other => panic!("unexpected patch {other:?}"),
        }
    }

    #[test]
    fn output_path_appends_postfix() {
        assert_eq!(
            output_path(Path::new("dumps/nrf-6-221122-0.bin"), "-patched"),
            PathBuf::from("dumps/nrf-6-221122-0-patched.bin")
        );
    }

    #[test]
    fn run_writes_output_next_to_firmware() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("nrf-6-221122-0.bin"), test_image()).unwrap();
        let patch_json = r#"{
            "name": "nrf-6-221122-0",
            "firmware_path": "nrf-6-221122-0.bin",
            "output_postfix": "-patched",
            "patches": [
                {
                    "type": "string",
                    "address": "0x23A00",
                    "original": "versions",
                    "data": "versionz",
                    "description": "rename version tag"
                }
            ]
        }"#;
        let patch_path = dir.path().join("recipe.json");
        std::fs::write(&patch_path, patch_json).unwrap();

        let out = run(&patch_path).unwrap();
        assert_eq!(out, dir.path().join("nrf-6-221122-0-patched.bin"));
        let output = std::fs::read(out).unwrap();
        assert_eq!(&output[0x23A00..0x23A08], b"versionz");
    }
}
