//! CMSIS-DAP probe transport.
//!
//! A probe is either a v1 device (HID reports) or a v2 device (WinUSB bulk
//! endpoints). Exactly one request is in flight at a time; the owner of the
//! handle guarantees serialization.

pub mod commands;
#[cfg(test)]
pub(crate) mod fake;

use std::time::{Duration, Instant};

use commands::general::PacketSizeCommand;
use commands::{send_command, SendError};
use rusb::UsbContext;

use crate::error::{Error, Result};

/// The USB identity of the debug probe built into the display connector.
pub const DEFAULT_VID: u16 = 0x303A;
pub const DEFAULT_PID: u16 = 0x1002;

const USB_CLASS_HID: u8 = 0x03;

/// An opened CMSIS-DAP device.
pub enum CmsisDapDevice {
    /// CMSIS-DAP v1 over HID: device handle and report size.
    V1 {
        handle: hidapi::HidDevice,
        report_size: usize,
    },
    /// CMSIS-DAP v2 over bulk endpoints.
    V2 {
        handle: rusb::DeviceHandle<rusb::Context>,
        out_ep: u8,
        in_ep: u8,
        max_packet_size: usize,
    },
    /// In-process responder for bus-level tests.
    #[cfg(test)]
    Fake(fake::FakeDevice),
}

impl std::fmt::Debug for CmsisDapDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CmsisDapDevice::V1 { report_size, .. } => f
                .debug_struct("CmsisDapDevice::V1")
                .field("report_size", report_size)
                .finish(),
            CmsisDapDevice::V2 {
                out_ep,
                in_ep,
                max_packet_size,
                ..
            } => f
                .debug_struct("CmsisDapDevice::V2")
                .field("out_ep", out_ep)
                .field("in_ep", in_ep)
                .field("max_packet_size", max_packet_size)
                .finish(),
            #[cfg(test)]
            CmsisDapDevice::Fake(_) => f.write_str("CmsisDapDevice::Fake"),
        }
    }
}

impl CmsisDapDevice {
    /// Current packet size in bytes, excluding the HID report id.
    pub fn packet_size(&self) -> usize {
        match self {
            CmsisDapDevice::V1 { report_size, .. } => *report_size,
            CmsisDapDevice::V2 {
                max_packet_size, ..
            } => *max_packet_size,
            #[cfg(test)]
            CmsisDapDevice::Fake(_) => 512,
        }
    }

    pub(crate) fn is_hid(&self) -> bool {
        matches!(self, CmsisDapDevice::V1 { .. })
    }

    /// Read a response packet into `buf` within `timeout`.
    pub(crate) fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, SendError> {
        match self {
            CmsisDapDevice::V1 { handle, .. } => {
                let deadline = Instant::now() + timeout;
                loop {
                    // HID reads signal timeout by returning zero bytes.
                    match handle.read_timeout(buf, 100)? {
                        0 => {
                            if Instant::now() >= deadline {
                                return Err(SendError::Timeout);
                            }
                        }
                        n => return Ok(n),
                    }
                }
            }
            CmsisDapDevice::V2 { handle, in_ep, .. } => {
                Ok(handle.read_bulk(*in_ep, buf, timeout)?)
            }
            #[cfg(test)]
            CmsisDapDevice::Fake(fake) => fake.read(buf),
        }
    }

    /// Write a request packet. Byte 0 is the HID report id; v2 devices skip
    /// it on the wire.
    pub(crate) fn write(&mut self, buf: &[u8]) -> Result<usize, SendError> {
        match self {
            CmsisDapDevice::V1 { handle, .. } => Ok(handle.write(buf)?),
            CmsisDapDevice::V2 { handle, out_ep, .. } => {
                let timeout = Duration::from_millis(100);
                Ok(handle.write_bulk(*out_ep, &buf[1..], timeout)?)
            }
            #[cfg(test)]
            CmsisDapDevice::Fake(fake) => fake.write(&buf[1..]),
        }
    }

    /// Drain any stale data so that future responses stay synchronised with
    /// requests. Errors are expected (nothing pending) and swallowed.
    pub(crate) fn drain(&mut self) {
        tracing::debug!("draining probe of any pending data");
        match self {
            CmsisDapDevice::V1 {
                handle,
                report_size,
            } => loop {
                let mut discard = vec![0u8; *report_size + 1];
                match handle.read_timeout(&mut discard, 1) {
                    Ok(n) if n != 0 => continue,
                    _ => break,
                }
            },
            CmsisDapDevice::V2 {
                handle,
                in_ep,
                max_packet_size,
                ..
            } => {
                let timeout = Duration::from_millis(1);
                let mut discard = vec![0u8; *max_packet_size];
                loop {
                    match handle.read_bulk(*in_ep, &mut discard, timeout) {
                        Ok(n) if n != 0 => continue,
                        _ => break,
                    }
                }
            }
            #[cfg(test)]
            CmsisDapDevice::Fake(fake) => fake.drain(),
        }
    }

    /// Ask the probe for its maximum packet size and adopt it.
    pub(crate) fn find_packet_size(&mut self) -> Result<usize, SendError> {
        // V1 devices on some platforms only answer when addressed with the
        // exact report size, so candidates are attempted in turn.
        for candidate in [64usize, 512, 1024] {
            if let CmsisDapDevice::V1 { report_size, .. } = self {
                tracing::trace!("attempting HID report size of {} bytes", candidate);
                *report_size = candidate;
            }

            match send_command(self, &PacketSizeCommand, Duration::from_millis(100)) {
                Ok(packet_size) => {
                    tracing::debug!("probe packet size is {} bytes", packet_size);
                    match self {
                        CmsisDapDevice::V1 { report_size, .. } => {
                            *report_size = packet_size as usize
                        }
                        CmsisDapDevice::V2 {
                            max_packet_size, ..
                        } => *max_packet_size = packet_size as usize,
                        #[cfg(test)]
                        CmsisDapDevice::Fake(_) => {}
                    }
                    return Ok(packet_size as usize);
                }
                // V1 probes are expected to error while sizes are probed.
                Err(_) if self.is_hid() => continue,
                Err(e) => return Err(e),
            }
        }
        Err(SendError::UnexpectedAnswer)
    }
}

/// Identity of a probe found on the bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProbeInfo {
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial_number: Option<String>,
    pub product: Option<String>,
}

impl std::fmt::Display for ProbeInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:04x} {} (S/N {})",
            self.vendor_id,
            self.product_id,
            self.product.as_deref().unwrap_or("<unnamed>"),
            self.serial_number.as_deref().unwrap_or("?"),
        )
    }
}

/// List every device on the bus that matches the probe identity.
pub fn list_probes(vid: u16, pid: u16) -> Vec<ProbeInfo> {
    let Ok(context) = rusb::Context::new() else {
        return Vec::new();
    };
    let Ok(devices) = context.devices() else {
        return Vec::new();
    };

    let mut probes = Vec::new();
    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }
        let (serial_number, product) = match device.open() {
            Ok(handle) => (
                handle.read_serial_number_string_ascii(&desc).ok(),
                handle.read_product_string_ascii(&desc).ok(),
            ),
            Err(_) => (None, None),
        };
        probes.push(ProbeInfo {
            vendor_id: vid,
            product_id: pid,
            serial_number,
            product,
        });
    }
    probes
}

/// Open the first probe matching `vid:pid`, preferring v2 bulk operation and
/// falling back to v1 HID.
///
/// The returned device has been drained and its packet size negotiated.
pub fn open_probe(vid: u16, pid: u16) -> Result<CmsisDapDevice> {
    let mut device = match open_v2_device(vid, pid) {
        Ok(Some(device)) => device,
        Ok(None) => open_v1_device(vid, pid)?,
        Err(e) => {
            tracing::debug!("v2 open failed ({e}), trying HID");
            open_v1_device(vid, pid)?
        }
    };

    device.drain();
    device
        .find_packet_size()
        .map_err(|e| Error::ConnectionFailed(format!("packet size negotiation: {e}")))?;
    device.drain();

    Ok(device)
}

/// Attempt to open `vid:pid` in CMSIS-DAP v2 mode.
///
/// The v2 interface is recognised by its pair of bulk endpoints (out then
/// in) on a non-HID interface, the same heuristic the official DAPLink
/// firmware satisfies.
fn open_v2_device(vid: u16, pid: u16) -> Result<Option<CmsisDapDevice>> {
    let context = rusb::Context::new().map_err(|e| Error::ConnectionFailed(e.to_string()))?;
    let devices = context
        .devices()
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

    for device in devices.iter() {
        let Ok(desc) = device.device_descriptor() else {
            continue;
        };
        if desc.vendor_id() != vid || desc.product_id() != pid {
            continue;
        }

        let Ok(config) = device.active_config_descriptor() else {
            continue;
        };
        for interface in config.interfaces() {
            for i_desc in interface.descriptors() {
                if i_desc.class_code() == USB_CLASS_HID {
                    continue;
                }
                let eps: Vec<_> = i_desc.endpoint_descriptors().collect();
                if eps.len() < 2 {
                    continue;
                }
                if eps[0].transfer_type() != rusb::TransferType::Bulk
                    || eps[0].direction() != rusb::Direction::Out
                {
                    continue;
                }
                if eps[1].transfer_type() != rusb::TransferType::Bulk
                    || eps[1].direction() != rusb::Direction::In
                {
                    continue;
                }

                let Ok(mut handle) = device.open() else {
                    continue;
                };
                if handle.claim_interface(interface.number()).is_err() {
                    continue;
                }
                tracing::debug!("opening {:04x}:{:04x} in CMSIS-DAP v2 mode", vid, pid);
                return Ok(Some(CmsisDapDevice::V2 {
                    handle,
                    out_ep: eps[0].address(),
                    in_ep: eps[1].address(),
                    max_packet_size: eps[1].max_packet_size() as usize,
                }));
            }
        }
        // Matched VID/PID but no claimable bulk interface: fall back to HID.
        return Ok(None);
    }

    Err(Error::DeviceNotFound)
}

fn open_v1_device(vid: u16, pid: u16) -> Result<CmsisDapDevice> {
    tracing::debug!("attempting to open {:04x}:{:04x} in CMSIS-DAP v1 mode", vid, pid);
    let api = hidapi::HidApi::new().map_err(|e| Error::ConnectionFailed(e.to_string()))?;
    let device_info = api
        .device_list()
        .find(|info| info.vendor_id() == vid && info.product_id() == pid)
        .ok_or(Error::DeviceNotFound)?;
    let handle = device_info
        .open_device(&api)
        .map_err(|e| Error::ConnectionFailed(e.to_string()))?;

    Ok(CmsisDapDevice::V1 {
        handle,
        // Default report size until the probe tells us otherwise.
        report_size: 64,
    })
}
