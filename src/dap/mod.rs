//! The SWD link to the target: ADIv5 debug-port setup, DP/AP register access
//! and sticky-error handling.

pub mod memory;
pub mod registers;

use std::time::{Duration, Instant};

use registers::{ctrl_ap, Abort, Ctrl, DpIdr, Register, Select, RDBUFF};

use crate::error::{Error, Result};
use crate::probe::commands::general::{
    ConnectRequest, ConnectResponse, DisconnectRequest, ResetRequest,
};
use crate::probe::commands::swd;
use crate::probe::commands::swj::{SwjClockRequest, SwjSequenceRequest};
use crate::probe::commands::transfer::{
    Ack, ConfigureRequest, InnerTransferRequest, PortType, TransferBlockRequest, TransferRequest,
};
use crate::probe::commands::{send_command, Status};
use crate::probe::CmsisDapDevice;

/// Deadline for a single DP/AP register access.
const REGISTER_TIMEOUT: Duration = Duration::from_secs(1);
/// Deadline for one block read/write packet.
const BLOCK_TIMEOUT: Duration = Duration::from_secs(2);
/// Budget for the debug-power-up handshake.
const POWER_UP_TIMEOUT: Duration = Duration::from_secs(1);

/// Link state of a [`DapSession`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connected,
    /// A transport fault was observed. Recoverable by `disconnect` +
    /// `connect`.
    Faulted,
}

/// An exclusive SWD session over one CMSIS-DAP probe.
///
/// The session caches the last DP SELECT and MEM-AP CSW values so they are
/// only rewritten when they change; this state is why a session must not be
/// shared across tasks without external mutual exclusion.
pub struct DapSession {
    device: CmsisDapDevice,
    state: SessionState,
    speed_khz: u32,
    select: Option<Select>,
    pub(crate) csw: Option<u32>,
}

impl DapSession {
    /// Wrap an opened probe. The link starts out disconnected.
    pub fn new(device: CmsisDapDevice) -> Self {
        Self {
            device,
            state: SessionState::Disconnected,
            speed_khz: 4_000,
            select: None,
            csw: None,
        }
    }

    /// Open the first probe matching `vid:pid` and wrap it.
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        Ok(Self::new(crate::probe::open_probe(vid, pid)?))
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn speed_khz(&self) -> u32 {
        self.speed_khz
    }

    /// Set the SWD clock. Takes effect immediately if the probe is attached.
    pub fn set_speed(&mut self, speed_khz: u32) -> Result<()> {
        let request = SwjClockRequest {
            clock_speed_hz: speed_khz * 1_000,
        };
        let response = send_command(&mut self.device, &request, REGISTER_TIMEOUT)?;
        if response.0 != Status::DapOk {
            return Err(Error::ConnectionFailed("SWJ clock rejected".into()));
        }
        self.speed_khz = speed_khz;
        Ok(())
    }

    /// Bring the link up: probe attach, SWJ switch to SWD, line reset, DPIDR
    /// read and debug power-up.
    #[tracing::instrument(skip(self))]
    pub fn connect(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        self.select = None;
        self.csw = None;

        let response = send_command(&mut self.device, &ConnectRequest::Swd, REGISTER_TIMEOUT)?;
        if response != ConnectResponse::SuccessfulInitForSwd {
            return Err(Error::ConnectionFailed(
                "probe could not initialize its SWD port".into(),
            ));
        }

        self.set_speed(self.speed_khz)?;

        let configure = ConfigureRequest {
            idle_cycles: 0,
            wait_retry: 0x80,
            match_retry: 0,
        };
        let response = send_command(&mut self.device, &configure, REGISTER_TIMEOUT)?;
        if response.0 != Status::DapOk {
            return Err(Error::ConnectionFailed("transfer configure rejected".into()));
        }
        let response = send_command(
            &mut self.device,
            &swd::ConfigureRequest::default(),
            REGISTER_TIMEOUT,
        )?;
        if response.0 != Status::DapOk {
            return Err(Error::ConnectionFailed("SWD configure rejected".into()));
        }

        // The target may be mid-reset or just powering up; retry the wake
        // sequence a few times before giving up.
        const CONNECT_ATTEMPTS: usize = 5;
        let mut last = Error::TargetNotConnected;
        for attempt in 0..CONNECT_ATTEMPTS {
            match self.wake_debug_port() {
                Ok(idcode) => {
                    tracing::debug!(
                        "target answered with IDCODE {:#010x} (designer {:#05x}, version {})",
                        u32::from(idcode),
                        idcode.designer(),
                        idcode.version()
                    );
                    self.power_up()?;
                    self.state = SessionState::Connected;
                    return Ok(());
                }
                Err(e) => {
                    tracing::debug!("connect attempt {} failed: {e}", attempt + 1);
                    last = e;
                }
            }
        }
        Err(last)
    }

    /// SWJ switch + line reset, then the IDCODE read that every ADIv5 DP
    /// requires before any other access.
    fn wake_debug_port(&mut self) -> Result<DpIdr> {
        // >50 clocks with SWDIO high puts the SW-DP into its reset state.
        self.swj_sequence(51, (1 << 51) - 1)?;
        // JTAG-to-SWD select sequence.
        self.swj_sequence(16, 0xE79E)?;
        // Second line reset, then at least two idle cycles with SWDIO low.
        self.swj_sequence(51, (1 << 51) - 1)?;
        self.swj_sequence(8, 0x00)?;

        let idcode = self.read_dp(DpIdr::ADDRESS)?;
        Ok(DpIdr(idcode))
    }

    /// Clear any sticky flags left from a previous session and request
    /// system + debug power. Confirmed via the ACK bits in CTRL/STAT.
    fn power_up(&mut self) -> Result<()> {
        self.clear_errors()?;
        self.write_dp(Select::ADDRESS, 0)?;
        self.select = Some(Select(0));

        let mut ctrl = Ctrl::default();
        ctrl.set_csyspwrupreq(true);
        ctrl.set_cdbgpwrupreq(true);
        self.write_dp(Ctrl::ADDRESS, ctrl.into())?;

        let deadline = Instant::now() + POWER_UP_TIMEOUT;
        loop {
            let ctrl = Ctrl(self.read_dp(Ctrl::ADDRESS)?);
            if ctrl.csyspwrupack() && ctrl.cdbgpwrupack() {
                tracing::debug!("debug port powered up");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            std::thread::sleep(Duration::from_millis(10));
        }
    }

    /// Tear the link down. Failures are logged, not surfaced; the probe
    /// handle is released either way.
    pub fn disconnect(&mut self) {
        if let Err(e) = send_command(&mut self.device, &DisconnectRequest, REGISTER_TIMEOUT) {
            tracing::debug!("disconnect failed: {e}");
        }
        self.state = SessionState::Disconnected;
        self.select = None;
        self.csw = None;
    }

    /// Ask the probe to run its device reset sequence. Best effort; not all
    /// probes implement one.
    pub fn reset_target(&mut self) {
        match send_command(&mut self.device, &ResetRequest, REGISTER_TIMEOUT) {
            Ok(response) if response.executed => tracing::debug!("probe pulsed target reset"),
            Ok(_) => tracing::debug!("probe has no device reset sequence"),
            Err(e) => tracing::warn!("target reset request failed: {e}"),
        }
    }

    fn swj_sequence(&mut self, bit_count: u8, bits: u64) -> Result<()> {
        let request = SwjSequenceRequest::new(bit_count, bits);
        let response = send_command(&mut self.device, &request, REGISTER_TIMEOUT)?;
        if response.0 != Status::DapOk {
            return Err(Error::ConnectionFailed("SWJ sequence rejected".into()));
        }
        Ok(())
    }

    /// Run one DAP_Transfer packet and check count and acknowledge.
    fn transfer(&mut self, request: TransferRequest) -> Result<Vec<u32>> {
        let requested = request.transfers.len();
        let response = match send_command(&mut self.device, &request, REGISTER_TIMEOUT) {
            Ok(response) => response,
            Err(e) => {
                self.state = SessionState::Faulted;
                return Err(e.into());
            }
        };

        if response.protocol_error {
            self.state = SessionState::Faulted;
            return Err(Error::TransferFailed("SWD protocol error".into()));
        }

        match response.ack {
            Ack::Ok => {
                if (response.count as usize) < requested {
                    self.state = SessionState::Faulted;
                    return Err(Error::TransferFailed(format!(
                        "only {}/{} transfers executed",
                        response.count, requested
                    )));
                }
                Ok(response.data)
            }
            ack => Err(self.handle_bad_ack(ack)),
        }
    }

    /// WAIT and NoAck mean the target is absent or stalled; FAULT leaves a
    /// sticky error that must be cleared before the next access.
    fn handle_bad_ack(&mut self, ack: Ack) -> Error {
        match ack {
            Ack::Wait => {
                tracing::debug!("WAIT response, aborting stalled transaction");
                let mut abort = Abort(0);
                abort.set_dapabort(true);
                if let Err(e) = self.write_dp_raw(Abort::ADDRESS, abort.into()) {
                    tracing::debug!("abort write after WAIT failed: {e}");
                }
                if let Err(e) = self.clear_errors() {
                    tracing::debug!("error clear after WAIT failed: {e}");
                }
                Error::TargetNotConnected
            }
            Ack::Fault => {
                tracing::debug!("FAULT response, clearing sticky errors");
                if let Err(e) = self.clear_errors() {
                    tracing::debug!("error clear after FAULT failed: {e}");
                }
                Error::TransferFailed("FAULT response".into())
            }
            _ => {
                self.state = SessionState::Faulted;
                Error::TargetNotConnected
            }
        }
    }

    /// Write ABORT with all sticky-error clear bits (`0x1E`).
    pub fn clear_errors(&mut self) -> Result<()> {
        let mut abort = Abort(0);
        abort.set_orunerrclr(true);
        abort.set_wderrclr(true);
        abort.set_stkerrclr(true);
        abort.set_stkcmpclr(true);
        self.write_dp_raw(Abort::ADDRESS, abort.into())
    }

    /// A DP write that bypasses acknowledge bookkeeping; used while
    /// recovering from WAIT/FAULT where a nested failure must not recurse.
    fn write_dp_raw(&mut self, address: u8, value: u32) -> Result<()> {
        let request = TransferRequest::new(&[InnerTransferRequest::write(
            PortType::DebugPort,
            address,
            value,
        )]);
        let response = send_command(&mut self.device, &request, REGISTER_TIMEOUT)?;
        if response.ack != Ack::Ok {
            return Err(Error::TransferFailed(format!(
                "DP write {address:#x} not acknowledged"
            )));
        }
        Ok(())
    }

    pub fn read_dp(&mut self, address: u8) -> Result<u32> {
        let data = self.transfer(TransferRequest::new(&[InnerTransferRequest::read(
            PortType::DebugPort,
            address,
        )]))?;
        data.first()
            .copied()
            .ok_or_else(|| Error::TransferFailed("DP read returned no data".into()))
    }

    pub fn write_dp(&mut self, address: u8, value: u32) -> Result<()> {
        self.transfer(TransferRequest::new(&[InnerTransferRequest::write(
            PortType::DebugPort,
            address,
            value,
        )]))?;
        Ok(())
    }

    /// Route the next AP access: rewrite DP SELECT only when the AP or
    /// register bank changed.
    pub(crate) fn select_ap_bank(&mut self, apsel: u8, address: u8) -> Result<()> {
        let mut select = Select(0);
        select.set_ap_sel(apsel);
        select.set_ap_bank_sel(address >> 4);

        if self.select == Some(select) {
            return Ok(());
        }
        tracing::trace!("changing SELECT to AP {}, bank {}", apsel, address >> 4);
        self.write_dp(Select::ADDRESS, select.into())?;
        self.select = Some(select);
        Ok(())
    }

    /// Read an AP register. AP reads are pipelined; the trailing RDBUFF read
    /// in the same packet realizes the final value.
    pub fn read_ap(&mut self, apsel: u8, address: u8) -> Result<u32> {
        self.select_ap_bank(apsel, address)?;
        let data = self.transfer(TransferRequest::new(&[
            InnerTransferRequest::read(PortType::AccessPort, address & 0xC),
            InnerTransferRequest::read(PortType::DebugPort, RDBUFF),
        ]))?;
        data.last()
            .copied()
            .ok_or_else(|| Error::TransferFailed("AP read returned no data".into()))
    }

    /// Write an AP register. The trailing RDBUFF read flushes the write so a
    /// FAULT surfaces here and not on some later access.
    pub fn write_ap(&mut self, apsel: u8, address: u8, value: u32) -> Result<()> {
        self.select_ap_bank(apsel, address)?;
        self.transfer(TransferRequest::new(&[
            InnerTransferRequest::write(PortType::AccessPort, address & 0xC, value),
            InnerTransferRequest::read(PortType::DebugPort, RDBUFF),
        ]))?;
        Ok(())
    }

    /// Stream `values.len()` words out of one AP register (DRW in practice),
    /// split into as many DAP_TransferBlock packets as the packet size needs.
    pub(crate) fn read_ap_block(
        &mut self,
        apsel: u8,
        address: u8,
        values: &mut [u32],
    ) -> Result<()> {
        self.select_ap_bank(apsel, address)?;

        // Packet overhead: command id, DAP index, LE count, request byte.
        let chunk_len = (self.device.packet_size() - 5) / 4;
        for chunk in values.chunks_mut(chunk_len) {
            let request = TransferBlockRequest::read_request(
                PortType::AccessPort,
                address & 0xC,
                chunk.len() as u16,
            );
            let response = match send_command(&mut self.device, &request, BLOCK_TIMEOUT) {
                Ok(response) => response,
                Err(e) => {
                    self.state = SessionState::Faulted;
                    return Err(e.into());
                }
            };
            if response.ack != Ack::Ok {
                return Err(self.handle_bad_ack(response.ack));
            }
            if response.data.len() != chunk.len() {
                self.state = SessionState::Faulted;
                return Err(Error::TransferFailed(format!(
                    "block read returned {}/{} words",
                    response.data.len(),
                    chunk.len()
                )));
            }
            chunk.copy_from_slice(&response.data);
        }
        Ok(())
    }

    /// Block-write counterpart of [`read_ap_block`](Self::read_ap_block).
    pub(crate) fn write_ap_block(&mut self, apsel: u8, address: u8, values: &[u32]) -> Result<()> {
        self.select_ap_bank(apsel, address)?;

        let chunk_len = (self.device.packet_size() - 5) / 4;
        for chunk in values.chunks(chunk_len) {
            let request = TransferBlockRequest::write_request(
                PortType::AccessPort,
                address & 0xC,
                chunk.to_vec(),
            );
            let response = match send_command(&mut self.device, &request, BLOCK_TIMEOUT) {
                Ok(response) => response,
                Err(e) => {
                    self.state = SessionState::Faulted;
                    return Err(e.into());
                }
            };
            if response.ack != Ack::Ok {
                return Err(self.handle_bad_ack(response.ack));
            }
            if (response.count as usize) < chunk.len() {
                self.state = SessionState::Faulted;
                return Err(Error::TransferFailed(format!(
                    "block write executed {}/{} words",
                    response.count,
                    chunk.len()
                )));
            }
        }
        Ok(())
    }

    /// Read the CTRL-AP IDR, checking we are really talking to an nRF52.
    pub fn read_ctrl_ap_idr(&mut self) -> Result<u32> {
        self.read_ap(ctrl_ap::APSEL, registers::AP_IDR)
    }
}

impl Drop for DapSession {
    fn drop(&mut self) {
        if self.state != SessionState::Disconnected {
            tracing::debug!("closing SWD session");
            self.disconnect();
        }
    }
}

/// Session against the in-process fake target, for bus-level tests.
#[cfg(test)]
pub(crate) fn fake_session() -> DapSession {
    let mut session = DapSession::new(CmsisDapDevice::Fake(crate::probe::fake::FakeDevice::new()));
    session.connect().expect("fake target should connect");
    session
}
