//! Mass-storage host engine (SCSI over Bulk-Only)
//!
//! Two nested machines. The inner one executes a single Bulk-Only
//! command: CBW out, optional bulk-IN data phase, CSW in. The outer one
//! brings the unit up (TEST UNIT READY with REQUEST SENSE recovery,
//! READ CAPACITY) and then serves block reads on demand, streaming each
//! block out with first/last framing.
//!
//! Quirk handling follows what real sticks and SSDs need rather than
//! the letter of the spec: generous retry on NAK everywhere, a long
//! watchdog (SSDs can take seconds to wake), and sense fetched after
//! every failed TEST UNIT READY.

use crate::descriptor::{
    EndpointFilter, EndpointTransferType, InterfaceClass, MscProtocol, MscSubClass, ParserFilter,
};
use crate::engine::{FramedByte, FramedFifo, Watchdog};
use crate::enumerator::Enumerator;
use crate::fmt::{debug, info, warning};
use crate::packet::DataPid;
use crate::phy::UtmiPort;
use crate::scsi::{Cbw, Csw, CswStatus, CSW_LEN};
use crate::sie::{Transfer, TransferResponse, TransferType};
use crate::timing::HostConfig;

/// Watchdog timeout: ~10s at 60MHz (SSDs can take seconds to wake).
const WATCHDOG_CYCLES: u32 = 10 * 60_000_000;

/// TEST UNIT READY attempts before giving up on the device.
const UNIT_READY_ATTEMPTS: u8 = 10;

/// Blocks fetched per READ(10).
const BLOCKS_PER_READ: u16 = 1;

const RX_DATA_DEPTH: usize = 64;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscError {
    /// The unit is not initialised yet.
    NotReady,
    /// A read is already queued or in flight.
    Busy,
}

/// Completion pulse for a block read.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct MscResponse {
    pub error: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum OuterState {
    WaitEnumeration,
    TestUnitReady,
    RequestSense,
    ReadCapacity,
    Ready,
    Reading,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum CmdPhase {
    CbwLoad,
    CbwWait,
    DataStart,
    DataWait,
    CswStart,
    CswWait,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum DataSink {
    /// Frame bytes onto the rx_data stream.
    Stream,
    /// Capture into the capacity register.
    Capture,
}

struct Command {
    phase: CmdPhase,
    cbw_bytes: [u8; crate::scsi::CBW_LEN],
    tag: u32,
    data_len: u32,
    sink: DataSink,
    received: u32,
}

enum CmdResult {
    InProgress,
    /// CSW received and parsed.
    Done(CswStatus),
    /// Command never completed (CBW refused, endpoint stalled, ...).
    Rejected,
}

/// Mass-storage host engine.
pub struct MscHost {
    enumerator: Enumerator,
    watchdog: Watchdog,
    watchdog_resets: u32,

    state: OuterState,
    cmd: Option<Command>,
    next_tag: u32,
    unit_ready_attempts: u8,

    block_count: u32,
    block_size: u32,
    capacity_buf: [u8; 8],
    capacity_len: u8,
    csw_buf: [u8; CSW_LEN],
    csw_len: u8,

    in_pid: DataPid,
    out_pid: DataPid,
    response_handled: bool,

    pending_lba: Option<u32>,
    rx_data: FramedFifo<RX_DATA_DEPTH>,
    resp: Option<MscResponse>,
}

impl MscHost {
    pub fn new(config: HostConfig, fullspeed_only: bool) -> Self {
        let filter = ParserFilter {
            endpoint_filter: EndpointFilter::InAndOut,
            transfer_type: EndpointTransferType::Bulk,
            interface_class: InterfaceClass::MassStorage as u8,
            interface_subclass: Some(MscSubClass::ScsiTransparent as u8),
            interface_protocol: Some(MscProtocol::BulkOnly as u8),
        };
        MscHost {
            enumerator: Enumerator::new(config, filter, fullspeed_only),
            watchdog: Watchdog::new(config.watchdog_cycles.unwrap_or(WATCHDOG_CYCLES)),
            watchdog_resets: 0,

            state: OuterState::WaitEnumeration,
            cmd: None,
            next_tag: 1,
            unit_ready_attempts: 0,

            block_count: 0,
            block_size: 0,
            capacity_buf: [0; 8],
            capacity_len: 0,
            csw_buf: [0; CSW_LEN],
            csw_len: 0,

            in_pid: DataPid::Data0,
            out_pid: DataPid::Data0,
            response_handled: true,

            pending_lba: None,
            rx_data: FramedFifo::new(),
            resp: None,
        }
    }

    /// Unit initialised; block reads are accepted.
    pub fn ready(&self) -> bool {
        matches!(self.state, OuterState::Ready | OuterState::Reading)
    }

    /// A read is queued or in flight.
    pub fn busy(&self) -> bool {
        self.pending_lba.is_some() || self.state == OuterState::Reading
    }

    pub fn block_count(&self) -> u32 {
        self.block_count
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn watchdog_resets(&self) -> u32 {
        self.watchdog_resets
    }

    pub fn enumerator(&self) -> &Enumerator {
        &self.enumerator
    }

    /// Queue a READ(10) of `lba`.
    pub fn start_read(&mut self, lba: u32) -> Result<(), MscError> {
        if !self.ready() {
            return Err(MscError::NotReady);
        }
        if self.busy() {
            return Err(MscError::Busy);
        }
        self.pending_lba = Some(lba);
        Ok(())
    }

    /// Completion pulse for the most recent read.
    pub fn take_response(&mut self) -> Option<MscResponse> {
        self.resp.take()
    }

    /// Next framed byte of block data.
    pub fn read_data(&mut self) -> Option<FramedByte> {
        self.rx_data.pop()
    }

    fn restart(&mut self) {
        info!("usbh: msc: engine reset");
        self.watchdog_resets += 1;
        self.enumerator.reset();
        self.state = OuterState::WaitEnumeration;
        self.cmd = None;
        self.unit_ready_attempts = 0;
        self.block_count = 0;
        self.block_size = 0;
        self.in_pid = DataPid::Data0;
        self.out_pid = DataPid::Data0;
        self.response_handled = true;
        self.pending_lba = None;
        self.rx_data.clear();
        self.resp = None;
    }

    fn enter_state(&mut self, state: OuterState) {
        info!("usbh: msc: enter state: {}", state);
        self.state = state;
    }

    fn start_command(&mut self, cbw: Cbw, sink: DataSink) {
        debug!("usbh: msc: command tag={} len={}", cbw.tag, cbw.data_transfer_len);
        self.capacity_len = 0;
        self.csw_len = 0;
        self.cmd = Some(Command {
            phase: CmdPhase::CbwLoad,
            cbw_bytes: cbw.to_bytes(),
            tag: cbw.tag,
            data_len: cbw.data_transfer_len,
            sink,
            received: 0,
        });
    }

    fn poll_response(&mut self) -> Option<TransferResponse> {
        let status = self.enumerator.sie().status();
        if status.idle && !self.response_handled && status.response != TransferResponse::None {
            self.response_handled = true;
            if matches!(status.response, TransferResponse::Ack | TransferResponse::Nak) {
                self.watchdog.kick();
            }
            Some(status.response)
        } else {
            None
        }
    }

    /// Associated fn so the command state can stay borrowed at call
    /// sites.
    fn begin_transfer(
        enumerator: &mut Enumerator,
        response_handled: &mut bool,
        kind: TransferType,
        ep_addr: u8,
        data_pid: DataPid,
    ) -> bool {
        let dev_addr = enumerator.status().dev_addr;
        *response_handled = false;
        enumerator
            .sie_mut()
            .start(Transfer {
                kind,
                data_pid,
                dev_addr,
                ep_addr,
            })
            .is_ok()
    }

    /// Move data-phase bytes out of the SIE Rx FIFO into the selected
    /// sink, honouring stream backpressure.
    fn drain_data(&mut self) {
        let Some(cmd) = self.cmd.as_mut() else {
            return;
        };
        loop {
            match cmd.sink {
                DataSink::Stream => {
                    if self.rx_data.is_full() || cmd.received >= cmd.data_len {
                        break;
                    }
                    let Some(byte) = self.enumerator.sie_mut().rx_pop() else {
                        break;
                    };
                    self.rx_data.push(FramedByte {
                        data: byte,
                        first: cmd.received == 0,
                        last: cmd.received == cmd.data_len - 1,
                    });
                    cmd.received += 1;
                }
                DataSink::Capture => {
                    let Some(byte) = self.enumerator.sie_mut().rx_pop() else {
                        break;
                    };
                    if (self.capacity_len as usize) < self.capacity_buf.len() {
                        self.capacity_buf[self.capacity_len as usize] = byte;
                        self.capacity_len += 1;
                    }
                    cmd.received += 1;
                }
            }
        }
    }

    fn drain_csw(&mut self) {
        while (self.csw_len as usize) < CSW_LEN {
            let Some(byte) = self.enumerator.sie_mut().rx_pop() else {
                break;
            };
            self.csw_buf[self.csw_len as usize] = byte;
            self.csw_len += 1;
        }
    }

    /// Advance the inner Bulk-Only command machine.
    fn run_command(&mut self) -> CmdResult {
        match self.cmd.as_ref().map(|c| c.phase) {
            Some(CmdPhase::DataWait) => {
                self.drain_data();
                // a stalled consumer must not let DRAIN_RX of the next
                // transaction eat undelivered bytes
                if self.enumerator.sie().rx_available() > 0 {
                    return CmdResult::InProgress;
                }
            }
            Some(CmdPhase::CswWait) => self.drain_csw(),
            _ => {}
        }

        let response = self.poll_response();
        let idle = self.enumerator.sie().status().idle;
        let out = self.enumerator.parser_output();
        let (Some(i_endp), Some(o_endp)) = (out.i_endp, out.o_endp) else {
            return CmdResult::InProgress;
        };
        let (in_ep, out_ep) = (i_endp.number(), o_endp.number());

        let Some(cmd) = self.cmd.as_mut() else {
            return CmdResult::InProgress;
        };

        match cmd.phase {
            CmdPhase::CbwLoad => {
                if idle {
                    self.enumerator.sie_mut().tx_write(&cmd.cbw_bytes);
                    cmd.phase = CmdPhase::CbwWait;
                    if !Self::begin_transfer(
                        &mut self.enumerator,
                        &mut self.response_handled,
                        TransferType::Out,
                        out_ep,
                        self.out_pid,
                    ) {
                        return CmdResult::Rejected;
                    }
                }
                CmdResult::InProgress
            }

            CmdPhase::CbwWait => match response {
                Some(TransferResponse::Ack) => {
                    self.out_pid = self.out_pid.toggled();
                    cmd.phase = if cmd.data_len > 0 {
                        CmdPhase::DataStart
                    } else {
                        CmdPhase::CswStart
                    };
                    CmdResult::InProgress
                }
                Some(_) => {
                    warning!("usbh: msc: CBW rejected");
                    CmdResult::Rejected
                }
                None => CmdResult::InProgress,
            },

            CmdPhase::DataStart => {
                if idle {
                    cmd.phase = CmdPhase::DataWait;
                    if !Self::begin_transfer(
                        &mut self.enumerator,
                        &mut self.response_handled,
                        TransferType::In,
                        in_ep,
                        self.in_pid,
                    ) {
                        return CmdResult::Rejected;
                    }
                }
                CmdResult::InProgress
            }

            CmdPhase::DataWait => match response {
                Some(TransferResponse::Ack) => {
                    self.in_pid = self.in_pid.toggled();
                    cmd.phase = if cmd.received >= cmd.data_len {
                        CmdPhase::CswStart
                    } else {
                        CmdPhase::DataStart
                    };
                    CmdResult::InProgress
                }
                Some(TransferResponse::Stall) => CmdResult::Rejected,
                // NAK and transient errors: re-poll; the device resends
                // anything we did not ACK
                Some(_) => {
                    cmd.phase = CmdPhase::DataStart;
                    CmdResult::InProgress
                }
                None => CmdResult::InProgress,
            },

            CmdPhase::CswStart => {
                if idle {
                    self.csw_len = 0;
                    cmd.phase = CmdPhase::CswWait;
                    if !Self::begin_transfer(
                        &mut self.enumerator,
                        &mut self.response_handled,
                        TransferType::In,
                        in_ep,
                        self.in_pid,
                    ) {
                        return CmdResult::Rejected;
                    }
                }
                CmdResult::InProgress
            }

            CmdPhase::CswWait => match response {
                Some(TransferResponse::Ack) => {
                    self.in_pid = self.in_pid.toggled();
                    if (self.csw_len as usize) < CSW_LEN {
                        return CmdResult::Rejected;
                    }
                    let tag = cmd.tag;
                    match Csw::from_le_bytes(&self.csw_buf, tag) {
                        Ok(csw) => {
                            debug!("usbh: msc: CSW status={}", csw.status);
                            self.next_tag = self.next_tag.wrapping_add(1);
                            CmdResult::Done(csw.status)
                        }
                        Err(_) => {
                            warning!("usbh: msc: invalid CSW");
                            CmdResult::Rejected
                        }
                    }
                }
                Some(TransferResponse::Stall) => CmdResult::Rejected,
                Some(_) => {
                    cmd.phase = CmdPhase::CswStart;
                    CmdResult::InProgress
                }
                None => CmdResult::InProgress,
            },
        }
    }

    pub fn tick(&mut self, phy: &mut impl UtmiPort) {
        self.enumerator.tick(phy);

        if self.watchdog.tick() {
            self.restart();
            return;
        }

        match self.state {
            OuterState::WaitEnumeration => {
                if self.enumerator.status().enumerated && self.enumerator.parser_output().valid {
                    self.watchdog.kick();
                    self.unit_ready_attempts = 0;
                    self.start_command(Cbw::test_unit_ready(self.next_tag), DataSink::Capture);
                    self.enter_state(OuterState::TestUnitReady);
                }
            }

            OuterState::TestUnitReady => match self.run_command() {
                CmdResult::Done(CswStatus::Passed) => {
                    self.start_command(Cbw::read_capacity_10(self.next_tag), DataSink::Capture);
                    self.enter_state(OuterState::ReadCapacity);
                }
                CmdResult::Done(_) | CmdResult::Rejected => {
                    self.unit_ready_attempts += 1;
                    if self.unit_ready_attempts >= UNIT_READY_ATTEMPTS {
                        warning!("usbh: msc: unit never became ready");
                        self.restart();
                    } else {
                        // fetch sense data to clear the unit-attention
                        // condition, then try again
                        self.start_command(Cbw::request_sense(self.next_tag), DataSink::Capture);
                        self.enter_state(OuterState::RequestSense);
                    }
                }
                CmdResult::InProgress => {}
            },

            OuterState::RequestSense => match self.run_command() {
                CmdResult::Done(_) | CmdResult::Rejected => {
                    self.start_command(Cbw::test_unit_ready(self.next_tag), DataSink::Capture);
                    self.enter_state(OuterState::TestUnitReady);
                }
                CmdResult::InProgress => {}
            },

            OuterState::ReadCapacity => match self.run_command() {
                CmdResult::Done(CswStatus::Passed) => {
                    let last_lba = u32::from_be_bytes(self.capacity_buf[0..4].try_into().unwrap());
                    self.block_count = last_lba.wrapping_add(1);
                    self.block_size =
                        u32::from_be_bytes(self.capacity_buf[4..8].try_into().unwrap());
                    info!(
                        "usbh: msc: capacity: {} blocks of {} bytes",
                        self.block_count,
                        self.block_size
                    );
                    self.enter_state(OuterState::Ready);
                }
                CmdResult::Done(_) | CmdResult::Rejected => self.restart(),
                CmdResult::InProgress => {}
            },

            OuterState::Ready => {
                if let Some(lba) = self.pending_lba.take() {
                    self.start_command(
                        Cbw::read_10(self.next_tag, lba, BLOCKS_PER_READ, self.block_size),
                        DataSink::Stream,
                    );
                    self.enter_state(OuterState::Reading);
                }
            }

            OuterState::Reading => match self.run_command() {
                CmdResult::Done(status) => {
                    self.cmd = None;
                    self.resp = Some(MscResponse {
                        error: status != CswStatus::Passed,
                    });
                    self.enter_state(OuterState::Ready);
                }
                CmdResult::Rejected => {
                    self.cmd = None;
                    self.resp = Some(MscResponse { error: true });
                    self.enter_state(OuterState::Ready);
                }
                CmdResult::InProgress => {}
            },
        }
    }
}
