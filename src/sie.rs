//! Serial Interface Engine
//!
//! Executes one USB transaction at a time: token, optional data phase,
//! handshake, inter-packet delay. The caller loads the Tx FIFO, strobes
//! [Sie::start] and polls [Sie::status] until `idle` comes back with a
//! latched terminal response. SOF scheduling and bus reset run
//! underneath the same tick.

use crate::buffer::ByteFifo;
use crate::fmt::{info, trace};
use crate::packet::{DataPacketGenerator, DataPacketReceiver, DataPid, Pid, RxPacket};
use crate::phy::{Speed, UtmiPort};
use crate::reset::ResetController;
use crate::timing::UsbTiming;
use crate::token::{SofScheduler, TokenGenerator, TokenPayload};

/// Token class of a transfer.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferType {
    Setup,
    In,
    Out,
}

impl TransferType {
    fn token_pid(self) -> Pid {
        match self {
            TransferType::Setup => Pid::Setup,
            TransferType::In => Pid::In,
            TransferType::Out => Pid::Out,
        }
    }
}

/// One transaction request. OUT/SETUP payload is whatever the Tx FIFO
/// holds at [Sie::start]; the length is latched then and never
/// re-sampled.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer {
    pub kind: TransferType,
    pub data_pid: DataPid,
    /// Device address, 0..=127.
    pub dev_addr: u8,
    /// Endpoint number, 0..=15.
    pub ep_addr: u8,
}

/// Latched transaction outcome. `None` means never started or still in
/// progress.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferResponse {
    #[default]
    None,
    Ack,
    Nak,
    Stall,
    Timeout,
    CrcError,
    RxOverflow,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SieError {
    /// `start` strobed while a transaction is still in flight.
    NotIdle,
}

/// Snapshot of the SIE control surface.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SieStatus {
    pub idle: bool,
    pub response: TransferResponse,
    pub rx_len: u8,
    pub sof_frame: u16,
    pub reset_active: bool,
    pub detected_speed: Speed,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Idle,
    DrainRx,
    WaitTxa,
    SendToken,
    WaitTokenComplete,
    SendOutData,
    WaitHandshake,
    WaitInData,
    SendAck,
    IpdDrainTx,
}

const TX_FIFO_DEPTH: usize = 64;
const RX_FIFO_DEPTH: usize = 256;

/// The transfer engine.
pub struct Sie {
    timing: UsbTiming,
    reset: ResetController,
    token: TokenGenerator,
    sof: SofScheduler,
    data_gen: DataPacketGenerator,
    data_recv: DataPacketReceiver,

    state: State,
    xfer: Transfer,
    tx_fifo: ByteFifo<TX_FIFO_DEPTH>,
    rx_fifo: ByteFifo<RX_FIFO_DEPTH>,
    tx_len: u16,
    rx_len: u8,
    response: TransferResponse,
    rx_overflow: bool,
    ipd_left: u32,
}

impl Sie {
    pub const fn new(timing: UsbTiming, fullspeed_only: bool) -> Self {
        Sie {
            timing,
            reset: ResetController::new(fullspeed_only),
            token: TokenGenerator::new(),
            sof: SofScheduler::new(),
            data_gen: DataPacketGenerator::new(),
            data_recv: DataPacketReceiver::new(),

            state: State::Idle,
            xfer: Transfer {
                kind: TransferType::Setup,
                data_pid: DataPid::Data0,
                dev_addr: 0,
                ep_addr: 0,
            },
            tx_fifo: ByteFifo::new(),
            rx_fifo: ByteFifo::new(),
            tx_len: 0,
            rx_len: 0,
            response: TransferResponse::None,
            rx_overflow: false,
            ipd_left: 0,
        }
    }

    /// Whether a new transfer will be accepted.
    pub fn idle(&self) -> bool {
        self.state == State::Idle
    }

    pub fn status(&self) -> SieStatus {
        SieStatus {
            idle: self.idle(),
            response: self.response,
            rx_len: self.rx_len,
            sof_frame: self.sof.frame(),
            reset_active: self.reset.reset_active(),
            detected_speed: self.reset.detected_speed(),
        }
    }

    /// Begin a transaction. For OUT/SETUP the payload length is latched
    /// from the Tx FIFO level here; zero bytes produce a ZLP.
    pub fn start(&mut self, xfer: Transfer) -> Result<(), SieError> {
        if !self.idle() || self.reset.reset_active() {
            return Err(SieError::NotIdle);
        }
        debug_assert!(xfer.dev_addr < 128 && xfer.ep_addr < 16);
        trace!(
            "usbh: sie: start {} addr={} ep={}",
            xfer.kind,
            xfer.dev_addr,
            xfer.ep_addr
        );
        self.xfer = xfer;
        self.tx_len = self.tx_fifo.available_read() as u16;
        self.response = TransferResponse::None;
        self.enter_state(State::DrainRx);
        Ok(())
    }

    /// Push one payload byte for the next OUT/SETUP transfer.
    pub fn tx_push(&mut self, byte: u8) -> bool {
        self.tx_fifo.push(byte)
    }

    /// Load a payload slice, returning the number of bytes accepted.
    pub fn tx_write(&mut self, data: &[u8]) -> usize {
        self.tx_fifo.write(data)
    }

    /// Pop one received byte.
    pub fn rx_pop(&mut self) -> Option<u8> {
        self.rx_fifo.pop()
    }

    pub fn rx_available(&self) -> usize {
        self.rx_fifo.available_read()
    }

    /// Trigger a bus reset. Aborts any transfer in flight and restarts
    /// speed detection.
    pub fn bus_reset(&mut self) {
        info!("usbh: sie: bus reset requested");
        self.reset.bus_reset();
        self.abort();
    }

    fn abort(&mut self) {
        self.state = State::Idle;
        self.response = TransferResponse::None;
        self.tx_fifo.clean();
        self.rx_fifo.clean();
        self.tx_len = 0;
        self.rx_len = 0;
        self.rx_overflow = false;
        self.token.reset();
        self.data_gen.reset();
        self.data_recv.reset();
        self.sof.reset();
    }

    fn enter_state(&mut self, state: State) {
        trace!("usbh: sie: enter state: {}", state);
        self.state = state;
    }

    fn finish(&mut self, response: TransferResponse) {
        info!("usbh: sie: response: {} rx_len={}", response, self.rx_len);
        self.response = response;
        self.ipd_left = self.timing.interpacket_delay(self.reset.detected_speed());
        self.enter_state(State::IpdDrainTx);
    }

    /// Drain Rx symbols from the PHY through the packet receiver.
    /// Payload bytes reach the Rx FIFO only when `to_fifo` is set
    /// (the WAIT_IN_DATA path).
    fn pump_rx(&mut self, phy: &mut impl UtmiPort, to_fifo: bool) -> Option<RxPacket> {
        let Sie {
            data_recv,
            rx_fifo,
            rx_len,
            rx_overflow,
            ..
        } = self;
        while let Some(sym) = phy.rx() {
            let packet = data_recv.feed(sym, |byte| {
                if !to_fifo {
                    return;
                }
                if rx_fifo.push(byte) {
                    *rx_len = rx_len.saturating_add(1);
                } else {
                    *rx_overflow = true;
                }
            });
            if packet.is_some() {
                return packet;
            }
        }
        None
    }

    /// Advance the engine by one PHY clock cycle.
    pub fn tick(&mut self, phy: &mut impl UtmiPort) {
        self.reset.tick(&self.timing, phy);
        if self.reset.reset_active() {
            // the reset sequencer owns the bus; hold everything else
            if self.state != State::Idle {
                self.abort();
            } else {
                self.sof.reset();
                self.token.reset();
            }
            return;
        }

        let speed = self.reset.detected_speed();
        self.sof.tick();
        let token_done = self.token.tick(phy);

        // SOF keeps the bus clocked whenever no transaction has begun.
        if matches!(self.state, State::Idle | State::DrainRx | State::WaitTxa)
            && self.token.idle()
            && self.sof.sof_due(&self.timing, speed)
        {
            let frame = self.sof.frame();
            self.token
                .start(TokenPayload::sof(frame), self.timing.token_gap(speed));
            self.sof.on_sof(speed);
            trace!("usbh: sie: sof frame={}", frame);
        }

        match self.state {
            State::Idle => {
                // discard any stray bus traffic between transactions
                while phy.rx().is_some() {}
            }

            State::DrainRx => {
                self.rx_fifo.clean();
                self.data_recv.reset();
                while phy.rx().is_some() {}
                self.rx_len = 0;
                self.rx_overflow = false;
                self.enter_state(State::WaitTxa);
            }

            State::WaitTxa => {
                if self.token.idle() && self.sof.txa_open(&self.timing, speed) {
                    let gap = match self.xfer.kind {
                        TransferType::In => self.timing.token_gap_in(speed),
                        _ => self.timing.token_gap(speed),
                    };
                    self.token.start(
                        TokenPayload::addressed(
                            self.xfer.kind.token_pid(),
                            self.xfer.dev_addr,
                            self.xfer.ep_addr,
                        ),
                        gap,
                    );
                    self.enter_state(State::SendToken);
                }
            }

            State::SendToken => {
                if self.token.in_gap() || token_done {
                    self.enter_state(State::WaitTokenComplete);
                }
            }

            State::WaitTokenComplete => {
                if token_done || self.token.idle() {
                    match self.xfer.kind {
                        TransferType::Setup | TransferType::Out => {
                            // tx_len == 0 emits a ZLP with the requested PID
                            self.data_gen.start(self.xfer.data_pid, self.tx_len);
                            self.enter_state(State::SendOutData);
                        }
                        TransferType::In => self.enter_state(State::WaitInData),
                    }
                }
            }

            State::SendOutData => {
                if phy.tx_ready() {
                    let Sie {
                        data_gen, tx_fifo, ..
                    } = self;
                    match data_gen.next(|| tx_fifo.pop().unwrap_or(0)) {
                        Some(byte) => phy.tx(byte),
                        None => self.enter_state(State::WaitHandshake),
                    }
                }
            }

            State::WaitHandshake => {
                match self.pump_rx(phy, false) {
                    Some(RxPacket::Handshake(Pid::Ack)) => self.finish(TransferResponse::Ack),
                    Some(RxPacket::Handshake(Pid::Nak)) => self.finish(TransferResponse::Nak),
                    Some(RxPacket::Handshake(Pid::Stall)) => self.finish(TransferResponse::Stall),
                    Some(_) => self.finish(TransferResponse::CrcError),
                    None => {
                        if !self.data_recv.receiving()
                            && !self.sof.rxa_open(&self.timing, speed)
                        {
                            self.finish(TransferResponse::Timeout);
                        }
                    }
                }
            }

            State::WaitInData => {
                match self.pump_rx(phy, true) {
                    Some(RxPacket::Handshake(Pid::Nak)) => self.finish(TransferResponse::Nak),
                    Some(RxPacket::Handshake(Pid::Stall)) => self.finish(TransferResponse::Stall),
                    Some(RxPacket::Data { crc_ok, .. }) => {
                        if !crc_ok {
                            self.finish(TransferResponse::CrcError);
                        } else if self.rx_overflow {
                            // no ACK: the device keeps the packet and retries
                            self.finish(TransferResponse::RxOverflow);
                        } else {
                            self.enter_state(State::SendAck);
                        }
                    }
                    Some(_) => self.finish(TransferResponse::CrcError),
                    None => {
                        if !self.data_recv.receiving()
                            && self.rx_len == 0
                            && !self.sof.rxa_open(&self.timing, speed)
                        {
                            self.finish(TransferResponse::Timeout);
                        }
                    }
                }
            }

            State::SendAck => {
                if phy.tx_ready() {
                    phy.tx(Pid::Ack.byte());
                    self.finish(TransferResponse::Ack);
                }
            }

            State::IpdDrainTx => {
                self.tx_fifo.clean();
                if self.ipd_left > 0 {
                    self.ipd_left -= 1;
                } else {
                    self.enter_state(State::Idle);
                }
            }
        }
    }
}
