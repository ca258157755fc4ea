//! Cycle-stepped wire between the host stack and a fake device.
//!
//! The host side implements `UtmiPort`; the device side inspects
//! completed host packets and queues response bytes. A host packet is
//! considered complete on the first cycle with no transmitted byte,
//! mirroring the transmit-valid gap that ends a packet on a real UTMI
//! bus.

use std::collections::VecDeque;
use usbh_stack::phy::{LineState, PhyControl, RxSymbol, UtmiPort};

pub struct SimBus {
    /// Host PHY control outputs, as applied this cycle.
    pub ctrl: PhyControl,
    /// Line state driven by the device model.
    pub line: LineState,
    /// Set once any host chirp byte has been observed.
    pub host_chirp_seen: bool,

    tx_accum: Vec<u8>,
    tx_this_cycle: bool,
    host_packets: VecDeque<Vec<u8>>,
    rx_queue: VecDeque<RxSymbol>,
}

impl SimBus {
    pub fn new() -> Self {
        SimBus {
            ctrl: PhyControl::fs_normal(),
            line: LineState::Se0,
            host_chirp_seen: false,
            tx_accum: Vec::new(),
            tx_this_cycle: false,
            host_packets: VecDeque::new(),
            rx_queue: VecDeque::new(),
        }
    }

    /// Close out the current cycle; called once per tick after the
    /// host side ran.
    pub fn end_of_cycle(&mut self) {
        if !self.tx_this_cycle && !self.tx_accum.is_empty() {
            self.host_packets.push_back(std::mem::take(&mut self.tx_accum));
        }
        self.tx_this_cycle = false;
    }

    /// Next completed host packet, if any.
    pub fn take_host_packet(&mut self) -> Option<Vec<u8>> {
        self.host_packets.pop_front()
    }

    pub fn drop_host_packets(&mut self) {
        self.host_packets.clear();
        self.tx_accum.clear();
    }

    /// Queue a device-to-host packet.
    pub fn dev_send(&mut self, packet: &[u8]) {
        for &byte in packet {
            self.rx_queue.push_back(RxSymbol::Byte(byte));
        }
        self.rx_queue.push_back(RxSymbol::End);
    }
}

impl UtmiPort for SimBus {
    fn line_state(&self) -> LineState {
        self.line
    }

    fn set_control(&mut self, ctrl: PhyControl) {
        self.ctrl = ctrl;
    }

    fn tx_ready(&self) -> bool {
        true
    }

    fn tx(&mut self, byte: u8) {
        self.tx_this_cycle = true;
        if self.ctrl.op_mode == usbh_stack::phy::OpMode::Chirp {
            // chirp bytes select K/J levels, they are not packet data
            self.host_chirp_seen = true;
        } else {
            self.tx_accum.push(byte);
        }
    }

    fn rx(&mut self) -> Option<RxSymbol> {
        self.rx_queue.pop_front()
    }
}
