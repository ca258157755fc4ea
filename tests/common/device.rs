//! Cycle-stepped fake USB device.
//!
//! Speaks the byte-level wire protocol the host stack emits: detects
//! bus reset from the PHY controls, optionally chirps for high speed,
//! answers enumeration on endpoint 0 and serves a class personality
//! (MIDI stream, boot keyboard or Bulk-Only mass storage).

use super::bus::SimBus;
use super::descriptors;
use std::collections::VecDeque;
use usbh_stack::packet::{crc16, Pid};
use usbh_stack::phy::{LineState, OpMode};

/// RawDrive cycles before the device treats the bus as in reset.
const RESET_DETECT: u32 = 40;
/// Device chirp K duration.
const DEV_CHIRP_CYCLES: u32 = 250;

const SENSE_LEN: usize = 18;

pub enum DeviceKind {
    Midi,
    Keyboard,
    Msc,
}

enum CtrlState {
    Idle,
    DataIn { data: Vec<u8>, offset: usize },
    StatusIn,
}

enum InSource {
    CtrlData(usize),
    CtrlZlpStatus,
    MidiEvent,
    KbdReport,
    MscData(usize),
    MscCsw,
}

#[derive(Default)]
struct MscState {
    data: Vec<u8>,
    data_offset: usize,
    csw_pending: Option<[u8; 13]>,
    tur_fails_left: u32,
    block_count: u32,
    block_size: u32,
}

pub struct FakeDevice {
    kind: DeviceKind,
    hs_capable: bool,
    mps: usize,
    /// When false the device sits mute on the bus (watchdog tests).
    pub responsive: bool,

    se0_count: u32,
    in_reset: bool,
    chirping: bool,
    chirp_left: u32,
    hs_mode: bool,

    addr: u8,
    pending_addr: Option<u8>,
    configured: bool,

    device_desc: [u8; 18],
    config_desc: Vec<u8>,

    ctrl: CtrlState,
    cur_out: Option<(Pid, u8)>,
    last_in: Option<InSource>,

    in_ep: u8,
    out_ep: u8,
    midi_events: VecDeque<[u8; 4]>,
    report_pending: Option<[u8; 8]>,
    msc: MscState,
}

/// Deterministic content of block `lba` at offset `i`.
pub fn block_byte(lba: u32, i: usize) -> u8 {
    (lba as u8).wrapping_add(i as u8)
}

fn device_descriptor(mps: u8) -> [u8; 18] {
    [
        0x12, 0x01, 0x00, 0x02, 0x00, 0x00, 0x00, mps, 0x66, 0x66, 0x01, 0x23, 0x00, 0x01, 0x01,
        0x02, 0x03, 0x01,
    ]
}

impl FakeDevice {
    fn new(kind: DeviceKind, hs_capable: bool, mps: usize, config_desc: Vec<u8>) -> Self {
        let (in_ep, out_ep) = match kind {
            DeviceKind::Midi => (1, 2),
            DeviceKind::Keyboard => (1, 0),
            DeviceKind::Msc => (1, 2),
        };
        FakeDevice {
            kind,
            hs_capable,
            mps,
            responsive: true,

            se0_count: 0,
            in_reset: false,
            chirping: false,
            chirp_left: 0,
            hs_mode: false,

            addr: 0,
            pending_addr: None,
            configured: false,

            device_desc: device_descriptor(mps as u8),
            config_desc,

            ctrl: CtrlState::Idle,
            cur_out: None,
            last_in: None,

            in_ep,
            out_ep,
            midi_events: VecDeque::new(),
            report_pending: None,
            msc: MscState::default(),
        }
    }

    pub fn midi(hs_capable: bool, mps: usize) -> Self {
        FakeDevice::new(
            DeviceKind::Midi,
            hs_capable,
            mps,
            descriptors::arturia_keylabmkii(),
        )
    }

    pub fn keyboard(mps: usize) -> Self {
        FakeDevice::new(DeviceKind::Keyboard, false, mps, descriptors::logi_rec2())
    }

    pub fn msc(mps: usize, tur_fails: u32, block_count: u32, block_size: u32) -> Self {
        let mut dev = FakeDevice::new(DeviceKind::Msc, false, mps, descriptors::sandisk_32gen1());
        dev.msc.tur_fails_left = tur_fails;
        dev.msc.block_count = block_count;
        dev.msc.block_size = block_size;
        dev
    }

    pub fn queue_midi(&mut self, event: [u8; 4]) {
        self.midi_events.push_back(event);
    }

    pub fn press_key(&mut self, report: [u8; 8]) {
        self.report_pending = Some(report);
    }

    pub fn configured(&self) -> bool {
        self.configured
    }

    fn on_reset(&mut self, bus: &mut SimBus) {
        self.addr = 0;
        self.pending_addr = None;
        self.configured = false;
        self.ctrl = CtrlState::Idle;
        self.cur_out = None;
        self.last_in = None;
        self.msc.data.clear();
        self.msc.data_offset = 0;
        self.msc.csw_pending = None;
        self.hs_mode = false;
        self.chirping = self.hs_capable;
        self.chirp_left = DEV_CHIRP_CYCLES;
        bus.host_chirp_seen = false;
    }

    pub fn tick(&mut self, bus: &mut SimBus) {
        // reset detection from the PHY controls
        let raw_drive = bus.ctrl.op_mode == OpMode::RawDrive;
        if raw_drive {
            self.se0_count += 1;
            if self.se0_count == RESET_DETECT && !self.in_reset {
                self.in_reset = true;
                self.on_reset(bus);
            }
        } else {
            self.se0_count = 0;
            if bus.ctrl.op_mode == OpMode::Normal {
                self.in_reset = false;
            }
        }

        if self.hs_capable && bus.host_chirp_seen {
            self.hs_mode = true;
        }

        // line driving
        bus.line = if self.chirping && raw_drive {
            self.chirp_left = self.chirp_left.saturating_sub(1);
            if self.chirp_left == 0 {
                self.chirping = false;
            }
            LineState::K
        } else if raw_drive || bus.ctrl.op_mode == OpMode::Chirp {
            LineState::Se0
        } else {
            LineState::J
        };

        while let Some(packet) = bus.take_host_packet() {
            if self.responsive && !packet.is_empty() {
                self.handle_packet(bus, &packet);
            }
        }
    }

    fn handle_packet(&mut self, bus: &mut SimBus, packet: &[u8]) {
        let Some(pid) = Pid::from_byte(packet[0]) else {
            return;
        };
        match pid {
            Pid::Sof => {}

            Pid::Setup | Pid::Out => {
                if let Some((addr, ep)) = token_fields(packet) {
                    self.cur_out = (addr == self.addr).then_some((pid, ep));
                }
            }

            Pid::In => {
                if let Some((addr, ep)) = token_fields(packet) {
                    if addr == self.addr {
                        self.handle_in(bus, ep);
                    }
                }
            }

            Pid::Data0 | Pid::Data1 => {
                if let Some((token_pid, ep)) = self.cur_out.take() {
                    let payload = packet[1..packet.len().saturating_sub(2)].to_vec();
                    match token_pid {
                        Pid::Setup => self.handle_setup(bus, &payload),
                        Pid::Out => self.handle_out(bus, ep, &payload),
                        _ => {}
                    }
                }
            }

            Pid::Ack => self.on_host_ack(),

            _ => {}
        }
    }

    fn send_data(&mut self, bus: &mut SimBus, payload: &[u8], source: InSource) {
        let mut packet = Vec::with_capacity(payload.len() + 3);
        packet.push(Pid::Data1.byte());
        packet.extend_from_slice(payload);
        let crc = crc16(payload);
        packet.push((crc & 0xFF) as u8);
        packet.push((crc >> 8) as u8);
        bus.dev_send(&packet);
        self.last_in = Some(source);
    }

    fn send_handshake(&mut self, bus: &mut SimBus, pid: Pid) {
        bus.dev_send(&[pid.byte()]);
    }

    fn handle_setup(&mut self, bus: &mut SimBus, payload: &[u8]) {
        if payload.len() != 8 {
            return;
        }
        let bm_request_type = payload[0];
        let b_request = payload[1];
        let w_value = u16::from_le_bytes([payload[2], payload[3]]);
        let w_length = u16::from_le_bytes([payload[6], payload[7]]);

        self.ctrl = match (bm_request_type, b_request) {
            // GET_DESCRIPTOR
            (0x80, 0x06) => {
                let data = match (w_value >> 8) as u8 {
                    0x01 => self.device_desc.to_vec(),
                    0x02 => self.config_desc.clone(),
                    _ => Vec::new(),
                };
                let len = data.len().min(w_length as usize);
                CtrlState::DataIn {
                    data: data[..len].to_vec(),
                    offset: 0,
                }
            }
            // SET_ADDRESS: takes effect after the status stage
            (0x00, 0x05) => {
                self.pending_addr = Some(w_value as u8);
                CtrlState::StatusIn
            }
            // SET_CONFIGURATION
            (0x00, 0x09) => {
                self.configured = w_value != 0;
                CtrlState::StatusIn
            }
            _ => CtrlState::StatusIn,
        };
        self.send_handshake(bus, Pid::Ack);
    }

    fn handle_out(&mut self, bus: &mut SimBus, ep: u8, payload: &[u8]) {
        if ep == 0 {
            // status stage ZLP of a control read
            self.ctrl = CtrlState::Idle;
            self.send_handshake(bus, Pid::Ack);
            return;
        }
        if matches!(self.kind, DeviceKind::Msc) && ep == self.out_ep {
            self.handle_cbw(payload);
            self.send_handshake(bus, Pid::Ack);
        }
    }

    fn handle_in(&mut self, bus: &mut SimBus, ep: u8) {
        if ep == 0 {
            let response = match &self.ctrl {
                CtrlState::DataIn { data, offset } => {
                    let chunk = (data.len() - offset).min(self.mps);
                    Some((data[*offset..offset + chunk].to_vec(), InSource::CtrlData(chunk)))
                }
                CtrlState::StatusIn => Some((Vec::new(), InSource::CtrlZlpStatus)),
                CtrlState::Idle => None,
            };
            match response {
                Some((bytes, source)) => self.send_data(bus, &bytes, source),
                None => self.send_handshake(bus, Pid::Nak),
            }
            return;
        }

        if ep != self.in_ep || !self.configured {
            self.send_handshake(bus, Pid::Nak);
            return;
        }

        match self.kind {
            DeviceKind::Midi => match self.midi_events.front().copied() {
                Some(event) => self.send_data(bus, &event, InSource::MidiEvent),
                None => self.send_handshake(bus, Pid::Nak),
            },
            DeviceKind::Keyboard => match self.report_pending {
                Some(report) => self.send_data(bus, &report, InSource::KbdReport),
                None => self.send_handshake(bus, Pid::Nak),
            },
            DeviceKind::Msc => {
                if self.msc.data_offset < self.msc.data.len() {
                    let chunk = (self.msc.data.len() - self.msc.data_offset).min(self.mps);
                    let bytes =
                        self.msc.data[self.msc.data_offset..self.msc.data_offset + chunk].to_vec();
                    self.send_data(bus, &bytes, InSource::MscData(chunk));
                } else if let Some(csw) = self.msc.csw_pending {
                    self.send_data(bus, &csw, InSource::MscCsw);
                } else {
                    self.send_handshake(bus, Pid::Nak);
                }
            }
        }
    }

    fn on_host_ack(&mut self) {
        match self.last_in.take() {
            Some(InSource::CtrlData(chunk)) => {
                if let CtrlState::DataIn { offset, .. } = &mut self.ctrl {
                    *offset += chunk;
                }
            }
            Some(InSource::CtrlZlpStatus) => {
                if let Some(addr) = self.pending_addr.take() {
                    self.addr = addr;
                }
                self.ctrl = CtrlState::Idle;
            }
            Some(InSource::MidiEvent) => {
                self.midi_events.pop_front();
            }
            Some(InSource::KbdReport) => {
                self.report_pending = None;
            }
            Some(InSource::MscData(chunk)) => {
                self.msc.data_offset += chunk;
            }
            Some(InSource::MscCsw) => {
                self.msc.csw_pending = None;
            }
            None => {}
        }
    }

    fn queue_csw(&mut self, tag: u32, status: u8) {
        let mut csw = [0u8; 13];
        csw[0..4].copy_from_slice(&0x53425355u32.to_le_bytes());
        csw[4..8].copy_from_slice(&tag.to_le_bytes());
        csw[12] = status;
        self.msc.csw_pending = Some(csw);
    }

    fn handle_cbw(&mut self, payload: &[u8]) {
        if payload.len() != 31 || payload[0..4] != 0x43425355u32.to_le_bytes() {
            return;
        }
        let tag = u32::from_le_bytes(payload[4..8].try_into().unwrap());
        let opcode = payload[15];

        self.msc.data.clear();
        self.msc.data_offset = 0;

        match opcode {
            // TEST UNIT READY
            0x00 => {
                let status = if self.msc.tur_fails_left > 0 {
                    self.msc.tur_fails_left -= 1;
                    1
                } else {
                    0
                };
                self.queue_csw(tag, status);
            }
            // REQUEST SENSE: unit attention, fixed format
            0x03 => {
                let mut sense = vec![0u8; SENSE_LEN];
                sense[0] = 0x70;
                sense[2] = 0x06;
                sense[7] = 10;
                self.msc.data = sense;
                self.queue_csw(tag, 0);
            }
            // READ CAPACITY (10)
            0x25 => {
                let mut data = Vec::with_capacity(8);
                data.extend_from_slice(&(self.msc.block_count - 1).to_be_bytes());
                data.extend_from_slice(&self.msc.block_size.to_be_bytes());
                self.msc.data = data;
                self.queue_csw(tag, 0);
            }
            // READ (10)
            0x28 => {
                let lba = u32::from_be_bytes(payload[17..21].try_into().unwrap());
                let blocks = u16::from_be_bytes(payload[22..24].try_into().unwrap());
                let len = blocks as usize * self.msc.block_size as usize;
                self.msc.data = (0..len).map(|i| block_byte(lba, i)).collect();
                self.queue_csw(tag, 0);
            }
            _ => self.queue_csw(tag, 1),
        }
    }
}

fn token_fields(packet: &[u8]) -> Option<(u8, u8)> {
    if packet.len() != 3 {
        return None;
    }
    let data = packet[1] as u16 | (((packet[2] & 0x07) as u16) << 8);
    Some(((data & 0x7F) as u8, ((data >> 7) & 0xF) as u8))
}
