//! HID boot-protocol keyboard engine
//!
//! Polls the extracted interrupt IN endpoint once per SOF frame and
//! assembles 8-byte boot reports. A report is held on the output until
//! the consumer takes it; polling pauses meanwhile.

use crate::descriptor::{
    EndpointFilter, EndpointTransferType, HidProtocol, HidSubClass, InterfaceClass, ParserFilter,
};
use crate::engine::Watchdog;
use crate::enumerator::Enumerator;
use crate::fmt::{debug, info};
use crate::packet::DataPid;
use crate::phy::UtmiPort;
use crate::sie::{Transfer, TransferResponse, TransferType};
use crate::timing::HostConfig;

pub const KEYBOARD_REPORT_SIZE: usize = 8;

/// Watchdog timeout: ~3s at 60MHz.
const WATCHDOG_CYCLES: u32 = 3 * 60_000_000;

/// Modifier bitfield (byte 0 of a boot report).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardModifiers(pub u8);

impl KeyboardModifiers {
    pub fn left_ctrl(self) -> bool {
        self.0 & 0x01 != 0
    }
    pub fn left_shift(self) -> bool {
        self.0 & 0x02 != 0
    }
    pub fn left_alt(self) -> bool {
        self.0 & 0x04 != 0
    }
    pub fn left_gui(self) -> bool {
        self.0 & 0x08 != 0
    }
    pub fn right_ctrl(self) -> bool {
        self.0 & 0x10 != 0
    }
    pub fn right_shift(self) -> bool {
        self.0 & 0x20 != 0
    }
    pub fn right_alt(self) -> bool {
        self.0 & 0x40 != 0
    }
    pub fn right_gui(self) -> bool {
        self.0 & 0x80 != 0
    }

    pub fn shift(self) -> bool {
        self.left_shift() || self.right_shift()
    }
}

/// An 8-byte boot-protocol keyboard report.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct KeyboardReport {
    pub modifiers: KeyboardModifiers,
    pub reserved: u8,
    pub keys: [u8; 6],
}

impl KeyboardReport {
    pub fn from_bytes(bytes: [u8; KEYBOARD_REPORT_SIZE]) -> Self {
        KeyboardReport {
            modifiers: KeyboardModifiers(bytes[0]),
            reserved: bytes[1],
            keys: [bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7]],
        }
    }

    /// First key slot; what simple consumers compare across reports.
    pub fn key0(&self) -> u8 {
        self.keys[0]
    }

    /// Non-zero key slots.
    pub fn pressed_keys(&self) -> impl Iterator<Item = u8> + '_ {
        self.keys.iter().copied().filter(|&k| k != 0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    WaitEnumeration,
    Poll,
    EmitReport,
}

/// HID keyboard host engine.
pub struct KeyboardHost {
    enumerator: Enumerator,
    watchdog: Watchdog,
    watchdog_resets: u32,

    state: State,
    pid: DataPid,
    last_frame: u16,
    response_handled: bool,
    rx_count: u8,
    report: [u8; KEYBOARD_REPORT_SIZE],
    out: Option<KeyboardReport>,
}

impl KeyboardHost {
    pub fn new(config: HostConfig, fullspeed_only: bool) -> Self {
        let filter = ParserFilter {
            endpoint_filter: EndpointFilter::In,
            transfer_type: EndpointTransferType::Interrupt,
            interface_class: InterfaceClass::Hid as u8,
            interface_subclass: Some(HidSubClass::BootInterface as u8),
            interface_protocol: Some(HidProtocol::Keyboard as u8),
        };
        KeyboardHost {
            enumerator: Enumerator::new(config, filter, fullspeed_only),
            watchdog: Watchdog::new(config.watchdog_cycles.unwrap_or(WATCHDOG_CYCLES)),
            watchdog_resets: 0,

            state: State::WaitEnumeration,
            pid: DataPid::Data0,
            last_frame: 0,
            response_handled: true,
            rx_count: 0,
            report: [0; KEYBOARD_REPORT_SIZE],
            out: None,
        }
    }

    pub fn enumerated(&self) -> bool {
        self.enumerator.status().enumerated
    }

    pub fn watchdog_resets(&self) -> u32 {
        self.watchdog_resets
    }

    pub fn enumerator(&self) -> &Enumerator {
        &self.enumerator
    }

    /// Take the pending report; polling resumes once it is consumed.
    pub fn take_report(&mut self) -> Option<KeyboardReport> {
        let report = self.out.take();
        if report.is_some() && self.state == State::EmitReport {
            self.state = State::Poll;
        }
        report
    }

    fn restart(&mut self) {
        info!("usbh: keyboard: watchdog reset");
        self.watchdog_resets += 1;
        self.enumerator.reset();
        self.state = State::WaitEnumeration;
        self.pid = DataPid::Data0;
        self.last_frame = 0;
        self.response_handled = true;
        self.rx_count = 0;
        self.out = None;
    }

    /// Latched response of the current poll, reported exactly once.
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

    pub fn tick(&mut self, phy: &mut impl UtmiPort) {
        self.enumerator.tick(phy);

        if self.watchdog.tick() {
            self.restart();
            return;
        }

        match self.state {
            State::WaitEnumeration => {
                if self.enumerator.status().enumerated && self.enumerator.parser_output().valid {
                    self.watchdog.kick();
                    self.state = State::Poll;
                }
            }

            State::Poll => {
                // collect report bytes as they arrive
                while let Some(byte) = self.enumerator.sie_mut().rx_pop() {
                    if (self.rx_count as usize) < KEYBOARD_REPORT_SIZE {
                        self.report[self.rx_count as usize] = byte;
                    }
                    self.rx_count = self.rx_count.saturating_add(1);
                }

                match self.poll_response() {
                    Some(TransferResponse::Ack) => {
                        self.pid = self.pid.toggled();
                        if self.rx_count as usize >= KEYBOARD_REPORT_SIZE {
                            debug!("usbh: keyboard: report received");
                            self.out = Some(KeyboardReport::from_bytes(self.report));
                            self.state = State::EmitReport;
                        }
                    }
                    // NAK: no new report this frame
                    Some(TransferResponse::Nak) => {}
                    // STALL and errors: leave recovery to the watchdog
                    Some(_) => {}
                    None => {
                        let status = self.enumerator.sie().status();
                        if status.idle && status.sof_frame != self.last_frame {
                            let ep = match self.enumerator.parser_output().i_endp {
                                Some(ep) => ep.number(),
                                None => return,
                            };
                            let dev_addr = self.enumerator.status().dev_addr;
                            self.last_frame = status.sof_frame;
                            self.rx_count = 0;
                            self.response_handled = false;
                            let _ = self.enumerator.sie_mut().start(Transfer {
                                kind: TransferType::In,
                                data_pid: self.pid,
                                dev_addr,
                                ep_addr: ep,
                            });
                        }
                    }
                }
            }

            State::EmitReport => {
                // hold until the consumer accepts via take_report()
            }
        }
    }
}
