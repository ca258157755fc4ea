//! USB-MIDI host engine
//!
//! Polls the extracted bulk IN endpoint once per SOF frame and streams
//! received bytes out with first/last markers on every 4-byte USB-MIDI
//! event boundary.

use crate::descriptor::{
    AudioProtocol, AudioSubClass, EndpointFilter, EndpointTransferType, InterfaceClass,
    ParserFilter,
};
use crate::engine::{FramedByte, FramedFifo, Watchdog};
use crate::enumerator::Enumerator;
use crate::fmt::info;
use crate::packet::DataPid;
use crate::phy::UtmiPort;
use crate::sie::{Transfer, TransferResponse, TransferType};
use crate::timing::HostConfig;

/// USB-MIDI event size (Cable+CIN byte + 3 MIDI bytes).
pub const MIDI_EVENT_SIZE: usize = 4;

/// Watchdog timeout: ~3s at 60MHz.
const WATCHDOG_CYCLES: u32 = 3 * 60_000_000;

const FIFO_DEPTH: usize = 64;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    WaitEnumeration,
    Poll,
}

/// USB-MIDI host engine.
pub struct MidiHost {
    enumerator: Enumerator,
    watchdog: Watchdog,
    watchdog_resets: u32,

    state: State,
    pid: DataPid,
    last_frame: u16,
    response_handled: bool,
    event_index: u8,
    fifo: FramedFifo<FIFO_DEPTH>,
}

impl MidiHost {
    pub fn new(config: HostConfig, fullspeed_only: bool) -> Self {
        let filter = ParserFilter {
            endpoint_filter: EndpointFilter::In,
            transfer_type: EndpointTransferType::Bulk,
            interface_class: InterfaceClass::Audio as u8,
            interface_subclass: Some(AudioSubClass::MidiStreaming as u8),
            interface_protocol: Some(AudioProtocol::Audio10 as u8),
        };
        MidiHost {
            enumerator: Enumerator::new(config, filter, fullspeed_only),
            watchdog: Watchdog::new(config.watchdog_cycles.unwrap_or(WATCHDOG_CYCLES)),
            watchdog_resets: 0,

            state: State::WaitEnumeration,
            pid: DataPid::Data0,
            last_frame: 0,
            response_handled: true,
            event_index: 0,
            fifo: FramedFifo::new(),
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

    /// Next framed MIDI byte, if any.
    pub fn read(&mut self) -> Option<FramedByte> {
        self.fifo.pop()
    }

    fn restart(&mut self) {
        info!("usbh: midi: watchdog reset");
        self.watchdog_resets += 1;
        self.enumerator.reset();
        self.state = State::WaitEnumeration;
        self.pid = DataPid::Data0;
        self.last_frame = 0;
        self.response_handled = true;
        self.event_index = 0;
        self.fifo.clear();
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
                // move Rx bytes into the event FIFO, framing every 4
                // bytes; backpressure holds bytes in the SIE FIFO
                while !self.fifo.is_full() {
                    let Some(byte) = self.enumerator.sie_mut().rx_pop() else {
                        break;
                    };
                    self.fifo.push(FramedByte {
                        data: byte,
                        first: self.event_index == 0,
                        last: self.event_index as usize == MIDI_EVENT_SIZE - 1,
                    });
                    self.event_index = (self.event_index + 1) % MIDI_EVENT_SIZE as u8;
                }

                match self.poll_response() {
                    Some(TransferResponse::Ack) => self.pid = self.pid.toggled(),
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
                            self.response_handled = false;
                            self.event_index = 0;
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
        }
    }
}
