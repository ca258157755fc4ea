//! Bus reset and speed detection
//!
//! Walks the attached device through connection settle, bus reset and
//! the high-speed chirp handshake, then parks in a speed-specific idle
//! state. While any reset state is active this controller owns the PHY
//! control outputs and, during chirp, the Tx stream.

use crate::fmt::info;
use crate::phy::{LineState, OpMode, PhyControl, Speed, TermSelect, UtmiPort, XcvrSelect};
use crate::timing::UsbTiming;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum State {
    Disconnected,
    WaitConnect,
    BusReset,
    WaitDeviceChirpEnd,
    WaitDeviceChirpEndSe0,
    SendHostChirpK,
    SendHostChirpJ,
    IdleFs,
    IdleHs,
}

/// Reset sequencer and speed detector.
///
/// Disconnects are not handled gracefully yet; the engine watchdogs
/// cover that path by forcing re-enumeration.
pub struct ResetController {
    state: State,
    reset_counter: u32,
    chirp_timer: u32,
    bus_reset_req: bool,
    fullspeed_only: bool,
}

const RAW_DRIVE_SE0: PhyControl = PhyControl {
    op_mode: OpMode::RawDrive,
    xcvr_select: XcvrSelect::High,
    term_select: TermSelect::HsNormal,
    dp_pulldown: true,
    dm_pulldown: true,
};

const CHIRP: PhyControl = PhyControl {
    op_mode: OpMode::Chirp,
    xcvr_select: XcvrSelect::High,
    term_select: TermSelect::HsNormal,
    dp_pulldown: true,
    dm_pulldown: true,
};

impl ResetController {
    pub const fn new(fullspeed_only: bool) -> Self {
        ResetController {
            state: State::Disconnected,
            reset_counter: 0,
            chirp_timer: 0,
            bus_reset_req: false,
            fullspeed_only,
        }
    }

    /// Request a new bus reset; honoured from the idle states.
    pub fn bus_reset(&mut self) {
        self.bus_reset_req = true;
    }

    pub fn reset_active(&self) -> bool {
        !matches!(self.state, State::IdleFs | State::IdleHs)
    }

    pub fn detected_speed(&self) -> Speed {
        match self.state {
            State::IdleFs => Speed::Full,
            State::IdleHs => Speed::High,
            _ => Speed::Unknown,
        }
    }

    fn enter_state(&mut self, state: State) {
        info!("usbh: reset: enter state: {}", state);
        self.state = state;
    }

    pub fn tick(&mut self, timing: &UsbTiming, phy: &mut impl UtmiPort) {
        // counter runs in every non-idle state
        match self.state {
            State::Disconnected | State::IdleFs | State::IdleHs => self.reset_counter = 0,
            _ => self.reset_counter = self.reset_counter.saturating_add(1),
        }

        match self.state {
            State::Disconnected => {
                phy.set_control(PhyControl::fs_normal());
                if phy.line_state() == LineState::J {
                    self.enter_state(State::WaitConnect);
                }
            }

            State::WaitConnect => {
                phy.set_control(PhyControl::fs_normal());
                if phy.line_state() == LineState::J {
                    if self.reset_counter >= timing.settle_time {
                        self.enter_state(State::BusReset);
                    }
                } else {
                    self.enter_state(State::Disconnected);
                }
            }

            State::BusReset => {
                phy.set_control(RAW_DRIVE_SE0);

                if !self.fullspeed_only && self.reset_counter >= timing.min_reset_before_chirp {
                    if phy.line_state() == LineState::K {
                        self.chirp_timer += 1;
                        if self.chirp_timer >= timing.chirp_filter {
                            self.chirp_timer = 0;
                            self.enter_state(State::WaitDeviceChirpEnd);
                            return;
                        }
                    } else {
                        self.chirp_timer = 0;
                    }
                }

                if self.reset_counter >= timing.max_reset_time {
                    self.chirp_timer = 0;
                    self.enter_state(State::IdleFs);
                }
            }

            State::WaitDeviceChirpEnd => {
                phy.set_control(RAW_DRIVE_SE0);
                if phy.line_state() != LineState::K {
                    self.chirp_timer = 0;
                    self.enter_state(State::WaitDeviceChirpEndSe0);
                }
            }

            State::WaitDeviceChirpEndSe0 => {
                phy.set_control(RAW_DRIVE_SE0);
                self.chirp_timer += 1;
                if self.chirp_timer >= timing.chirp_duration {
                    self.chirp_timer = 0;
                    self.enter_state(State::SendHostChirpK);
                }
            }

            State::SendHostChirpK => {
                phy.set_control(CHIRP);
                if phy.tx_ready() {
                    phy.tx(0x00);
                }
                self.chirp_timer += 1;
                if self.chirp_timer >= timing.chirp_duration {
                    self.chirp_timer = 0;
                    self.enter_state(State::SendHostChirpJ);
                }
            }

            State::SendHostChirpJ => {
                phy.set_control(CHIRP);
                if phy.tx_ready() {
                    phy.tx(0xFF);
                }
                self.chirp_timer += 1;
                if self.chirp_timer >= timing.chirp_duration {
                    self.chirp_timer = 0;
                    if self.reset_counter >= timing.max_reset_time {
                        self.enter_state(State::IdleHs);
                    } else {
                        self.enter_state(State::SendHostChirpK);
                    }
                }
            }

            State::IdleFs => {
                phy.set_control(PhyControl::fs_normal());
                if self.bus_reset_req {
                    self.bus_reset_req = false;
                    self.chirp_timer = 0;
                    self.enter_state(State::Disconnected);
                }
            }

            State::IdleHs => {
                phy.set_control(PhyControl::hs_normal());
                if self.bus_reset_req {
                    self.bus_reset_req = false;
                    self.chirp_timer = 0;
                    self.enter_state(State::Disconnected);
                }
            }
        }
    }
}
