//! Device enumeration
//!
//! Runs the fixed bring-up script after bus reset: read the first 8
//! descriptor bytes to learn the control max packet size, assign an
//! address, read the full device descriptor, stream the configuration
//! descriptor through the endpoint parser, then select configuration.
//! Every step is the same control-transfer procedure with different
//! parameters.
//!
//! After the final step `enumerated` rises once and the SIE surface
//! belongs to the class engine; the enumerator never issues another
//! transaction on its own.

use crate::descriptor::{DescriptorParser, ParserFilter, ParserOutput};
use crate::fmt::{debug, info, warning};
use crate::packet::DataPid;
use crate::phy::UtmiPort;
use crate::setup::{Direction, SetupPayload};
use crate::sie::{Sie, Transfer, TransferResponse, TransferType};
use crate::timing::HostConfig;

/// Descriptor type codes used in GET_DESCRIPTOR wValue.
const DESC_DEVICE: u8 = 0x01;
const DESC_CONFIG: u8 = 0x02;

/// Maximum SETUP attempts before the bus is reset.
const SETUP_RETRIES: u8 = 3;

/// Control max packet size assumed until byte 7 of the device
/// descriptor is captured.
const DEFAULT_MPS: u8 = 8;

#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EnumeratorStatus {
    /// Rises exactly once per bring-up.
    pub enumerated: bool,
    /// Address the device answers on (0 until SET_ADDRESS completes).
    pub dev_addr: u8,
    /// Endpoint-0 max packet size learned in step 1.
    pub max_packet_size: u8,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Phase {
    LoadSetup,
    SetupAck,
    DataInStart,
    DataInWait,
    StatusStart,
    StatusWait,
}

enum Outcome {
    InProgress,
    Done,
    /// Unrecoverable for this bring-up attempt; reset the bus.
    Fatal,
}

/// One control transfer: SETUP, optional IN data phase, status phase.
///
/// The data phase keeps issuing IN tokens until the device returns a
/// packet shorter than the max packet size or the requested length is
/// reached. Control data transactions always carry DATA1; the toggle
/// is not advanced across packets (matches observed device behaviour
/// and the standard's initial-PID rule).
struct ControlTransfer {
    setup: SetupPayload,
    phase: Phase,
    setup_attempts: u8,
    received: u16,
    capture_mps: bool,
    stream_to_parser: bool,
}

impl ControlTransfer {
    fn new(setup: SetupPayload, capture_mps: bool, stream_to_parser: bool) -> Self {
        ControlTransfer {
            setup,
            phase: Phase::LoadSetup,
            setup_attempts: 0,
            received: 0,
            capture_mps,
            stream_to_parser,
        }
    }

    fn has_data_phase(&self) -> bool {
        self.setup.direction() == Direction::DeviceToHost && self.setup.w_length > 0
    }

    fn tick(
        &mut self,
        sie: &mut Sie,
        dev_addr: u8,
        mps: &mut u8,
        parser: &mut DescriptorParser,
    ) -> Outcome {
        if !sie.idle() || sie.status().reset_active {
            return Outcome::InProgress;
        }

        match self.phase {
            Phase::LoadSetup => {
                sie.tx_write(&self.setup.to_bytes());
                if sie
                    .start(Transfer {
                        kind: TransferType::Setup,
                        data_pid: DataPid::Data0,
                        dev_addr,
                        ep_addr: 0,
                    })
                    .is_err()
                {
                    return Outcome::InProgress;
                }
                self.phase = Phase::SetupAck;
                Outcome::InProgress
            }

            Phase::SetupAck => match sie.status().response {
                TransferResponse::None => Outcome::InProgress,
                TransferResponse::Ack => {
                    self.phase = if self.has_data_phase() {
                        Phase::DataInStart
                    } else {
                        Phase::StatusStart
                    };
                    Outcome::InProgress
                }
                TransferResponse::Nak | TransferResponse::Timeout => {
                    self.setup_attempts += 1;
                    if self.setup_attempts > SETUP_RETRIES {
                        warning!("usbh: enum: setup retries exhausted");
                        Outcome::Fatal
                    } else {
                        self.phase = Phase::LoadSetup;
                        Outcome::InProgress
                    }
                }
                _ => Outcome::Fatal,
            },

            Phase::DataInStart => {
                if sie
                    .start(Transfer {
                        kind: TransferType::In,
                        data_pid: DataPid::Data1,
                        dev_addr,
                        ep_addr: 0,
                    })
                    .is_err()
                {
                    return Outcome::InProgress;
                }
                self.phase = Phase::DataInWait;
                Outcome::InProgress
            }

            Phase::DataInWait => match sie.status().response {
                TransferResponse::None => Outcome::InProgress,
                TransferResponse::Ack => {
                    let rx_len = sie.status().rx_len as u16;
                    while let Some(byte) = sie.rx_pop() {
                        if self.capture_mps && self.received == 7 {
                            *mps = byte;
                            debug!("usbh: enum: max packet size = {}", byte);
                        }
                        if self.stream_to_parser {
                            parser.feed(byte);
                        }
                        self.received += 1;
                    }
                    if rx_len < *mps as u16 || self.received >= self.setup.w_length {
                        self.phase = Phase::StatusStart;
                    } else {
                        self.phase = Phase::DataInStart;
                    }
                    Outcome::InProgress
                }
                // device not ready yet: retry the same token
                TransferResponse::Nak => {
                    self.phase = Phase::DataInStart;
                    Outcome::InProgress
                }
                _ => Outcome::Fatal,
            },

            Phase::StatusStart => {
                // status direction is opposite to the data stage
                let kind = if self.setup.direction() == Direction::DeviceToHost {
                    TransferType::Out // host sends ZLP
                } else {
                    TransferType::In // host reads ZLP
                };
                if sie
                    .start(Transfer {
                        kind,
                        data_pid: DataPid::Data1,
                        dev_addr,
                        ep_addr: 0,
                    })
                    .is_err()
                {
                    return Outcome::InProgress;
                }
                self.phase = Phase::StatusWait;
                Outcome::InProgress
            }

            Phase::StatusWait => match sie.status().response {
                TransferResponse::None => Outcome::InProgress,
                TransferResponse::Ack => Outcome::Done,
                TransferResponse::Nak => {
                    self.phase = Phase::StatusStart;
                    Outcome::InProgress
                }
                // a dead status stage is not worth retrying
                _ => Outcome::Fatal,
            },
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
enum Step {
    WaitReset,
    WaitSettle,
    ReadMps,
    SetAddress,
    ReadDevice,
    ReadConfig,
    SetConfig,
    Enumerated,
}

/// The enumeration engine. Owns the SIE and the descriptor parser.
pub struct Enumerator {
    config: HostConfig,
    sie: Sie,
    parser: DescriptorParser,
    step: Step,
    ctrl: Option<ControlTransfer>,
    status: EnumeratorStatus,
}

impl Enumerator {
    pub fn new(config: HostConfig, filter: ParserFilter, fullspeed_only: bool) -> Self {
        Enumerator {
            config,
            sie: Sie::new(config.timing, fullspeed_only),
            parser: DescriptorParser::new(filter),
            step: Step::WaitReset,
            ctrl: None,
            status: EnumeratorStatus {
                enumerated: false,
                dev_addr: 0,
                max_packet_size: DEFAULT_MPS,
            },
        }
    }

    pub fn status(&self) -> EnumeratorStatus {
        self.status
    }

    pub fn parser_output(&self) -> &ParserOutput {
        self.parser.output()
    }

    /// The transfer surface. Class engines drive this directly once
    /// `enumerated` is up.
    pub fn sie(&self) -> &Sie {
        &self.sie
    }

    pub fn sie_mut(&mut self) -> &mut Sie {
        &mut self.sie
    }

    /// Full restart: forget everything learned and reset the bus.
    /// Used by the engine watchdogs.
    pub fn reset(&mut self) {
        info!("usbh: enum: reset");
        self.parser.reset();
        self.step = Step::WaitReset;
        self.ctrl = None;
        self.status = EnumeratorStatus {
            enumerated: false,
            dev_addr: 0,
            max_packet_size: DEFAULT_MPS,
        };
        self.sie.bus_reset();
    }

    fn enter_step(&mut self, step: Step) {
        info!("usbh: enum: enter step: {}", step);
        self.step = step;
    }

    fn begin(&mut self, step: Step, setup: SetupPayload, capture_mps: bool, stream: bool) {
        self.ctrl = Some(ControlTransfer::new(setup, capture_mps, stream));
        self.enter_step(step);
    }

    /// Restart enumeration after an unrecoverable transfer error.
    fn restart(&mut self) {
        warning!("usbh: enum: bring-up failed, resetting bus");
        self.reset();
    }

    fn run_step(&mut self, next: Step) {
        let Some(ctrl) = self.ctrl.as_mut() else {
            return;
        };
        let addr = self.status.dev_addr;
        let mut mps = self.status.max_packet_size;
        match ctrl.tick(&mut self.sie, addr, &mut mps, &mut self.parser) {
            Outcome::InProgress => {
                self.status.max_packet_size = mps;
            }
            Outcome::Done => {
                self.status.max_packet_size = mps;
                self.ctrl = None;
                self.on_step_done(next);
            }
            Outcome::Fatal => self.restart(),
        }
    }

    fn on_step_done(&mut self, next: Step) {
        match next {
            Step::ReadDevice => {
                // SET_ADDRESS took effect; talk to the new address
                self.status.dev_addr = self.config.device_address;
                self.begin(
                    Step::ReadDevice,
                    SetupPayload::get_descriptor(DESC_DEVICE, 0, 0, 18),
                    false,
                    false,
                );
            }
            Step::ReadConfig => {
                self.parser.enable();
                self.begin(
                    Step::ReadConfig,
                    SetupPayload::get_descriptor(DESC_CONFIG, 0, 0, 512),
                    false,
                    true,
                );
            }
            Step::SetConfig => {
                self.begin(
                    Step::SetConfig,
                    SetupPayload::set_configuration(self.config.config_number),
                    false,
                    false,
                );
            }
            Step::Enumerated => {
                info!("usbh: enum: enumerated");
                self.status.enumerated = true;
                self.enter_step(Step::Enumerated);
            }
            _ => {
                self.begin(
                    Step::SetAddress,
                    SetupPayload::set_address(self.config.device_address),
                    false,
                    false,
                );
            }
        }
    }

    pub fn tick(&mut self, phy: &mut impl UtmiPort) {
        self.sie.tick(phy);

        match self.step {
            Step::WaitReset => {
                let st = self.sie.status();
                if !st.reset_active {
                    self.enter_step(Step::WaitSettle);
                }
            }

            Step::WaitSettle => {
                // give flaky devices a 64-frame breather after reset
                if self.sie.status().sof_frame & 0x3F == 0x3F {
                    self.begin(
                        Step::ReadMps,
                        SetupPayload::get_descriptor(DESC_DEVICE, 0, 0, 8),
                        true,
                        false,
                    );
                }
            }

            Step::ReadMps => self.run_step(Step::SetAddress),
            Step::SetAddress => self.run_step(Step::ReadDevice),
            Step::ReadDevice => self.run_step(Step::ReadConfig),
            Step::ReadConfig => self.run_step(Step::SetConfig),
            Step::SetConfig => self.run_step(Step::Enumerated),

            Step::Enumerated => {
                // surface handed off to the class engine
            }
        }
    }
}
