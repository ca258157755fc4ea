//! UTMI-like PHY port
//!
//! The lower edge of the stack. The PHY presents a byte-oriented
//! transmit stream, a byte-oriented receive stream with packet
//! boundaries, the D+/D- line state, and a handful of mode and
//! termination controls. Bit-level concerns (NRZI, bit stuffing, sync
//! and EOP patterns) live below this interface.

use num_enum::TryFromPrimitive;

/// D+/D- line state as reported by the PHY.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LineState {
    Se0 = 0b00,
    J = 0b01,
    K = 0b10,
    Se1 = 0b11,
}

/// PHY operating mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpMode {
    Normal,
    NonDriving,
    /// Drive the bus state directly (used to hold SE0 during reset).
    RawDrive,
    /// Chirp generation: Tx bytes 0x00/0xFF select chirp K/J.
    Chirp,
    NoSyncOrEop,
    DisableBitstuffAndNrzi,
}

/// Transceiver speed selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum XcvrSelect {
    Full,
    High,
    Low,
}

/// Termination selection.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TermSelect {
    HsNormal,
    HsChirp,
    LsFsNormal,
}

/// Negotiated bus speed. `Unknown` until the reset sequencer settles.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Speed {
    #[default]
    Unknown,
    Full,
    High,
}

/// Full set of PHY control outputs, applied once per tick.
///
/// `dp_pulldown`/`dm_pulldown` stay asserted in host mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PhyControl {
    pub op_mode: OpMode,
    pub xcvr_select: XcvrSelect,
    pub term_select: TermSelect,
    pub dp_pulldown: bool,
    pub dm_pulldown: bool,
}

impl PhyControl {
    /// Idle full-speed host configuration.
    pub const fn fs_normal() -> Self {
        PhyControl {
            op_mode: OpMode::Normal,
            xcvr_select: XcvrSelect::Full,
            term_select: TermSelect::LsFsNormal,
            dp_pulldown: true,
            dm_pulldown: true,
        }
    }

    /// Idle high-speed host configuration.
    pub const fn hs_normal() -> Self {
        PhyControl {
            op_mode: OpMode::Normal,
            xcvr_select: XcvrSelect::High,
            term_select: TermSelect::HsNormal,
            dp_pulldown: true,
            dm_pulldown: true,
        }
    }
}

impl Default for PhyControl {
    fn default() -> Self {
        PhyControl::fs_normal()
    }
}

/// One receive-stream event.
///
/// `End` marks the deassertion of receive-active, i.e. a packet
/// boundary. CRC checking happens above this interface.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RxSymbol {
    Byte(u8),
    End,
}

/// Byte-oriented UTMI-like PHY port.
///
/// Implementations must uphold per-tick semantics: at most one `tx`
/// call per tick (guarded by `tx_ready`), at most one symbol returned
/// from `rx` per call, symbols delivered in wire order.
pub trait UtmiPort {
    /// Current D+/D- line state.
    fn line_state(&self) -> LineState;

    /// Apply mode/termination controls for this tick.
    fn set_control(&mut self, ctrl: PhyControl);

    /// Whether the transmit path accepts a byte this tick.
    fn tx_ready(&self) -> bool;

    /// Offer one byte to the transmit stream.
    fn tx(&mut self, byte: u8);

    /// Pull the next receive event, if any arrived.
    fn rx(&mut self) -> Option<RxSymbol>;
}
