//! Bus timing configuration
//!
//! Every delay and window the stack uses, expressed in PHY clock
//! cycles. The hardware profile assumes the usual 60 MHz UTMI clock;
//! simulations shrink everything by 2-3 orders of magnitude so a full
//! enumeration fits in a few hundred thousand ticks.

use crate::phy::Speed;

/// Timing constants in PHY clock cycles.
///
/// Some of these are looser than the standard strictly requires; they
/// were validated against real devices rather than derived from the
/// letter of the spec.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UsbTiming {
    /// Connection settle time before starting bus reset (~100us).
    pub settle_time: u32,
    /// Maximum bus reset duration (~50ms); FS fallback when no chirp.
    pub max_reset_time: u32,
    /// Minimum reset time before watching for a device chirp (~50us).
    pub min_reset_before_chirp: u32,
    /// Device chirp K must persist this long to count (~500us).
    pub chirp_filter: u32,
    /// Host chirp K/J segment duration (~50us).
    pub chirp_duration: u32,

    /// SOF period: 1ms in FS, 125us (microframe) in HS.
    pub sof_period_fs: u32,
    pub sof_period_hs: u32,

    /// Transmit-allowed window, relative to the last SOF emission.
    pub tx_to_tx_min_fs: u32,
    pub tx_to_tx_min_hs: u32,
    pub tx_to_tx_max_fs: u32,
    pub tx_to_tx_max_hs: u32,
    /// Receive-allowed window closes here; no device response by then
    /// is the TIMEOUT condition.
    pub tx_to_rx_max_fs: u32,
    pub tx_to_rx_max_hs: u32,

    /// Post-token delay before the bus turns around after an IN token.
    pub token_gap_in_fs: u32,
    pub token_gap_in_hs: u32,
    /// Post-token delay for SETUP/OUT/SOF tokens.
    pub token_gap_fs: u32,
    pub token_gap_hs: u32,

    /// Delay between the end of one transaction and the next.
    pub interpacket_delay_fs: u32,
    pub interpacket_delay_hs: u32,
}

impl UsbTiming {
    /// Hardware profile for a 60 MHz PHY clock.
    pub const MHZ60: UsbTiming = UsbTiming {
        settle_time: 6_000,
        max_reset_time: 3_000_000,
        min_reset_before_chirp: 3_000,
        chirp_filter: 30_000,
        chirp_duration: 3_000,

        sof_period_fs: 60_000,
        sof_period_hs: 7_500,

        tx_to_tx_min_fs: 12_000,
        tx_to_tx_min_hs: 1_500,
        tx_to_tx_max_fs: 42_000,
        tx_to_tx_max_hs: 5_220,
        tx_to_rx_max_fs: 54_000,
        tx_to_rx_max_hs: 6_720,

        token_gap_in_fs: 30,
        token_gap_in_hs: 8,
        token_gap_fs: 200,
        token_gap_hs: 20,

        interpacket_delay_fs: 1_000,
        interpacket_delay_hs: 100,
    };

    /// Shrunk profile for cycle-accurate simulation. Ratios between
    /// windows are preserved; absolute durations are not.
    pub const fn simulation() -> UsbTiming {
        UsbTiming {
            settle_time: 50,
            max_reset_time: 1_500,
            min_reset_before_chirp: 50,
            chirp_filter: 60,
            chirp_duration: 30,

            sof_period_fs: 300,
            sof_period_hs: 150,

            tx_to_tx_min_fs: 30,
            tx_to_tx_min_hs: 15,
            tx_to_tx_max_fs: 150,
            tx_to_tx_max_hs: 75,
            tx_to_rx_max_fs: 270,
            tx_to_rx_max_hs: 135,

            token_gap_in_fs: 4,
            token_gap_in_hs: 4,
            token_gap_fs: 8,
            token_gap_hs: 8,

            interpacket_delay_fs: 10,
            interpacket_delay_hs: 4,
        }
    }

    pub fn sof_period(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.sof_period_hs,
            _ => self.sof_period_fs,
        }
    }

    pub fn tx_to_tx_min(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.tx_to_tx_min_hs,
            _ => self.tx_to_tx_min_fs,
        }
    }

    pub fn tx_to_tx_max(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.tx_to_tx_max_hs,
            _ => self.tx_to_tx_max_fs,
        }
    }

    pub fn tx_to_rx_max(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.tx_to_rx_max_hs,
            _ => self.tx_to_rx_max_fs,
        }
    }

    pub fn token_gap_in(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.token_gap_in_hs,
            _ => self.token_gap_in_fs,
        }
    }

    pub fn token_gap(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.token_gap_hs,
            _ => self.token_gap_fs,
        }
    }

    pub fn interpacket_delay(&self, speed: Speed) -> u32 {
        match speed {
            Speed::High => self.interpacket_delay_hs,
            _ => self.interpacket_delay_fs,
        }
    }
}

impl Default for UsbTiming {
    fn default() -> Self {
        UsbTiming::MHZ60
    }
}

/// Top-level host configuration shared by all class engines.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HostConfig {
    /// Address assigned to the device during enumeration.
    pub device_address: u8,
    /// Configuration selected by SET_CONFIGURATION.
    pub config_number: u8,
    /// Watchdog expiry in cycles; `None` selects the engine default.
    pub watchdog_cycles: Option<u32>,
    pub timing: UsbTiming,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            device_address: 0x12,
            config_number: 1,
            watchdog_cycles: None,
            timing: UsbTiming::MHZ60,
        }
    }
}
