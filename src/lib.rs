//! USB 2.0 host stack over a UTMI-like PHY
//!
//! Drives a byte-oriented PHY port ([UtmiPort]) through bus reset and
//! chirp speed negotiation, executes USB transactions one at a time
//! ([Sie]), enumerates the attached device ([Enumerator]) and hands the
//! transfer surface to one of the class engines:
//!
//! * [keyboard] - HID boot-protocol keyboard, emits 8-byte reports
//! * [midi] - USB-MIDI streaming, emits 4-byte framed events
//! * [msc] - SCSI Bulk-Only mass storage, reads raw blocks
//!
//! Everything is a cycle-synchronous state machine: call `tick()` once
//! per PHY clock on the top-level engine and it drives the whole stack.
//! Timing constants live in [UsbTiming]; the 60 MHz hardware profile is
//! the default and tests run a shrunk simulation profile.
//!
//! # Features
//! | Feature | Description                            |
//! | ------- |----------------------------------------|
//! | `keyboard` | Include the HID keyboard engine     |
//! | `midi` | Include the USB-MIDI engine             |
//! | `msc` | Include the mass storage engine          |
//! | `defmt` | Enable logging via [defmt](https://crates.io/crates/defmt) crate |
//!
//! [UtmiPort]: crate::phy::UtmiPort
//! [Sie]: crate::sie::Sie
//! [Enumerator]: crate::enumerator::Enumerator
//! [keyboard]: crate::engine::keyboard
//! [midi]: crate::engine::midi
//! [msc]: crate::engine::msc
//! [UsbTiming]: crate::timing::UsbTiming

#![no_std]

#[cfg(test)]
extern crate std;

pub(crate) mod buffer;
pub(crate) mod fmt;

pub mod descriptor;
pub mod engine;
pub mod enumerator;
pub mod packet;
pub mod phy;
pub mod reset;
#[cfg(feature = "msc")]
pub mod scsi;
pub mod setup;
pub mod sie;
pub mod timing;
pub mod token;
