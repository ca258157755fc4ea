//! Configuration-descriptor fixtures.
//!
//! Byte-for-byte reconstructions of configuration descriptors from
//! real devices, reduced to the descriptors that matter for endpoint
//! extraction (class-specific MIDI/HID descriptors included so the
//! parser has realistic noise to skip).

/// Assemble a configuration blob from its descriptors, patching
/// wTotalLength in the configuration header.
fn config(descriptors: &[&[u8]]) -> Vec<u8> {
    let mut blob: Vec<u8> = descriptors.concat();
    let total = blob.len() as u16;
    blob[2..4].copy_from_slice(&total.to_le_bytes());
    blob
}

fn config_header(num_interfaces: u8) -> [u8; 9] {
    // wTotalLength backpatched by config()
    [0x09, 0x02, 0, 0, num_interfaces, 0x01, 0x00, 0x80, 0x32]
}

/// MIDI controller keyboard: audio-control interface followed by a
/// MIDI streaming interface with bulk OUT 0x02 and bulk IN 0x81.
pub fn arturia_keylabmkii() -> Vec<u8> {
    config(&[
        &config_header(2),
        // interface 0: audio control
        &[0x09, 0x04, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00],
        // CS audio-control header, points at the streaming interface
        &[0x09, 0x24, 0x01, 0x00, 0x01, 0x09, 0x00, 0x01, 0x01],
        // interface 1: MIDI streaming
        &[0x09, 0x04, 0x01, 0x00, 0x02, 0x01, 0x03, 0x00, 0x00],
        // CS MS header
        &[0x07, 0x24, 0x01, 0x00, 0x01, 0x41, 0x00],
        // MIDI IN jack (embedded)
        &[0x06, 0x24, 0x02, 0x01, 0x01, 0x00],
        // MIDI OUT jack (embedded)
        &[0x09, 0x24, 0x03, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00],
        // endpoint OUT 0x02, bulk (audio-style 9-byte form)
        &[0x09, 0x05, 0x02, 0x02, 0x40, 0x00, 0x00, 0x00, 0x00],
        // CS MS bulk endpoint
        &[0x05, 0x25, 0x01, 0x01, 0x01],
        // endpoint IN 0x81, bulk
        &[0x09, 0x05, 0x81, 0x02, 0x40, 0x00, 0x00, 0x00, 0x00],
        &[0x05, 0x25, 0x01, 0x01, 0x02],
    ])
}

/// Stage piano: same topology, endpoints IN 0x82 / OUT 0x03.
pub fn yamaha_cp73() -> Vec<u8> {
    config(&[
        &config_header(2),
        &[0x09, 0x04, 0x00, 0x00, 0x00, 0x01, 0x01, 0x00, 0x00],
        &[0x09, 0x24, 0x01, 0x00, 0x01, 0x09, 0x00, 0x01, 0x01],
        &[0x09, 0x04, 0x01, 0x00, 0x02, 0x01, 0x03, 0x00, 0x00],
        &[0x07, 0x24, 0x01, 0x00, 0x01, 0x41, 0x00],
        &[0x06, 0x24, 0x02, 0x01, 0x01, 0x00],
        &[0x09, 0x24, 0x03, 0x01, 0x02, 0x01, 0x01, 0x01, 0x00],
        &[0x09, 0x05, 0x82, 0x02, 0x40, 0x00, 0x00, 0x00, 0x00],
        &[0x05, 0x25, 0x01, 0x01, 0x02],
        &[0x09, 0x05, 0x03, 0x02, 0x40, 0x00, 0x00, 0x00, 0x00],
        &[0x05, 0x25, 0x01, 0x01, 0x01],
    ])
}

/// USB stick: single BBB interface, bulk IN 0x81 / OUT 0x02.
pub fn sandisk_32gen1() -> Vec<u8> {
    config(&[
        &config_header(1),
        &[0x09, 0x04, 0x00, 0x00, 0x02, 0x08, 0x06, 0x50, 0x00],
        &[0x07, 0x05, 0x81, 0x02, 0x40, 0x00, 0x00],
        &[0x07, 0x05, 0x02, 0x02, 0x40, 0x00, 0x00],
    ])
}

/// Portable SSD: OUT endpoint listed first, 512-byte packets.
pub fn samsung_ssd_t5() -> Vec<u8> {
    config(&[
        &config_header(1),
        &[0x09, 0x04, 0x00, 0x00, 0x02, 0x08, 0x06, 0x50, 0x00],
        &[0x07, 0x05, 0x02, 0x02, 0x00, 0x02, 0x00],
        &[0x07, 0x05, 0x81, 0x02, 0x00, 0x02, 0x00],
    ])
}

/// Gaming mouse: boot-protocol mouse with interrupt IN 0x81.
pub fn logi_g502() -> Vec<u8> {
    config(&[
        &config_header(1),
        &[0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x02, 0x00],
        // HID descriptor
        &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x43, 0x00],
        &[0x07, 0x05, 0x81, 0x03, 0x40, 0x00, 0x01],
    ])
}

/// Dual-function wireless receiver: keyboard interface (interrupt IN
/// 0x81) then mouse interface (interrupt IN 0x82).
pub fn logi_rec2() -> Vec<u8> {
    config(&[
        &config_header(2),
        &[0x09, 0x04, 0x00, 0x00, 0x01, 0x03, 0x01, 0x01, 0x00],
        &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x3F, 0x00],
        &[0x07, 0x05, 0x81, 0x03, 0x08, 0x00, 0x08],
        &[0x09, 0x04, 0x01, 0x00, 0x01, 0x03, 0x01, 0x02, 0x00],
        &[0x09, 0x21, 0x11, 0x01, 0x00, 0x01, 0x22, 0x54, 0x00],
        &[0x07, 0x05, 0x82, 0x03, 0x08, 0x00, 0x08],
    ])
}
