//! Control-transfer setup packets
//!
//! Builders for the handful of standard requests the enumerator issues.
//! Serialisation is the 8-byte little-endian wire image, verified
//! against on-the-wire captures.

/// Standard request codes used by the host.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Request {
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetConfiguration = 0x09,
}

/// bmRequestType direction bit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    HostToDevice,
    DeviceToHost,
}

/// An 8-byte SETUP payload.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SetupPayload {
    pub bm_request_type: u8,
    pub b_request: u8,
    pub w_value: u16,
    pub w_index: u16,
    pub w_length: u16,
}

impl SetupPayload {
    /// Wire image, little-endian multi-byte fields.
    pub fn to_bytes(self) -> [u8; 8] {
        let mut bytes = [0u8; 8];
        bytes[0] = self.bm_request_type;
        bytes[1] = self.b_request;
        bytes[2..4].copy_from_slice(&self.w_value.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.w_index.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.w_length.to_le_bytes());
        bytes
    }

    pub fn direction(self) -> Direction {
        if self.bm_request_type & 0x80 != 0 {
            Direction::DeviceToHost
        } else {
            Direction::HostToDevice
        }
    }

    /// GET_DESCRIPTOR for a descriptor type/index, reading `length`
    /// bytes.
    pub fn get_descriptor(descriptor_type: u8, index: u8, language_id: u16, length: u16) -> Self {
        SetupPayload {
            bm_request_type: 0x80, // device-to-host, standard, device
            b_request: Request::GetDescriptor as u8,
            w_value: ((descriptor_type as u16) << 8) | index as u16,
            w_index: language_id,
            w_length: length,
        }
    }

    pub fn set_address(address: u8) -> Self {
        SetupPayload {
            bm_request_type: 0x00, // host-to-device, standard, device
            b_request: Request::SetAddress as u8,
            w_value: address as u16,
            w_index: 0,
            w_length: 0,
        }
    }

    pub fn set_configuration(configuration: u8) -> Self {
        SetupPayload {
            bm_request_type: 0x00,
            b_request: Request::SetConfiguration as u8,
            w_value: configuration as u16,
            w_index: 0,
            w_length: 0,
        }
    }
}
