//! SCSI Bulk-Only wire structures
//!
//! Command Block / Command Status Wrappers and the CDB images the mass
//! storage engine issues. CBW and CSW fields are little-endian; LBA and
//! transfer length inside a CDB are big-endian, and that swap happens
//! here and nowhere else.

use num_enum::TryFromPrimitive;

pub const CBW_SIGNATURE_LE: [u8; 4] = 0x43425355u32.to_le_bytes();
pub const CSW_SIGNATURE_LE: [u8; 4] = 0x53425355u32.to_le_bytes();

pub const CBW_LEN: usize = 31;
pub const CSW_LEN: usize = 13;

/* SPC */
pub const TEST_UNIT_READY: u8 = 0x00;
pub const REQUEST_SENSE: u8 = 0x03;

/* SBC */
pub const READ_CAPACITY_10: u8 = 0x25;
pub const READ_10: u8 = 0x28;

/// bCSWStatus codes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CswStatus {
    Passed = 0x00,
    Failed = 0x01,
    PhaseError = 0x02,
}

/// CBW data-phase direction flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DataDirection {
    Out,
    In,
}

/// 6-byte CDB: opcode, four middle bytes, control, zero padding to the
/// 16-byte CBWCB field.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cdb6 {
    pub opcode: u8,
    pub misc: [u8; 4],
    pub control: u8,
}

impl Cdb6 {
    pub const LEN: u8 = 6;

    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0] = self.opcode;
        bytes[1..5].copy_from_slice(&self.misc);
        bytes[5] = self.control;
        bytes
    }
}

/// 10-byte CDB. `lba` and `transfer_len` are stored native-endian and
/// swapped to big-endian on serialisation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cdb10 {
    pub opcode: u8,
    pub flags: u8,
    pub lba: u32,
    pub group: u8,
    pub transfer_len: u16,
    pub control: u8,
}

impl Cdb10 {
    pub const LEN: u8 = 10;

    pub fn to_bytes(self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[0] = self.opcode;
        bytes[1] = self.flags;
        bytes[2..6].copy_from_slice(&self.lba.to_be_bytes());
        bytes[6] = self.group;
        bytes[7..9].copy_from_slice(&self.transfer_len.to_be_bytes());
        bytes[9] = self.control;
        bytes
    }
}

/// A Command Block Wrapper ready to serialise.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Cbw {
    pub tag: u32,
    pub data_transfer_len: u32,
    pub direction: DataDirection,
    pub lun: u8,
    pub cdb_len: u8,
    pub cdb: [u8; 16],
}

impl Cbw {
    /// 31-byte wire image.
    pub fn to_bytes(&self) -> [u8; CBW_LEN] {
        let mut bytes = [0u8; CBW_LEN];
        bytes[0..4].copy_from_slice(&CBW_SIGNATURE_LE);
        bytes[4..8].copy_from_slice(&self.tag.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.data_transfer_len.to_le_bytes());
        bytes[12] = match self.direction {
            DataDirection::In => 1 << 7,
            DataDirection::Out => 0,
        };
        bytes[13] = self.lun & 0x0F;
        bytes[14] = self.cdb_len & 0x1F;
        bytes[15..31].copy_from_slice(&self.cdb);
        bytes
    }

    pub fn test_unit_ready(tag: u32) -> Self {
        Cbw {
            tag,
            data_transfer_len: 0,
            direction: DataDirection::Out,
            lun: 0,
            cdb_len: Cdb6::LEN,
            cdb: Cdb6 {
                opcode: TEST_UNIT_READY,
                misc: [0; 4],
                control: 0,
            }
            .to_bytes(),
        }
    }

    /// Fixed-format sense data, 18 bytes.
    pub fn request_sense(tag: u32) -> Self {
        Cbw {
            tag,
            data_transfer_len: 18,
            direction: DataDirection::In,
            lun: 0,
            cdb_len: Cdb6::LEN,
            cdb: Cdb6 {
                opcode: REQUEST_SENSE,
                misc: [0, 0, 0, 18],
                control: 0,
            }
            .to_bytes(),
        }
    }

    pub fn read_capacity_10(tag: u32) -> Self {
        Cbw {
            tag,
            data_transfer_len: 8,
            direction: DataDirection::In,
            lun: 0,
            cdb_len: Cdb10::LEN,
            cdb: Cdb10 {
                opcode: READ_CAPACITY_10,
                flags: 0,
                lba: 0,
                group: 0,
                transfer_len: 0,
                control: 0,
            }
            .to_bytes(),
        }
    }

    pub fn read_10(tag: u32, lba: u32, blocks: u16, block_size: u32) -> Self {
        Cbw {
            tag,
            data_transfer_len: blocks as u32 * block_size,
            direction: DataDirection::In,
            lun: 0,
            cdb_len: Cdb10::LEN,
            cdb: Cdb10 {
                opcode: READ_10,
                flags: 0,
                lba,
                group: 0,
                transfer_len: blocks,
                control: 0,
            }
            .to_bytes(),
        }
    }
}

pub struct InvalidCswError;

/// A parsed Command Status Wrapper.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Csw {
    pub tag: u32,
    pub data_residue: u32,
    pub status: CswStatus,
}

impl Csw {
    /// Parse and validate a 13-byte CSW against the expected tag.
    pub fn from_le_bytes(bytes: &[u8], expected_tag: u32) -> Result<Csw, InvalidCswError> {
        if bytes.len() != CSW_LEN || !bytes.starts_with(&CSW_SIGNATURE_LE) {
            return Err(InvalidCswError);
        }
        let tag = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if tag != expected_tag {
            return Err(InvalidCswError);
        }
        Ok(Csw {
            tag,
            data_residue: u32::from_le_bytes(bytes[8..12].try_into().unwrap()),
            status: CswStatus::try_from(bytes[12]).map_err(|_| InvalidCswError)?,
        })
    }
}
