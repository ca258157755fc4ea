//! Descriptor types and endpoint extraction
//!
//! The parser takes the configuration-descriptor byte stream, walks
//! descriptor boundaries by `bLength` and latches the first endpoint(s)
//! matching an interface class / transfer-type filter. It is fed
//! directly from the Rx stream during enumeration; once its output is
//! valid it stops consuming and the result stays stable.

use crate::fmt::{debug, trace};
use num_enum::TryFromPrimitive;

/// Standard descriptor types (byte 1 of every descriptor).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DescriptorType {
    Device = 0x1,
    Config = 0x2,
    String = 0x3,
    Interface = 0x4,
    Endpoint = 0x5,
    DeviceQualifier = 0x6,
    OtherSpeedConfig = 0x7,
    InterfacePower = 0x8,
}

/// USB-IF interface class codes.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InterfaceClass {
    Audio = 0x01,
    Communications = 0x02,
    Hid = 0x03,
    Physical = 0x05,
    Image = 0x06,
    Printer = 0x07,
    MassStorage = 0x08,
    CdcData = 0x0A,
    SmartCard = 0x0B,
    ContentSecurity = 0x0D,
    Video = 0x0E,
    PersonalHealthcare = 0x0F,
    AudioVideo = 0x10,
    Billboard = 0x11,
    UsbCBridge = 0x12,
    BulkDisplayProto = 0x13,
    MctpUsbEp = 0x14,
    I3c = 0x3C,
    DiagnosticDevice = 0xDC,
    WirelessController = 0xE0,
    Miscellaneous = 0xEF,
    ApplicationSpecific = 0xFE,
    VendorSpecific = 0xFF,
}

/// Audio interface subclasses.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioSubClass {
    Undefined = 0x0,
    AudioControl = 0x1,
    AudioStreaming = 0x2,
    MidiStreaming = 0x3,
}

/// Audio interface protocols.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AudioProtocol {
    /// Audio Class 1.0 (or undefined).
    Audio10 = 0x00,
    /// Audio Class 2.0 (IP_VERSION_02_00).
    Audio20 = 0x20,
}

/// Mass-storage interface subclasses.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscSubClass {
    ScsiNotReported = 0x00,
    Rbc = 0x01,
    /// ATAPI (CD/DVD).
    Mmc5 = 0x02,
    /// Tape.
    Qic157 = 0x03,
    /// Floppy (USB).
    Ufi = 0x04,
    /// Floppy (ATAPI).
    Sff8070i = 0x05,
    /// SCSI transparent command set (thumbdrives).
    ScsiTransparent = 0x06,
}

/// Mass-storage interface protocols.
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MscProtocol {
    CbiWithInterrupt = 0x00,
    CbiWithoutInterrupt = 0x01,
    /// Bulk-Only Transport - most common.
    BulkOnly = 0x50,
    /// USB Attached SCSI.
    Uas = 0x62,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidSubClass {
    None = 0x00,
    BootInterface = 0x01,
}

#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HidProtocol {
    None = 0x00,
    Keyboard = 0x01,
    Mouse = 0x02,
}

/// Endpoint transfer type (low two bits of bmAttributes).
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointTransferType {
    Control = 0b00,
    Isochronous = 0b01,
    Bulk = 0b10,
    Interrupt = 0b11,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointDirection {
    Out,
    In,
}

/// bEndpointAddress: number in bits 3:0, direction in bit 7.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct EndpointAddress(pub u8);

impl EndpointAddress {
    pub fn number(self) -> u8 {
        self.0 & 0x0F
    }

    pub fn direction(self) -> EndpointDirection {
        if self.0 & 0x80 != 0 {
            EndpointDirection::In
        } else {
            EndpointDirection::Out
        }
    }
}

/// Which endpoint directions the parser must find.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EndpointFilter {
    In,
    Out,
    InAndOut,
}

/// Interface/endpoint match criteria, fixed at construction.
#[derive(Debug, Copy, Clone)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParserFilter {
    pub endpoint_filter: EndpointFilter,
    pub transfer_type: EndpointTransferType,
    pub interface_class: u8,
    pub interface_subclass: Option<u8>,
    pub interface_protocol: Option<u8>,
}

/// Latched parser result.
#[derive(Debug, Copy, Clone, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ParserOutput {
    pub i_endp: Option<EndpointAddress>,
    pub o_endp: Option<EndpointAddress>,
    pub valid: bool,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum State {
    Init,
    GetLen,
    InDescriptor,
    Done,
}

/// Streaming configuration-descriptor walker.
///
/// Byte 0 of each descriptor is its length; the parser consumes
/// `bLength - 1` further bytes, inspecting the type byte and the
/// interface/endpoint fields at their fixed offsets, then loops. The
/// first endpoint per wanted direction inside a matching interface is
/// captured; `valid` rises once all wanted directions are found.
pub struct DescriptorParser {
    filter: ParserFilter,
    state: State,
    b_length: u8,
    offset: u8,
    desc_type: u8,
    iface_class: u8,
    iface_subclass: u8,
    iface_protocol: u8,
    in_matching_interface: bool,
    endp_addr: u8,
    endp_attr: u8,
    out: ParserOutput,
}

impl DescriptorParser {
    pub const fn new(filter: ParserFilter) -> Self {
        DescriptorParser {
            filter,
            state: State::Init,
            b_length: 0,
            offset: 0,
            desc_type: 0,
            iface_class: 0,
            iface_subclass: 0,
            iface_protocol: 0,
            in_matching_interface: false,
            endp_addr: 0,
            endp_attr: 0,
            out: ParserOutput {
                i_endp: None,
                o_endp: None,
                valid: false,
            },
        }
    }

    /// Arm the parser; the next fed byte starts a descriptor.
    pub fn enable(&mut self) {
        if self.state == State::Init {
            self.state = State::GetLen;
        }
    }

    pub fn reset(&mut self) {
        let filter = self.filter;
        *self = DescriptorParser::new(filter);
    }

    pub fn output(&self) -> &ParserOutput {
        &self.out
    }

    fn want_in(&self) -> bool {
        matches!(
            self.filter.endpoint_filter,
            EndpointFilter::In | EndpointFilter::InAndOut
        )
    }

    fn want_out(&self) -> bool {
        matches!(
            self.filter.endpoint_filter,
            EndpointFilter::Out | EndpointFilter::InAndOut
        )
    }

    /// Consume one descriptor-stream byte.
    pub fn feed(&mut self, byte: u8) {
        match self.state {
            State::Init | State::Done => {}

            State::GetLen => {
                // bLength < 2 cannot frame a descriptor; stay here and
                // resynchronise on the next byte
                if byte >= 2 {
                    self.b_length = byte;
                    self.offset = 0;
                    self.state = State::InDescriptor;
                }
            }

            State::InDescriptor => {
                match self.offset {
                    // byte 1: descriptor type
                    0 => self.desc_type = byte,
                    // endpoint descriptor: byte 2 = bEndpointAddress
                    1 => {
                        if self.desc_type == DescriptorType::Endpoint as u8 {
                            self.endp_addr = byte;
                        }
                    }
                    // endpoint descriptor: byte 3 = bmAttributes
                    2 => {
                        if self.desc_type == DescriptorType::Endpoint as u8 {
                            self.endp_attr = byte;
                        }
                    }
                    // interface descriptor: bytes 5/6/7
                    4 => {
                        if self.desc_type == DescriptorType::Interface as u8 {
                            self.iface_class = byte;
                        }
                    }
                    5 => {
                        if self.desc_type == DescriptorType::Interface as u8 {
                            self.iface_subclass = byte;
                        }
                    }
                    6 => {
                        if self.desc_type == DescriptorType::Interface as u8 {
                            self.iface_protocol = byte;
                        }
                    }
                    _ => {}
                }

                if self.offset == self.b_length - 2 {
                    self.end_of_descriptor();
                } else {
                    self.offset += 1;
                }
            }
        }
    }

    fn end_of_descriptor(&mut self) {
        trace!(
            "usbh: descriptor: type={=u8:x} len={}",
            self.desc_type,
            self.b_length
        );

        if self.desc_type == DescriptorType::Interface as u8 {
            let mut matched = self.iface_class == self.filter.interface_class;
            if let Some(subclass) = self.filter.interface_subclass {
                matched &= self.iface_subclass == subclass;
            }
            if let Some(protocol) = self.filter.interface_protocol {
                matched &= self.iface_protocol == protocol;
            }
            self.in_matching_interface = matched;
        } else if self.desc_type == DescriptorType::Endpoint as u8 && self.in_matching_interface {
            let addr = EndpointAddress(self.endp_addr);
            let type_match = (self.endp_attr & 0x3) == self.filter.transfer_type as u8;
            let is_in = addr.direction() == EndpointDirection::In;

            if type_match && is_in && self.want_in() && self.out.i_endp.is_none() {
                debug!("usbh: descriptor: extracted IN ep {}", addr.number());
                self.out.i_endp = Some(addr);
            }
            if type_match && !is_in && self.want_out() && self.out.o_endp.is_none() {
                debug!("usbh: descriptor: extracted OUT ep {}", addr.number());
                self.out.o_endp = Some(addr);
            }
        }

        let all_found = (!self.want_in() || self.out.i_endp.is_some())
            && (!self.want_out() || self.out.o_endp.is_some());

        if all_found {
            self.out.valid = true;
            self.state = State::Done;
        } else {
            self.state = State::GetLen;
        }
    }
}
