//! QiProg wire format: opcodes, field packing, and record layouts.
//!
//! Control requests carry an opcode in `bRequest`, two 16-bit fields in
//! `wValue`/`wIndex`, and a fixed-layout little-endian body. All multi-byte
//! values on the wire are little-endian regardless of host byte order; every
//! record in this module serializes through [`crate::codec`].

use alloc::vec::Vec;

use bitflags::bitflags;

use crate::codec::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use crate::error::{Error, Result};

/// Default USB vendor ID of QiProg programmers (Openmoko)
pub const QIPROG_USB_VID: u16 = 0x1d50;
/// Default USB product ID of QiProg programmers (VultureProg)
pub const QIPROG_USB_PID: u16 = 0x6076;

/// Bulk IN endpoint address carrying chip-read streams
pub const BULK_EP_IN: u8 = 0x81;
/// Bulk OUT endpoint address carrying chip-write streams
pub const BULK_EP_OUT: u8 = 0x01;

/// Size of the device-side control staging buffer. No control body is ever
/// longer than this.
pub const CTRL_BUF_SIZE: usize = 64;

/// Number of bytes a capabilities record occupies on the wire
pub const CAPABILITIES_LEN: usize = 30;
/// wLength the host requests for GET_CAPABILITIES (record plus padding)
pub const CAPABILITIES_XFER_LEN: usize = 0x20;
/// Number of bytes a single chip-ID record occupies on the wire
pub const CHIP_ID_LEN: usize = 7;
/// Maximum number of chip-ID records a READ_DEVICE_ID reply carries
pub const MAX_CHIP_IDS: usize = 9;
/// Number of voltage slots in a capabilities record
pub const MAX_VOLTAGES: usize = 10;
/// Number of bytes a SET_ADDRESS body occupies on the wire
pub const SET_ADDRESS_LEN: usize = 8;
/// Number of bytes a single erase-size entry occupies on the wire
pub const ERASE_ENTRY_LEN: usize = 5;
/// Maximum erase-size or custom-command entries per control request; more
/// would overflow the 64-byte control body
pub const MAX_ERASE_ENTRIES: usize = 12;

/// QiProg control request opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlRequest {
    /// Query the capabilities record (IN, 32 bytes)
    GetCapabilities = 0x00,
    /// Select the bus to the flash chip (OUT, bus mask in the fields)
    SetBus = 0x01,
    /// Request a bus clock; the reply carries the achieved kHz (IN, 4 bytes)
    SetClock = 0x02,
    /// Read the IDs of attached chips (IN, 63 bytes)
    ReadDeviceId = 0x03,
    /// Declare the address window for bulk transfers (OUT, 8 bytes)
    SetAddress = 0x04,
    /// Configure erase-block geometry for one chip (OUT, up to 60 bytes)
    SetEraseSize = 0x05,
    /// Configure the erase command for one chip (OUT, 4 bytes)
    SetEraseCommand = 0x06,
    /// Configure the write command for one chip (OUT, 4 bytes)
    SetWriteCommand = 0x07,
    /// Declare the size of one chip (OUT, 4 bytes)
    SetChipSize = 0x08,
    /// Configure SPI power-up and chip-select timing (OUT, no body)
    SetSpiTiming = 0x20,
    /// Read one byte (IN, 1 byte)
    Read8 = 0x30,
    /// Read a 16-bit word (IN, 2 bytes)
    Read16 = 0x31,
    /// Read a 32-bit word (IN, 4 bytes)
    Read32 = 0x32,
    /// Write one byte (OUT, 1 byte)
    Write8 = 0x33,
    /// Write a 16-bit word (OUT, 2 bytes)
    Write16 = 0x34,
    /// Write a 32-bit word (OUT, 4 bytes)
    Write32 = 0x35,
    /// Set the chip supply voltage (OUT, millivolts in field_a)
    SetVdd = 0xF0,
}

impl CtrlRequest {
    /// Decode a raw `bRequest` value. Unknown opcodes yield `None`; the
    /// device side answers those with a STALL.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(Self::GetCapabilities),
            0x01 => Some(Self::SetBus),
            0x02 => Some(Self::SetClock),
            0x03 => Some(Self::ReadDeviceId),
            0x04 => Some(Self::SetAddress),
            0x05 => Some(Self::SetEraseSize),
            0x06 => Some(Self::SetEraseCommand),
            0x07 => Some(Self::SetWriteCommand),
            0x08 => Some(Self::SetChipSize),
            0x20 => Some(Self::SetSpiTiming),
            0x30 => Some(Self::Read8),
            0x31 => Some(Self::Read16),
            0x32 => Some(Self::Read32),
            0x33 => Some(Self::Write8),
            0x34 => Some(Self::Write16),
            0x35 => Some(Self::Write32),
            0xF0 => Some(Self::SetVdd),
            _ => None,
        }
    }
}

bitflags! {
    /// Bus types a QiProg programmer can master.
    ///
    /// Values may be OR'ed together to specify more than one bus.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Bus: u32 {
        /// ISA parallel flash
        const ISA   = 1 << 0;
        /// Low Pin Count
        const LPC   = 1 << 1;
        /// Firmware Hub
        const FWH   = 1 << 2;
        /// Serial Peripheral Interface
        const SPI   = 1 << 3;
        /// Motorola BDM, 17-bit
        const BDM17 = 1 << 4;
        /// Motorola BDM, 35-bit
        const BDM35 = 1 << 5;
        /// Motorola AUD
        const AUD   = 1 << 6;
    }
}

/// Split a 32-bit value into the (`field_a`, `field_b`) pair of a control
/// request: most-significant 16 bits first.
pub fn split_u32(val: u32) -> (u16, u16) {
    ((val >> 16) as u16, (val & 0xffff) as u16)
}

/// Reassemble a 32-bit value from the (`field_a`, `field_b`) pair.
pub fn join_u32(field_a: u16, field_b: u16) -> u32 {
    ((field_a as u32) << 16) | (field_b as u32)
}

/// Chip-identification methods
pub mod id_method {
    /// No chip identified; terminates a chip-ID list
    pub const NONE: u8 = 0x00;
    /// JEDEC ID sequence over a parallel bus
    pub const JEDEC_ISA: u8 = 0x01;
    /// SPI Release from Deep Power-down and Read Electronic Signature
    pub const SPI_RES: u8 = 0x20;
    /// SPI Read Electronic Manufacturer and device Signature
    pub const SPI_REMS: u8 = 0x21;
}

/// Device capabilities record.
///
/// Created by device firmware at power-on; read-only to hosts. The voltage
/// list ends at the first zero entry, or holds exactly ten voltages when no
/// zero is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// Bitwise OR of supported instruction-set bits
    pub instruction_set: u16,
    /// Buses this programmer can master; non-zero on any operational device
    pub bus_master: Bus,
    /// Maximum bytes storable through the direct-data instruction mechanism
    pub max_direct_data: u32,
    /// Supply voltages the programmer can provide, in millivolts
    pub voltages: [u16; MAX_VOLTAGES],
}

impl Capabilities {
    /// Parse a capabilities record from its wire encoding.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < CAPABILITIES_LEN {
            return Err(Error::Protocol);
        }
        let mut voltages = [0u16; MAX_VOLTAGES];
        for (i, v) in voltages.iter_mut().enumerate() {
            *v = read_u16_le(buf, 10 + 2 * i);
        }
        Ok(Self {
            instruction_set: read_u16_le(buf, 0),
            bus_master: Bus::from_bits_retain(read_u32_le(buf, 2)),
            max_direct_data: read_u32_le(buf, 6),
            voltages,
        })
    }

    /// Serialize the record into `buf`, which must hold at least
    /// [`CAPABILITIES_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < CAPABILITIES_LEN {
            return Err(Error::InvalidArgument);
        }
        write_u16_le(self.instruction_set, buf, 0);
        write_u32_le(self.bus_master.bits(), buf, 2);
        write_u32_le(self.max_direct_data, buf, 6);
        for (i, &v) in self.voltages.iter().enumerate() {
            write_u16_le(v, buf, 10 + 2 * i);
        }
        Ok(())
    }

    /// The meaningful prefix of the voltage list, up to the first zero.
    pub fn supported_voltages(&self) -> &[u16] {
        let end = self
            .voltages
            .iter()
            .position(|&v| v == 0)
            .unwrap_or(MAX_VOLTAGES);
        &self.voltages[..end]
    }
}

/// One chip-identification record (7 bytes on the wire)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChipId {
    /// How the chip was identified; [`id_method::NONE`] means no chip
    pub id_method: u8,
    /// Manufacturer ID as reported by the chip
    pub vendor_id: u16,
    /// Device ID as reported by the chip
    pub device_id: u32,
}

impl ChipId {
    /// Whether this record identifies a chip
    pub fn is_present(&self) -> bool {
        self.id_method != id_method::NONE
    }
}

/// Parse a READ_DEVICE_ID reply into nine records.
///
/// All nine slots are decoded; the list logically terminates at the first
/// record with a zero method. Use [`present_chip_ids`] to iterate just the
/// meaningful prefix.
pub fn parse_chip_ids(buf: &[u8]) -> Result<[ChipId; MAX_CHIP_IDS]> {
    if buf.len() < CHIP_ID_LEN * MAX_CHIP_IDS {
        return Err(Error::Protocol);
    }
    let mut ids = [ChipId::default(); MAX_CHIP_IDS];
    for (i, id) in ids.iter_mut().enumerate() {
        let base = i * CHIP_ID_LEN;
        id.id_method = buf[base];
        id.vendor_id = read_u16_le(buf, base + 1);
        id.device_id = read_u32_le(buf, base + 3);
    }
    Ok(ids)
}

/// Serialize nine chip-ID records into `buf` (63 bytes).
pub fn encode_chip_ids(ids: &[ChipId; MAX_CHIP_IDS], buf: &mut [u8]) -> Result<()> {
    if buf.len() < CHIP_ID_LEN * MAX_CHIP_IDS {
        return Err(Error::InvalidArgument);
    }
    for (i, id) in ids.iter().enumerate() {
        let base = i * CHIP_ID_LEN;
        buf[base] = id.id_method;
        write_u16_le(id.vendor_id, buf, base + 1);
        write_u32_le(id.device_id, buf, base + 3);
    }
    Ok(())
}

/// The meaningful prefix of a chip-ID list, up to the first absent record.
pub fn present_chip_ids(ids: &[ChipId; MAX_CHIP_IDS]) -> &[ChipId] {
    let end = ids
        .iter()
        .position(|id| !id.is_present())
        .unwrap_or(MAX_CHIP_IDS);
    &ids[..end]
}

/// Serialize a SET_ADDRESS body: `start` then inclusive `end`.
pub fn encode_set_address(start: u32, end: u32, buf: &mut [u8]) -> Result<()> {
    if buf.len() < SET_ADDRESS_LEN {
        return Err(Error::InvalidArgument);
    }
    write_u32_le(start, buf, 0);
    write_u32_le(end, buf, 4);
    Ok(())
}

/// Parse a SET_ADDRESS body into `(start, end)`.
pub fn parse_set_address(buf: &[u8]) -> Result<(u32, u32)> {
    if buf.len() < SET_ADDRESS_LEN {
        return Err(Error::Protocol);
    }
    Ok((read_u32_le(buf, 0), read_u32_le(buf, 4)))
}

/// One erase-block geometry entry: block kind tag plus block size in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseBlock {
    /// Device-defined block kind
    pub kind: u8,
    /// Block size in bytes
    pub size: u32,
}

/// Serialize erase-size entries into `buf`; returns the body length.
///
/// At most [`MAX_ERASE_ENTRIES`] entries fit in a control body.
pub fn encode_erase_sizes(blocks: &[EraseBlock], buf: &mut [u8]) -> Result<usize> {
    if blocks.len() > MAX_ERASE_ENTRIES {
        return Err(Error::InvalidArgument);
    }
    let len = blocks.len() * ERASE_ENTRY_LEN;
    if buf.len() < len {
        return Err(Error::InvalidArgument);
    }
    for (i, block) in blocks.iter().enumerate() {
        let base = i * ERASE_ENTRY_LEN;
        buf[base] = block.kind;
        write_u32_le(block.size, buf, base + 1);
    }
    Ok(len)
}

/// Parse a SET_ERASE_SIZE body. The body length must be a whole number of
/// entries, no more than [`MAX_ERASE_ENTRIES`].
pub fn parse_erase_sizes(buf: &[u8]) -> Result<Vec<EraseBlock>> {
    if buf.len() % ERASE_ENTRY_LEN != 0 || buf.len() / ERASE_ENTRY_LEN > MAX_ERASE_ENTRIES {
        return Err(Error::Protocol);
    }
    let mut blocks = Vec::with_capacity(buf.len() / ERASE_ENTRY_LEN);
    for chunk_base in (0..buf.len()).step_by(ERASE_ENTRY_LEN) {
        blocks.push(EraseBlock {
            kind: buf[chunk_base],
            size: read_u32_le(buf, chunk_base + 1),
        });
    }
    Ok(blocks)
}

/// Erase- or write-command configuration for one chip (4 bytes on the wire)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipCommand {
    /// Primary command byte
    pub cmd: u8,
    /// Secondary command byte
    pub subcmd: u8,
    /// Command-specific flags
    pub flags: u16,
}

impl ChipCommand {
    /// Number of bytes the record occupies on the wire
    pub const LEN: usize = 4;

    /// Serialize into `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<()> {
        if buf.len() < Self::LEN {
            return Err(Error::InvalidArgument);
        }
        buf[0] = self.cmd;
        buf[1] = self.subcmd;
        write_u16_le(self.flags, buf, 2);
        Ok(())
    }

    /// Parse from a 4-byte wire body.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < Self::LEN {
            return Err(Error::Protocol);
        }
        Ok(Self {
            cmd: buf[0],
            subcmd: buf[1],
            flags: read_u16_le(buf, 2),
        })
    }
}
