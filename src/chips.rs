//! Minimal flash chip list.
//!
//! This is an example list, not a database: just enough entries to size a
//! read or write against the chips the test rig actually carries.

/// Parameters of one known flash chip
pub struct FlashChip {
    pub vendor_id: u16,
    pub device_id: u32,
    /// Chip size in bytes
    pub size: u32,
    pub name: &'static str,
}

const MIB: u32 = 1 << 20;

pub const CHIP_LIST: &[FlashChip] = &[
    FlashChip {
        vendor_id: 0xBF,
        device_id: 0x4C,
        size: 2 * MIB,
        name: "SST49LF160C",
    },
    FlashChip {
        vendor_id: 0xBF,
        device_id: 0x5B,
        size: MIB,
        name: "SST49LF080A",
    },
];

/// Look a chip up by the IDs it reported
pub fn find(vendor_id: u16, device_id: u32) -> Option<&'static FlashChip> {
    CHIP_LIST
        .iter()
        .find(|c| c.vendor_id == vendor_id && c.device_id == device_id)
}
