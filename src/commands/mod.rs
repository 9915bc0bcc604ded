//! Command implementations

pub mod read;
pub mod verify;
pub mod write;

use indicatif::{ProgressBar, ProgressStyle};
use qiprog_core::registry::Device;
use qiprog_core::wire::present_chip_ids;

use crate::chips::{self, FlashChip};

/// Top of the 32-bit chip address space; chips are mapped so their last
/// byte sits here.
pub const TOP: u32 = 0xFFFF_FFFF;

/// Chunk size for streaming reads and writes (progress granularity)
pub const CHUNK_SIZE: usize = 32 * 1024;

/// Read the chip IDs and look the first chip up in the built-in list.
pub fn identify_chip(dev: &mut Device) -> Result<&'static FlashChip, Box<dyn std::error::Error>> {
    let ids = dev
        .read_chip_id()
        .map_err(|e| format!("error reading IDs of connected chips: {}", e))?;
    let present = present_chip_ids(&ids);

    let first = match present.first() {
        Some(id) => id,
        None => return Err("no flash chip connected to programmer".into()),
    };
    println!(
        "Identified chip with ID {:x}:{:x}",
        first.vendor_id, first.device_id
    );

    match chips::find(first.vendor_id, first.device_id) {
        Some(chip) => {
            println!("Chip is a {} ({} bytes)", chip.name, chip.size);
            Ok(chip)
        }
        None => Err("chip is not supported by this application".into()),
    }
}

/// Print the full chip-ID listing (info command).
pub fn print_chip_info(dev: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    let ids = dev
        .read_chip_id()
        .map_err(|e| format!("error reading IDs of connected chips: {}", e))?;
    let present = present_chip_ids(&ids);

    if present.is_empty() {
        println!("No flash chip connected to programmer");
        return Ok(());
    }

    for id in present {
        let known = chips::find(id.vendor_id, id.device_id);
        println!(
            "Chip ID {:x}:{:x} (method {:#04x}): {}",
            id.vendor_id,
            id.device_id,
            id.id_method,
            known.map_or("unknown chip", |c| c.name)
        );
    }
    Ok(())
}

/// Progress bar for a byte-streaming operation
pub fn byte_progress(total: u64) -> Result<ProgressBar, Box<dyn std::error::Error>> {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}

/// Read the whole chip through the bulk path with a progress bar.
pub fn read_flash_with_progress(
    dev: &mut Device,
    size: u32,
) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let base = TOP - size + 1;
    let mut data = vec![0u8; size as usize];

    dev.set_address(base, TOP)
        .map_err(|e| format!("failed to set bulk address: {}", e))?;

    let pb = byte_progress(size as u64)?;
    let mut offset = 0usize;
    while offset < data.len() {
        let chunk = CHUNK_SIZE.min(data.len() - offset);
        dev.read_n(&mut data[offset..offset + chunk])
            .map_err(|e| format!("failed to bulk read chip: {}", e))?;
        offset += chunk;
        pb.set_position(offset as u64);
    }
    pb.finish_and_clear();

    Ok(data)
}
