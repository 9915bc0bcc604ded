//! Write command implementation

use std::fs;
use std::path::Path;

use qiprog_core::registry::Device;

use super::{byte_progress, identify_chip, CHUNK_SIZE, TOP};

pub fn run(dev: &mut Device, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let chip = identify_chip(dev)?;

    let data = fs::read(input)?;
    if data.len() != chip.size as usize {
        return Err(format!(
            "file size of {} is different than chip size of {}",
            data.len(),
            chip.size
        )
        .into());
    }

    let base = TOP - chip.size + 1;
    dev.set_address(base, TOP)
        .map_err(|e| format!("failed to set bulk address: {}", e))?;

    println!("Attempting to write flash chip...");
    let pb = byte_progress(data.len() as u64)?;
    let mut offset = 0usize;
    while offset < data.len() {
        let chunk = CHUNK_SIZE.min(data.len() - offset);
        dev.write_n(&data[offset..offset + chunk])
            .map_err(|e| format!("failed to bulk write chip: {}", e))?;
        offset += chunk;
        pb.set_position(offset as u64);
    }
    pb.finish_and_clear();

    println!("Wrote {} bytes from {}", data.len(), input.display());

    Ok(())
}
