//! Read command implementation

use std::fs;
use std::path::Path;

use qiprog_core::registry::Device;

use super::{identify_chip, read_flash_with_progress};

pub fn run(dev: &mut Device, output: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let chip = identify_chip(dev)?;

    println!("Attempting to read flash chip...");
    let data = read_flash_with_progress(dev, chip.size)?;

    fs::write(output, &data)?;
    println!("Wrote {} bytes to {}", data.len(), output.display());

    Ok(())
}
