//! Verify command implementation

use std::fs;
use std::path::Path;

use qiprog_core::registry::Device;

use super::{identify_chip, read_flash_with_progress};

pub fn run(dev: &mut Device, input: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let chip = identify_chip(dev)?;

    let expected = fs::read(input)?;
    if expected.len() != chip.size as usize {
        return Err(format!(
            "file size of {} is different than chip size of {}",
            expected.len(),
            chip.size
        )
        .into());
    }

    println!("Attempting to read flash chip...");
    let actual = read_flash_with_progress(dev, chip.size)?;

    if actual == expected {
        println!("Match!");
        Ok(())
    } else {
        let mismatches = actual
            .iter()
            .zip(&expected)
            .filter(|(a, b)| a != b)
            .count();
        Err(format!("verification failed: {} bytes differ", mismatches).into())
    }
}
