//! CLI argument parsing

use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let s = s.trim_start_matches("0x");
    u16::from_str_radix(s, 16).map_err(|e| format!("invalid hex value: {}", e))
}

#[derive(Parser)]
#[command(name = "qiprog")]
#[command(author, version, about = "QiProg flash programmer tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// USB vendor ID to match, in hex
    #[arg(long, value_parser = parse_hex_u16, default_value = "1d50", global = true)]
    pub vid: u16,

    /// USB product ID to match, in hex
    #[arg(long, value_parser = parse_hex_u16, default_value = "6076", global = true)]
    pub pid: u16,

    /// Device index when multiple programmers are connected
    #[arg(short, long, default_value_t = 0, global = true)]
    pub device: usize,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show programmer capabilities and attached chips
    Info,

    /// Read the flash chip to a file
    Read {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a file to the flash chip
    Write {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Verify chip contents against a file
    Verify {
        /// File to verify against
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Exercise the programmer with the protocol stress tests
    Test,
}
