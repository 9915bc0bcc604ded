//! qiprog - host-side exerciser for QiProg flash programmers
//!
//! Discovers a programmer over USB, queries its capabilities and the
//! attached chip, and reads, writes, or verifies the chip through the
//! bulk transfer path. The `test` subcommand runs the protocol stress and
//! alignment suite against real hardware.

mod chips;
mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use qiprog_core::registry::{Context, Device};
use qiprog_usb::UsbMatch;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.verbose {
        0 => {}
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    if let Err(e) = run(&cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let mut ctx = Context::new();

    let found = qiprog_usb::scan_with(
        &mut ctx,
        UsbMatch {
            vid: cli.vid,
            pid: cli.pid,
        },
    )?;
    if found == 0 {
        return Err(format!(
            "no QiProg programmer found (VID:{:04x} PID:{:04x})",
            cli.vid, cli.pid
        )
        .into());
    }
    log::info!("{} programmer(s) found", found);

    let id = ctx
        .ids()
        .nth(cli.device)
        .ok_or_else(|| format!("device index {} out of range ({} found)", cli.device, found))?;
    let dev = ctx.device_mut(id).expect("handle from ids() is valid");

    dev.open().map_err(|e| format!("error opening device: {}", e))?;
    print_device_info(dev)?;

    match &cli.command {
        Commands::Info => commands::print_chip_info(dev),
        Commands::Read { output } => commands::read::run(dev, output),
        Commands::Write { input } => commands::write::run(dev, input),
        Commands::Verify { input } => commands::verify::run(dev, input),
        Commands::Test => commands::test::run(dev),
    }
}

/// Query and print the capabilities of the device
fn print_device_info(dev: &mut Device) -> Result<(), Box<dyn std::error::Error>> {
    use qiprog_core::wire::Bus;

    let caps = dev
        .get_capabilities()
        .map_err(|e| format!("error querying device capabilities: {}", e))?;

    if let Some(product) = dev.product() {
        println!("Programmer: {}", product);
    }

    let buses = [
        (Bus::ISA, "ISA"),
        (Bus::LPC, "LPC"),
        (Bus::FWH, "FWH"),
        (Bus::SPI, "SPI"),
        (Bus::BDM17, "BDM17"),
        (Bus::BDM35, "BDM35"),
        (Bus::AUD, "AUD"),
    ];
    let supported: Vec<&str> = buses
        .iter()
        .filter(|(bus, _)| caps.bus_master.contains(*bus))
        .map(|&(_, name)| name)
        .collect();
    if supported.is_empty() {
        println!("Device does not support any known bus");
    } else {
        println!("Device supports {}", supported.join(" "));
    }

    for &mv in caps.supported_voltages() {
        println!("Supported voltage: {}mV", mv);
    }

    Ok(())
}
