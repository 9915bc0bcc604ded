//! The programmer command surface.
//!
//! Every QiProg backend exposes the same set of operations, one per
//! protocol command. On the host this is implemented by the USB master,
//! which marshals each call onto the wire; inside firmware it is
//! implemented directly by chip drivers, which the device-side translator
//! dispatches wire requests to. A trait gives every backend the same
//! polymorphism a table of function pointers would, with compiler-checked
//! signatures.

use crate::error::Result;
use crate::wire::{Bus, Capabilities, ChipCommand, ChipId, EraseBlock, MAX_CHIP_IDS};

/// Operations a QiProg programmer supports.
///
/// Bulk transfers ([`read_n`](Self::read_n), [`write_n`](Self::write_n))
/// stream from the cursor established by the last
/// [`set_address`](Self::set_address); the registry layer owns the cursor
/// bookkeeping and range checks, implementations own the byte streams.
pub trait ProgrammerOps {
    /// Bring the programmer to an operational state (claim the USB
    /// interface, configure hardware).
    fn dev_open(&mut self) -> Result<()>;

    /// Release the programmer and restore hardware power-on defaults.
    fn dev_close(&mut self) -> Result<()> {
        Ok(())
    }

    /// Query the capabilities record.
    fn get_capabilities(&mut self) -> Result<Capabilities>;

    /// Select the bus connecting programmer and chip. The mask must name
    /// at least one bus.
    fn set_bus(&mut self, bus: Bus) -> Result<()>;

    /// Request a bus clock of `clock_khz`; returns the frequency actually
    /// configured.
    fn set_clock(&mut self, clock_khz: u32) -> Result<u32>;

    /// Read the identification records of attached chips. The list
    /// terminates at the first record with a zero method.
    fn read_chip_id(&mut self) -> Result<[ChipId; MAX_CHIP_IDS]>;

    /// Declare the address window for subsequent bulk transfers and reset
    /// the transfer cursors to `start`. Any buffered bulk data from a
    /// previous window is discarded.
    fn set_address(&mut self, start: u32, end: u32) -> Result<()>;

    /// Configure the erase-block geometry of chip `chip_idx`.
    fn set_erase_size(&mut self, chip_idx: u8, blocks: &[EraseBlock]) -> Result<()>;

    /// Configure the erase command of chip `chip_idx`.
    fn set_erase_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()>;

    /// Configure the write command of chip `chip_idx`.
    fn set_write_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()>;

    /// Declare the size in bytes of chip `chip_idx`.
    fn set_chip_size(&mut self, chip_idx: u8, size: u32) -> Result<()>;

    /// Configure SPI timing: power-up time in microseconds and
    /// chip-enable setup time in nanoseconds (at most 0xFFFF).
    fn set_spi_timing(&mut self, tpu_read_us: u16, tces_ns: u32) -> Result<()>;

    /// Set the chip supply voltage in millivolts and switch it on or off.
    fn set_vdd(&mut self, vdd_mv: u16, enable: bool) -> Result<()>;

    /// Read one byte from `addr`.
    fn read8(&mut self, addr: u32) -> Result<u8>;

    /// Read a 16-bit word from `addr`.
    fn read16(&mut self, addr: u32) -> Result<u16>;

    /// Read a 32-bit word from `addr`.
    fn read32(&mut self, addr: u32) -> Result<u32>;

    /// Write one byte to `addr`.
    fn write8(&mut self, addr: u32, data: u8) -> Result<()>;

    /// Write a 16-bit word to `addr`.
    fn write16(&mut self, addr: u32, data: u16) -> Result<()>;

    /// Write a 32-bit word to `addr`.
    fn write32(&mut self, addr: u32, data: u32) -> Result<()>;

    /// Stream `dest.len()` bytes from the read cursor into `dest`.
    ///
    /// Returns the number of bytes actually delivered. A short count means
    /// the stream failed partway; the cursor then rests on the last
    /// delivered byte so a retry can reissue the remainder. Bytes past the
    /// delivered count are never touched.
    fn read_n(&mut self, dest: &mut [u8]) -> Result<usize>;

    /// Stream `src` to the write cursor. Returns the number of bytes
    /// actually accepted; a short count means the stream failed partway.
    fn write_n(&mut self, src: &[u8]) -> Result<usize>;
}
