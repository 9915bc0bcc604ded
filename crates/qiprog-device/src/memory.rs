//! In-memory flash chip driver.
//!
//! Emulates a flash chip mapped at the top of the 32-bit address space,
//! the way LPC/FWH firmware hubs appear to a host. Useful as the attached
//! driver when testing the translator, and as the chip behind the
//! loopback transport.

use alloc::vec;
use alloc::vec::Vec;

use qiprog_core::codec::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use qiprog_core::driver::ProgrammerOps;
use qiprog_core::error::{Error, Result};
use qiprog_core::window::AddressWindow;
use qiprog_core::wire::{
    id_method, Bus, Capabilities, ChipCommand, ChipId, EraseBlock, MAX_CHIP_IDS, MAX_VOLTAGES,
};

/// Configuration for the emulated chip
#[derive(Debug, Clone)]
pub struct MemoryChipConfig {
    /// Chip size in bytes; the chip is mapped at `0x1_0000_0000 - size`
    pub size: usize,
    /// Manufacturer ID reported by the chip
    pub vendor_id: u16,
    /// Device ID reported by the chip
    pub device_id: u32,
    /// Buses the emulated programmer masters
    pub buses: Bus,
    /// Supply voltages offered, in millivolts
    pub voltages: [u16; MAX_VOLTAGES],
}

impl Default for MemoryChipConfig {
    fn default() -> Self {
        // SST49LF080A: the 1 MiB firmware hub the reference exerciser
        // knows about.
        Self {
            size: 1024 * 1024,
            vendor_id: 0xBF,
            device_id: 0x5B,
            buses: Bus::LPC | Bus::FWH,
            voltages: [3300, 1800, 0, 0, 0, 0, 0, 0, 0, 0],
        }
    }
}

/// In-memory chip driver
pub struct MemoryChip {
    config: MemoryChipConfig,
    data: Vec<u8>,
    window: AddressWindow,
    bus: Option<Bus>,
    vdd_mv: u16,
}

impl MemoryChip {
    /// Create a blank (all 0xFF) chip with the given configuration.
    pub fn new(config: MemoryChipConfig) -> Self {
        let data = vec![0xFF; config.size];
        Self {
            config,
            data,
            window: AddressWindow::new(),
            bus: None,
            vdd_mv: 0,
        }
    }

    /// Create a blank chip with the default configuration.
    pub fn new_default() -> Self {
        Self::new(MemoryChipConfig::default())
    }

    /// Create a chip pre-filled with `initial_data`.
    pub fn with_data(config: MemoryChipConfig, initial_data: &[u8]) -> Self {
        let mut chip = Self::new(config);
        let len = initial_data.len().min(chip.data.len());
        chip.data[..len].copy_from_slice(&initial_data[..len]);
        chip
    }

    /// First chip address; the chip occupies `base()..=0xFFFF_FFFF`.
    pub fn base(&self) -> u32 {
        ((1u64 << 32) - self.config.size as u64) as u32
    }

    /// The chip contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable access to the chip contents
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The bus selected by the last SET_BUS, if any
    pub fn selected_bus(&self) -> Option<Bus> {
        self.bus
    }

    /// The VDD currently supplied to the chip, in millivolts (0 when off)
    pub fn vdd_mv(&self) -> u16 {
        self.vdd_mv
    }

    /// Translate a chip address plus length into a data offset. An access
    /// outside the chip gets no answer from the bus.
    fn offset(&self, addr: u64, len: usize) -> Result<usize> {
        let off = addr
            .checked_sub(self.base() as u64)
            .ok_or(Error::NoResponse)? as usize;
        if off + len > self.data.len() {
            return Err(Error::NoResponse);
        }
        Ok(off)
    }
}

impl ProgrammerOps for MemoryChip {
    fn dev_open(&mut self) -> Result<()> {
        Ok(())
    }

    fn dev_close(&mut self) -> Result<()> {
        // Power-on defaults: no bus selected, VDD off.
        self.bus = None;
        self.vdd_mv = 0;
        Ok(())
    }

    fn get_capabilities(&mut self) -> Result<Capabilities> {
        Ok(Capabilities {
            instruction_set: 0,
            bus_master: self.config.buses,
            max_direct_data: 0,
            voltages: self.config.voltages,
        })
    }

    fn set_bus(&mut self, bus: Bus) -> Result<()> {
        if bus.is_empty() || !self.config.buses.contains(bus) {
            return Err(Error::InvalidArgument);
        }
        self.bus = Some(bus);
        Ok(())
    }

    fn set_clock(&mut self, clock_khz: u32) -> Result<u32> {
        // Memory is as fast as asked for.
        Ok(clock_khz)
    }

    fn read_chip_id(&mut self) -> Result<[ChipId; MAX_CHIP_IDS]> {
        let mut ids = [ChipId::default(); MAX_CHIP_IDS];
        ids[0] = ChipId {
            id_method: id_method::JEDEC_ISA,
            vendor_id: self.config.vendor_id,
            device_id: self.config.device_id,
        };
        Ok(ids)
    }

    fn set_address(&mut self, start: u32, end: u32) -> Result<()> {
        self.window.set(start, end)
    }

    fn set_erase_size(&mut self, _chip_idx: u8, _blocks: &[EraseBlock]) -> Result<()> {
        Ok(())
    }

    fn set_erase_command(&mut self, _chip_idx: u8, _cmd: ChipCommand) -> Result<()> {
        Ok(())
    }

    fn set_write_command(&mut self, _chip_idx: u8, _cmd: ChipCommand) -> Result<()> {
        Ok(())
    }

    fn set_chip_size(&mut self, _chip_idx: u8, _size: u32) -> Result<()> {
        Ok(())
    }

    fn set_spi_timing(&mut self, _tpu_read_us: u16, _tces_ns: u32) -> Result<()> {
        Ok(())
    }

    fn set_vdd(&mut self, vdd_mv: u16, enable: bool) -> Result<()> {
        self.vdd_mv = if enable { vdd_mv } else { 0 };
        Ok(())
    }

    fn read8(&mut self, addr: u32) -> Result<u8> {
        let off = self.offset(addr as u64, 1)?;
        Ok(self.data[off])
    }

    fn read16(&mut self, addr: u32) -> Result<u16> {
        let off = self.offset(addr as u64, 2)?;
        Ok(read_u16_le(&self.data, off))
    }

    fn read32(&mut self, addr: u32) -> Result<u32> {
        let off = self.offset(addr as u64, 4)?;
        Ok(read_u32_le(&self.data, off))
    }

    fn write8(&mut self, addr: u32, data: u8) -> Result<()> {
        let off = self.offset(addr as u64, 1)?;
        // Flash programming only clears bits; erase sets them.
        self.data[off] &= data;
        Ok(())
    }

    fn write16(&mut self, addr: u32, data: u16) -> Result<()> {
        let off = self.offset(addr as u64, 2)?;
        let mut buf = [0u8; 2];
        write_u16_le(data, &mut buf, 0);
        self.data[off] &= buf[0];
        self.data[off + 1] &= buf[1];
        Ok(())
    }

    fn write32(&mut self, addr: u32, data: u32) -> Result<()> {
        let off = self.offset(addr as u64, 4)?;
        let mut buf = [0u8; 4];
        write_u32_le(data, &mut buf, 0);
        for (i, &b) in buf.iter().enumerate() {
            self.data[off + i] &= b;
        }
        Ok(())
    }

    fn read_n(&mut self, dest: &mut [u8]) -> Result<usize> {
        if (dest.len() as u64) > self.window.remaining_read() {
            return Err(Error::InvalidArgument);
        }
        let off = self.offset(self.window.pread(), dest.len())?;
        dest.copy_from_slice(&self.data[off..off + dest.len()]);
        self.window.advance_read(dest.len() as u64);
        Ok(dest.len())
    }

    fn write_n(&mut self, src: &[u8]) -> Result<usize> {
        if (src.len() as u64) > self.window.remaining_write() {
            return Err(Error::InvalidArgument);
        }
        let off = self.offset(self.window.pwrite(), src.len())?;
        for (dst, &b) in self.data[off..off + src.len()].iter_mut().zip(src) {
            *dst &= b;
        }
        self.window.advance_write(src.len() as u64);
        Ok(src.len())
    }
}
