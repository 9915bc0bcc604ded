//! Device registry and lifecycle.
//!
//! A [`Context`] owns every programmer discovered on its transports;
//! applications hold plain [`DeviceId`] handles into it rather than
//! references, so there are no cyclic back-pointers and no device outlives
//! its context. Backends append devices during their scan; devices start
//! CLOSED and are opened explicitly.
//!
//! [`Device`] is also where the address-window bookkeeping lives: it
//! validates ranges before any wire contact, skips redundant SET_ADDRESS
//! requests when the cursor already points at the requested data, and
//! advances the cursors by whatever the backend actually delivered. The
//! cursor is never rolled back on error; a caller retries by naming the
//! exact range it wants, which reseats the window.

use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;

use crate::driver::ProgrammerOps;
use crate::error::{Error, Result};
use crate::window::AddressWindow;
use crate::wire::{Bus, Capabilities, ChipCommand, ChipId, EraseBlock, MAX_CHIP_IDS};

/// Stable handle to a device owned by a [`Context`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(usize);

/// Lifecycle state of a programmer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DeviceState {
    Closed,
    Open,
}

/// One programmer known to the context.
///
/// Wraps a backend's [`ProgrammerOps`] with lifecycle state, descriptor
/// strings, and the address window.
pub struct Device {
    manufacturer: Option<String>,
    product: Option<String>,
    serial: Option<String>,
    state: DeviceState,
    window: AddressWindow,
    ops: Box<dyn ProgrammerOps>,
}

impl Device {
    /// Wrap a backend in a CLOSED device.
    pub fn new(ops: Box<dyn ProgrammerOps>) -> Self {
        Self {
            manufacturer: None,
            product: None,
            serial: None,
            state: DeviceState::Closed,
            window: AddressWindow::new(),
            ops,
        }
    }

    /// Attach descriptor strings captured during discovery.
    pub fn set_identification(
        &mut self,
        manufacturer: Option<String>,
        product: Option<String>,
        serial: Option<String>,
    ) {
        self.manufacturer = manufacturer;
        self.product = product;
        self.serial = serial;
    }

    /// Manufacturer name, when the descriptors provide one
    pub fn manufacturer(&self) -> Option<&str> {
        self.manufacturer.as_deref()
    }

    /// Product name, when the descriptors provide one
    pub fn product(&self) -> Option<&str> {
        self.product.as_deref()
    }

    /// Serial number, when the descriptors provide one
    pub fn serial(&self) -> Option<&str> {
        self.serial.as_deref()
    }

    /// Whether the device has been opened
    pub fn is_open(&self) -> bool {
        self.state == DeviceState::Open
    }

    /// The current address window
    pub fn window(&self) -> &AddressWindow {
        &self.window
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            DeviceState::Open => Ok(()),
            DeviceState::Closed => Err(Error::InvalidArgument),
        }
    }

    /// Open the programmer: claim its interface and bring the hardware to
    /// an operational state.
    pub fn open(&mut self) -> Result<()> {
        self.ops.dev_open()?;
        self.state = DeviceState::Open;
        Ok(())
    }

    /// Close the programmer, restoring hardware defaults and aborting any
    /// outstanding transfers.
    pub fn close(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.ops.dev_close()?;
        self.state = DeviceState::Closed;
        Ok(())
    }

    /// Query the capabilities record. Permitted on a CLOSED device; every
    /// other command requires OPEN.
    pub fn get_capabilities(&mut self) -> Result<Capabilities> {
        self.ops.get_capabilities()
    }

    /// Select the bus connecting programmer and chip.
    pub fn set_bus(&mut self, bus: Bus) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_bus(bus)
    }

    /// Request a bus clock; returns the frequency actually configured.
    pub fn set_clock(&mut self, clock_khz: u32) -> Result<u32> {
        self.ensure_open()?;
        self.ops.set_clock(clock_khz)
    }

    /// Read the identification records of attached chips.
    pub fn read_chip_id(&mut self) -> Result<[ChipId; MAX_CHIP_IDS]> {
        self.ensure_open()?;
        self.ops.read_chip_id()
    }

    /// Declare the address window for bulk transfers. Resets both cursors
    /// to `start` and discards any buffered bulk data.
    pub fn set_address(&mut self, start: u32, end: u32) -> Result<()> {
        self.ensure_open()?;
        if end < start {
            return Err(Error::InvalidArgument);
        }
        self.ops.set_address(start, end)?;
        self.window.set(start, end)
    }

    /// Configure the erase-block geometry of chip `chip_idx`.
    pub fn set_erase_size(&mut self, chip_idx: u8, blocks: &[EraseBlock]) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_erase_size(chip_idx, blocks)
    }

    /// Configure the erase command of chip `chip_idx`.
    pub fn set_erase_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_erase_command(chip_idx, cmd)
    }

    /// Configure the write command of chip `chip_idx`.
    pub fn set_write_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_write_command(chip_idx, cmd)
    }

    /// Declare the size of chip `chip_idx`.
    pub fn set_chip_size(&mut self, chip_idx: u8, size: u32) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_chip_size(chip_idx, size)
    }

    /// Configure SPI power-up and chip-select timing.
    pub fn set_spi_timing(&mut self, tpu_read_us: u16, tces_ns: u32) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_spi_timing(tpu_read_us, tces_ns)
    }

    /// Set the chip supply voltage.
    pub fn set_vdd(&mut self, vdd_mv: u16, enable: bool) -> Result<()> {
        self.ensure_open()?;
        self.ops.set_vdd(vdd_mv, enable)
    }

    /// Read one byte from `addr`.
    pub fn read8(&mut self, addr: u32) -> Result<u8> {
        self.ensure_open()?;
        self.ops.read8(addr)
    }

    /// Read a 16-bit word from `addr`.
    pub fn read16(&mut self, addr: u32) -> Result<u16> {
        self.ensure_open()?;
        self.ops.read16(addr)
    }

    /// Read a 32-bit word from `addr`.
    pub fn read32(&mut self, addr: u32) -> Result<u32> {
        self.ensure_open()?;
        self.ops.read32(addr)
    }

    /// Write one byte to `addr`.
    pub fn write8(&mut self, addr: u32, data: u8) -> Result<()> {
        self.ensure_open()?;
        self.ops.write8(addr, data)
    }

    /// Write a 16-bit word to `addr`.
    pub fn write16(&mut self, addr: u32, data: u16) -> Result<()> {
        self.ensure_open()?;
        self.ops.write16(addr, data)
    }

    /// Write a 32-bit word to `addr`.
    pub fn write32(&mut self, addr: u32, data: u32) -> Result<()> {
        self.ensure_open()?;
        self.ops.write32(addr, data)
    }

    /// Bulk-read `dest.len()` bytes continuing at the read cursor.
    ///
    /// Fails with an argument error before issuing any transfer if the
    /// request reaches past the declared window. Exactly `dest.len()`
    /// bytes are written on success; bytes past the failure point are
    /// never touched.
    pub fn read_n(&mut self, dest: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        if dest.is_empty() {
            return Ok(());
        }
        if (dest.len() as u64) > self.window.remaining_read() {
            return Err(Error::InvalidArgument);
        }
        let got = self.ops.read_n(dest)?;
        self.window.advance_read(got as u64);
        if got < dest.len() {
            log::error!("bulk read delivered {} of {} bytes", got, dest.len());
            return Err(Error::Protocol);
        }
        Ok(())
    }

    /// Bulk-read `dest.len()` bytes starting at `addr`.
    ///
    /// When the read cursor already points at `addr` and the declared
    /// window covers the request, this continues the existing stream
    /// without another SET_ADDRESS round-trip; otherwise it declares
    /// exactly the requested range first.
    pub fn read(&mut self, addr: u32, dest: &mut [u8]) -> Result<()> {
        self.ensure_open()?;
        if dest.is_empty() {
            return Ok(());
        }
        let last = addr as u64 + dest.len() as u64 - 1;
        if last > u32::MAX as u64 {
            return Err(Error::InvalidArgument);
        }
        if self.window.pread() != addr as u64 || (self.window.end() as u64) < last {
            self.set_address(addr, last as u32)?;
        }
        self.read_n(dest)
    }

    /// Bulk-write `src` continuing at the write cursor.
    pub fn write_n(&mut self, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if src.is_empty() {
            return Ok(());
        }
        if (src.len() as u64) > self.window.remaining_write() {
            return Err(Error::InvalidArgument);
        }
        let sent = self.ops.write_n(src)?;
        self.window.advance_write(sent as u64);
        if sent < src.len() {
            log::error!("bulk write accepted {} of {} bytes", sent, src.len());
            return Err(Error::Protocol);
        }
        Ok(())
    }

    /// Bulk-write `src` starting at `addr`, declaring the range first when
    /// the write cursor is not already positioned there.
    pub fn write(&mut self, addr: u32, src: &[u8]) -> Result<()> {
        self.ensure_open()?;
        if src.is_empty() {
            return Ok(());
        }
        let last = addr as u64 + src.len() as u64 - 1;
        if last > u32::MAX as u64 {
            return Err(Error::InvalidArgument);
        }
        if self.window.pwrite() != addr as u64 || (self.window.end() as u64) < last {
            self.set_address(addr, last as u32)?;
        }
        self.write_n(src)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.ops.dev_close();
        }
    }
}

/// Process-wide QiProg state: owns every discovered device.
///
/// Dropping the context closes and tears down all of them.
pub struct Context {
    devices: Vec<Device>,
}

impl Context {
    /// Create an empty context. Backends populate it through their scan
    /// functions.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
        }
    }

    /// Take ownership of a discovered device, returning its handle.
    pub fn add_device(&mut self, dev: Device) -> DeviceId {
        self.devices.push(dev);
        DeviceId(self.devices.len() - 1)
    }

    /// Number of devices in the registry
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    /// Whether the registry holds no devices
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Handles of every registered device, in discovery order
    pub fn ids(&self) -> impl Iterator<Item = DeviceId> {
        (0..self.devices.len()).map(DeviceId)
    }

    /// Borrow a device by handle.
    pub fn device(&self, id: DeviceId) -> Option<&Device> {
        self.devices.get(id.0)
    }

    /// Mutably borrow a device by handle.
    pub fn device_mut(&mut self, id: DeviceId) -> Option<&mut Device> {
        self.devices.get_mut(id.0)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}
