//! The USB device translator.
//!
//! Interprets inbound QiProg wire requests and passes them to the driver
//! attached to the flash bus. The translator owns the device-side address
//! window and the four-slot ring that keeps bulk IN packets ready for the
//! USB stack, so the stream stays ahead of the host without unbounded
//! buffering.
//!
//! Control handling is synchronous: the USB stack hands over
//! `(bRequest, wValue, wIndex, body)` of any vendor request on the QiProg
//! interface and sends the returned reply bytes back to the host. An error
//! return means the control endpoint should be STALL'ed.

use alloc::vec;
use alloc::vec::Vec;

use qiprog_core::codec::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use qiprog_core::driver::ProgrammerOps;
use qiprog_core::error::{Error, Result};
use qiprog_core::window::AddressWindow;
use qiprog_core::wire::{
    encode_chip_ids, parse_erase_sizes, parse_set_address, join_u32, Bus, ChipCommand,
    CtrlRequest, CAPABILITIES_LEN, CHIP_ID_LEN, CTRL_BUF_SIZE, MAX_CHIP_IDS,
};

/// Number of bulk IN packets buffered ahead of the host
pub const BULK_RING_SLOTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskState {
    Idle,
    ReadySend,
}

/// One slot of the bulk IN ring
struct BulkTask {
    buf: Vec<u8>,
    len: usize,
    state: TaskState,
}

impl BulkTask {
    fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0; capacity],
            len: 0,
            state: TaskState::Idle,
        }
    }
}

/// Device-side QiProg translator wrapping one attached driver.
pub struct Translator<D> {
    drv: D,
    window: AddressWindow,
    /// No bulk data moves before the first SET_ADDRESS.
    have_window: bool,
    ctrl_buf: [u8; CTRL_BUF_SIZE],
    tasks: [BulkTask; BULK_RING_SLOTS],
    head: usize,
    max_tx_packet: usize,
}

impl<D: ProgrammerOps> Translator<D> {
    /// Attach a driver and open it. `max_tx_packet` is the max packet size
    /// of the bulk IN endpoint the USB stack exposes.
    pub fn new(mut drv: D, max_tx_packet: usize) -> Result<Self> {
        if max_tx_packet == 0 {
            return Err(Error::InvalidArgument);
        }
        drv.dev_open()?;
        Ok(Self {
            drv,
            window: AddressWindow::new(),
            have_window: false,
            ctrl_buf: [0; CTRL_BUF_SIZE],
            tasks: [
                BulkTask::new(max_tx_packet),
                BulkTask::new(max_tx_packet),
                BulkTask::new(max_tx_packet),
                BulkTask::new(max_tx_packet),
            ],
            head: 0,
            max_tx_packet,
        })
    }

    /// Close the attached driver, restoring hardware defaults.
    pub fn close(&mut self) -> Result<()> {
        self.drv.dev_close()
    }

    /// The attached driver
    pub fn driver(&self) -> &D {
        &self.drv
    }

    /// Mutable access to the attached driver
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.drv
    }

    /// Whether bulk IN data is buffered or still due under the current
    /// window.
    pub fn bulk_in_pending(&self) -> bool {
        self.tasks.iter().any(|t| t.state == TaskState::ReadySend)
            || (self.have_window && self.window.remaining_read() > 0)
    }

    /// Handle one vendor control request.
    ///
    /// Returns the reply bytes to send back (empty for OUT requests). Call
    /// this only for transfers with type VENDOR and recipient DEVICE; any
    /// error means the request was not handled and the control endpoint
    /// should be STALL'ed.
    pub fn handle_control_request(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
    ) -> Result<&[u8]> {
        let req = CtrlRequest::from_u8(request).ok_or(Error::Protocol)?;

        let reply_len = match req {
            CtrlRequest::GetCapabilities => {
                let caps = self.drv.get_capabilities()?;
                caps.encode(&mut self.ctrl_buf)?;
                CAPABILITIES_LEN
            }
            CtrlRequest::SetBus => {
                let bus = Bus::from_bits_retain(join_u32(value, index));
                if bus.is_empty() {
                    return Err(Error::InvalidArgument);
                }
                self.drv.set_bus(bus)?;
                0
            }
            CtrlRequest::SetClock => {
                let actual = self.drv.set_clock(join_u32(value, index))?;
                write_u32_le(actual, &mut self.ctrl_buf, 0);
                4
            }
            CtrlRequest::ReadDeviceId => {
                let ids = self.drv.read_chip_id()?;
                encode_chip_ids(&ids, &mut self.ctrl_buf)?;
                CHIP_ID_LEN * MAX_CHIP_IDS
            }
            CtrlRequest::SetAddress => {
                let (start, end) = parse_set_address(data)?;
                self.drv.set_address(start, end)?;
                self.window.set(start, end)?;
                self.have_window = true;
                // Packets buffered under the old window are obsolete.
                for task in self.tasks.iter_mut() {
                    task.state = TaskState::Idle;
                }
                0
            }
            CtrlRequest::SetEraseSize => {
                let blocks = parse_erase_sizes(data)?;
                self.drv.set_erase_size(index as u8, &blocks)?;
                0
            }
            CtrlRequest::SetEraseCommand => {
                let cmd = ChipCommand::parse(data)?;
                self.drv.set_erase_command(index as u8, cmd)?;
                0
            }
            CtrlRequest::SetWriteCommand => {
                let cmd = ChipCommand::parse(data)?;
                self.drv.set_write_command(index as u8, cmd)?;
                0
            }
            CtrlRequest::SetChipSize => {
                if data.len() < 4 {
                    return Err(Error::Protocol);
                }
                self.drv.set_chip_size(index as u8, read_u32_le(data, 0))?;
                0
            }
            CtrlRequest::SetSpiTiming => {
                self.drv.set_spi_timing(value, index as u32)?;
                0
            }
            CtrlRequest::Read8 => {
                let val = self.drv.read8(join_u32(value, index))?;
                self.ctrl_buf[0] = val;
                1
            }
            CtrlRequest::Read16 => {
                let val = self.drv.read16(join_u32(value, index))?;
                write_u16_le(val, &mut self.ctrl_buf, 0);
                2
            }
            CtrlRequest::Read32 => {
                let val = self.drv.read32(join_u32(value, index))?;
                write_u32_le(val, &mut self.ctrl_buf, 0);
                4
            }
            CtrlRequest::Write8 => {
                if data.is_empty() {
                    return Err(Error::Protocol);
                }
                self.drv.write8(join_u32(value, index), data[0])?;
                0
            }
            CtrlRequest::Write16 => {
                if data.len() < 2 {
                    return Err(Error::Protocol);
                }
                self.drv.write16(join_u32(value, index), read_u16_le(data, 0))?;
                0
            }
            CtrlRequest::Write32 => {
                if data.len() < 4 {
                    return Err(Error::Protocol);
                }
                self.drv.write32(join_u32(value, index), read_u32_le(data, 0))?;
                0
            }
            CtrlRequest::SetVdd => {
                self.drv.set_vdd(value, index != 0)?;
                0
            }
        };

        Ok(&self.ctrl_buf[..reply_len])
    }

    /// One tick of the bulk IN machinery; call between USB interrupts.
    ///
    /// First offers the oldest ready packet to `send`, which returns
    /// whether the USB stack accepted the whole packet. Then, if a slot is
    /// free and the window still holds unread data, fills one more packet
    /// from the driver. Packets leave in cursor order and at most
    /// [`BULK_RING_SLOTS`] are ever buffered ahead.
    pub fn handle_events<F>(&mut self, mut send: F)
    where
        F: FnMut(&[u8]) -> bool,
    {
        let head = &mut self.tasks[self.head];
        if head.state == TaskState::ReadySend && send(&head.buf[..head.len]) {
            head.state = TaskState::Idle;
            self.head = (self.head + 1) % BULK_RING_SLOTS;
        }

        if !self.have_window || self.window.remaining_read() == 0 {
            return;
        }
        // Ready packets form a contiguous run from the head; the first
        // idle slot after it keeps the ring in cursor order.
        for i in 0..BULK_RING_SLOTS {
            let slot = (self.head + i) % BULK_RING_SLOTS;
            if self.tasks[slot].state != TaskState::Idle {
                continue;
            }
            let chunk = self.window.remaining_read().min(self.max_tx_packet as u64) as usize;
            let task = &mut self.tasks[slot];
            match self.drv.read_n(&mut task.buf[..chunk]) {
                Ok(got) if got == chunk => {
                    task.len = chunk;
                    task.state = TaskState::ReadySend;
                    self.window.advance_read(chunk as u64);
                }
                Ok(got) => {
                    log::error!("chip driver delivered {} of {} bytes", got, chunk);
                    self.window.advance_read(got as u64);
                }
                Err(e) => {
                    log::error!("chip driver bulk read failed: {}", e);
                }
            }
            break;
        }
    }

    /// Handle one packet received on the bulk OUT endpoint.
    ///
    /// Data lands at the write cursor; a packet overrunning the declared
    /// window is refused.
    pub fn handle_bulk_out(&mut self, data: &[u8]) -> Result<()> {
        if !self.have_window || (data.len() as u64) > self.window.remaining_write() {
            return Err(Error::Protocol);
        }
        let sent = self.drv.write_n(data)?;
        self.window.advance_write(sent as u64);
        if sent < data.len() {
            return Err(Error::Protocol);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryChip;
    use qiprog_core::wire::{encode_set_address, Capabilities, SET_ADDRESS_LEN};

    const EP_SIZE: usize = 64;

    fn translator() -> Translator<MemoryChip> {
        Translator::new(MemoryChip::new_default(), EP_SIZE).unwrap()
    }

    fn seeded_translator() -> Translator<MemoryChip> {
        let mut chip = MemoryChip::new_default();
        let size = chip.data().len();
        for (i, b) in chip.data_mut().iter_mut().enumerate() {
            *b = ((i * 31 + size) % 251) as u8;
        }
        Translator::new(chip, EP_SIZE).unwrap()
    }

    fn set_address(t: &mut Translator<MemoryChip>, start: u32, end: u32) {
        let mut body = [0u8; SET_ADDRESS_LEN];
        encode_set_address(start, end, &mut body).unwrap();
        let reply = t.handle_control_request(0x04, 0, 0, &body).unwrap();
        assert!(reply.is_empty());
    }

    #[test]
    fn test_unknown_opcode_stalls() {
        let mut t = translator();
        assert!(t.handle_control_request(0x09, 0, 0, &[]).is_err());
        assert!(t.handle_control_request(0xFF, 0, 0, &[]).is_err());
    }

    #[test]
    fn test_capabilities_reply_shape() {
        let mut t = translator();
        let reply = t.handle_control_request(0x00, 0, 0, &[]).unwrap().to_vec();
        assert_eq!(reply.len(), CAPABILITIES_LEN);
        let caps = Capabilities::parse(&reply).unwrap();
        assert_eq!(caps.bus_master, Bus::LPC | Bus::FWH);
        assert_eq!(caps.supported_voltages(), &[3300, 1800]);
    }

    #[test]
    fn test_read8_dispatch() {
        let mut t = seeded_translator();
        let expected = t.driver_mut().read8(0xFFF4_0000).unwrap();
        // addr 0xFFF40000 splits into wValue 0xFFF4, wIndex 0x0000
        let reply = t.handle_control_request(0x30, 0xFFF4, 0x0000, &[]).unwrap();
        assert_eq!(reply, &[expected]);
    }

    #[test]
    fn test_write32_dispatch() {
        let mut t = translator();
        let body = [0xEE, 0xFF, 0xC0, 0x00];
        let reply = t
            .handle_control_request(0x35, 0xFFFF, 0xFFF0, &body)
            .unwrap();
        assert!(reply.is_empty());
        assert_eq!(t.driver_mut().read32(0xFFFF_FFF0).unwrap(), 0x00C0_FFEE);
    }

    #[test]
    fn test_write_without_body_stalls() {
        let mut t = translator();
        assert!(t.handle_control_request(0x33, 0xFFFF, 0xFFF0, &[]).is_err());
    }

    #[test]
    fn test_set_address_rejects_inverted_range() {
        let mut t = translator();
        let mut body = [0u8; SET_ADDRESS_LEN];
        // start > end, bypassing the host-side validation
        body[..4].copy_from_slice(&[0x00, 0x10, 0x00, 0x00]);
        body[4..].copy_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        assert!(t.handle_control_request(0x04, 0, 0, &body).is_err());
    }

    #[test]
    fn test_driver_error_stalls() {
        let mut t = translator();
        // Reading from an address the chip does not decode
        assert!(t.handle_control_request(0x30, 0x0000, 0x1000, &[]).is_err());
    }

    #[test]
    fn test_ring_buffers_at_most_four_packets() {
        let mut t = seeded_translator();
        let base = t.driver().base();
        set_address(&mut t, base, base + 4095);

        // The USB stack never accepts; the ring must fill and then stop.
        for _ in 0..16 {
            t.handle_events(|_| false);
        }
        let ready = t
            .tasks
            .iter()
            .filter(|task| task.state == TaskState::ReadySend)
            .count();
        assert_eq!(ready, BULK_RING_SLOTS);
    }

    #[test]
    fn test_ring_sends_packets_in_cursor_order() {
        let mut t = seeded_translator();
        let base = t.driver().base();
        let expected: Vec<u8> = t.driver().data()[..256].to_vec();
        set_address(&mut t, base, base + 255);

        let mut received = Vec::new();
        while t.bulk_in_pending() {
            t.handle_events(|pkt| {
                received.extend_from_slice(pkt);
                true
            });
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_final_packet_may_be_short() {
        let mut t = seeded_translator();
        let base = t.driver().base();
        set_address(&mut t, base, base + 99);

        let mut lens = Vec::new();
        while t.bulk_in_pending() {
            t.handle_events(|pkt| {
                lens.push(pkt.len());
                true
            });
        }
        assert_eq!(lens, [64, 36]);
    }

    #[test]
    fn test_set_address_discards_buffered_packets() {
        let mut t = seeded_translator();
        let base = t.driver().base();
        set_address(&mut t, base, base + 4095);
        for _ in 0..8 {
            t.handle_events(|_| false);
        }

        // Re-seat the window; the previously buffered packets must not
        // leak into the new stream.
        set_address(&mut t, base + 8192, base + 8192 + 255);
        let expected: Vec<u8> = t.driver().data()[8192..8192 + 256].to_vec();
        let mut received = Vec::new();
        while t.bulk_in_pending() {
            t.handle_events(|pkt| {
                received.extend_from_slice(pkt);
                true
            });
        }
        assert_eq!(received, expected);
    }

    #[test]
    fn test_bulk_out_lands_at_write_cursor() {
        let mut t = translator();
        let base = t.driver().base();
        set_address(&mut t, base, base + 127);

        let first: Vec<u8> = (0..64).map(|i| i as u8).collect();
        let second: Vec<u8> = (64..128).map(|i| i as u8).collect();
        t.handle_bulk_out(&first).unwrap();
        t.handle_bulk_out(&second).unwrap();

        assert_eq!(&t.driver().data()[..128], &[first, second].concat()[..]);
        // The window is exhausted now.
        assert!(t.handle_bulk_out(&[0u8; 1]).is_err());
    }

    #[test]
    fn test_bulk_out_without_window_refused() {
        let mut t = translator();
        assert!(t.handle_bulk_out(&[0u8; 4]).is_err());
    }
}
