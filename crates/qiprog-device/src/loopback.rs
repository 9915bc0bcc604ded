//! Loopback wire: host marshaller connected straight to the translator.
//!
//! Control requests and bulk streams take the same path they would over
//! USB - serialized by the host [`Master`], demarshalled by the
//! [`Translator`], executed by the attached driver - minus the physical
//! bus. This is how the protocol engine is exercised end to end in tests
//! and how an application can drive a virtual programmer.
//!
//! [`Master`]: qiprog_core::master::Master

use qiprog_core::error::Result;
use qiprog_core::transport::WireTransport;
use qiprog_core::wire::CtrlRequest;

use qiprog_core::driver::ProgrammerOps;

use crate::translator::Translator;

/// A [`WireTransport`] that feeds a device-side translator directly.
pub struct LoopbackTransport<D> {
    translator: Translator<D>,
    packet_size: usize,
}

impl<D: ProgrammerOps> LoopbackTransport<D> {
    /// Build a loopback wire around `drv` with `packet_size`-byte bulk
    /// packets.
    pub fn new(drv: D, packet_size: usize) -> Result<Self> {
        Ok(Self {
            translator: Translator::new(drv, packet_size)?,
            packet_size,
        })
    }

    /// The translator at the far end of the wire
    pub fn translator(&self) -> &Translator<D> {
        &self.translator
    }

    /// Mutable access to the translator at the far end of the wire
    pub fn translator_mut(&mut self) -> &mut Translator<D> {
        &mut self.translator
    }
}

impl<D: ProgrammerOps> WireTransport for LoopbackTransport<D> {
    fn open(&mut self) -> Result<()> {
        // The translator opened its driver at construction.
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        self.translator.close()
    }

    fn request_in(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        buf: &mut [u8],
        _timeout_ms: u32,
    ) -> Result<usize> {
        let reply = self
            .translator
            .handle_control_request(code as u8, field_a, field_b, &[])?;
        let n = reply.len().min(buf.len());
        buf[..n].copy_from_slice(&reply[..n]);
        Ok(n)
    }

    fn request_out(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        data: &[u8],
        _timeout_ms: u32,
    ) -> Result<()> {
        self.translator
            .handle_control_request(code as u8, field_a, field_b, data)?;
        Ok(())
    }

    fn bulk_in(&mut self, dest: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        let mut idle_ticks = 0;
        while filled < dest.len() && self.translator.bulk_in_pending() {
            let mut delivered = None;
            let space = &mut dest[filled..];
            self.translator.handle_events(|pkt| {
                let take = pkt.len().min(space.len());
                space[..take].copy_from_slice(&pkt[..take]);
                delivered = Some(take);
                true
            });
            match delivered {
                Some(n) => {
                    filled += n;
                    idle_ticks = 0;
                    // A short packet is the device's end-of-window marker.
                    if n < self.packet_size {
                        break;
                    }
                }
                None => {
                    // One idle tick is normal (the ring fills before it
                    // sends); two in a row means the driver stalled.
                    idle_ticks += 1;
                    if idle_ticks > 1 {
                        break;
                    }
                }
            }
        }
        Ok(filled)
    }

    fn bulk_out(&mut self, src: &[u8]) -> Result<usize> {
        let mut sent = 0;
        for chunk in src.chunks(self.packet_size) {
            self.translator.handle_bulk_out(chunk)?;
            sent += chunk.len();
        }
        Ok(sent)
    }

    fn max_packet_in(&self) -> usize {
        self.packet_size
    }

    fn max_packet_out(&self) -> usize {
        self.packet_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryChip, MemoryChipConfig};
    use alloc::boxed::Box;
    use alloc::vec;
    use qiprog_core::error::Error;
    use qiprog_core::master::Master;
    use qiprog_core::registry::Device;
    use qiprog_core::wire::{present_chip_ids, Bus};

    const EP_SIZE: usize = 64;
    const TOP: u32 = 0xFFFF_FFFF;

    /// Full host stack over a seeded 1 MiB chip: registry device ->
    /// marshaller -> loopback wire -> translator -> chip.
    fn open_loopback_device() -> Device {
        let mut chip = MemoryChip::new(MemoryChipConfig::default());
        for (i, b) in chip.data_mut().iter_mut().enumerate() {
            *b = ((i * 131 + 17) % 256) as u8;
        }
        let xport = LoopbackTransport::new(chip, EP_SIZE).unwrap();
        let mut dev = Device::new(Box::new(Master::new(xport)));
        dev.open().unwrap();
        dev
    }

    fn chip_byte(i: usize) -> u8 {
        ((i * 131 + 17) % 256) as u8
    }

    #[test]
    fn test_capability_query_end_to_end() {
        let mut dev = open_loopback_device();
        let caps = dev.get_capabilities().unwrap();
        assert_eq!(caps.bus_master, Bus::LPC | Bus::FWH);
        assert_eq!(caps.supported_voltages(), &[3300, 1800]);
    }

    #[test]
    fn test_chip_id_end_to_end() {
        let mut dev = open_loopback_device();
        let ids = dev.read_chip_id().unwrap();
        let present = present_chip_ids(&ids);
        assert_eq!(present.len(), 1);
        assert_eq!(present[0].vendor_id, 0xBF);
        assert_eq!(present[0].device_id, 0x5B);
    }

    #[test]
    fn test_register_io_end_to_end() {
        let mut dev = open_loopback_device();
        dev.set_bus(Bus::LPC).unwrap();

        let addr = 0xFFF4_0000;
        assert_eq!(dev.read8(addr).unwrap(), chip_byte(0x0004_0000));

        dev.write32(0xFFFF_FFF0, 0x00C0_FFEE).unwrap();
        // Flash writes clear bits in the previous contents.
        let prior = |i: usize| chip_byte(0x000F_FFF0 + i);
        let expect = [
            0xEE & prior(0),
            0xFF & prior(1),
            0xC0 & prior(2),
            0x00 & prior(3),
        ];
        assert_eq!(dev.read8(0xFFFF_FFF0).unwrap(), expect[0]);
        assert_eq!(dev.read8(0xFFFF_FFF1).unwrap(), expect[1]);
        assert_eq!(dev.read8(0xFFFF_FFF2).unwrap(), expect[2]);
        assert_eq!(dev.read8(0xFFFF_FFF3).unwrap(), expect[3]);
    }

    #[test]
    fn test_bulk_read_top_1k() {
        let mut dev = open_loopback_device();
        let size = 1024usize;
        let base = TOP - size as u32 + 1;

        dev.set_address(base, TOP).unwrap();
        let mut buf = vec![0u8; size];
        dev.read_n(&mut buf).unwrap();

        let chip_off = 0x10_0000 - size;
        for (i, &b) in buf.iter().enumerate() {
            assert_eq!(b, chip_byte(chip_off + i));
        }
        // The cursor sits one past the top of the 32-bit space.
        assert_eq!(dev.window().pread(), 0x1_0000_0000);
    }

    #[test]
    fn test_overrun_invariance() {
        // The first alignment test of the reference exerciser: a 15-byte
        // read into a poisoned 1 KiB buffer must leave bytes 15.. intact.
        let mut dev = open_loopback_device();
        let size = 1024usize;
        let base = TOP - size as u32 + 1;
        let chip_off = 0x10_0000 - size;

        let mut buf = vec![0xA5u8; size];
        dev.set_address(base, TOP).unwrap();
        dev.read_n(&mut buf[..15]).unwrap();

        for i in 0..15 {
            assert_eq!(buf[i], chip_byte(chip_off + i), "byte {} misread", i);
        }
        for i in 15..size {
            assert_eq!(buf[i], 0xA5, "byte {} overwritten", i);
        }
    }

    #[test]
    fn test_resumable_read() {
        // Continuation of the overrun test: the next read must pick up at
        // byte 15 with no intervening SET_ADDRESS.
        let mut dev = open_loopback_device();
        let size = 1024usize;
        let base = TOP - size as u32 + 1;
        let chip_off = 0x10_0000 - size;

        let mut buf = vec![0u8; size];
        dev.set_address(base, TOP).unwrap();
        dev.read_n(&mut buf[..15]).unwrap();
        dev.read_n(&mut buf[15..512]).unwrap();

        for i in 0..512 {
            assert_eq!(buf[i], chip_byte(chip_off + i), "byte {} misread", i);
        }
    }

    #[test]
    fn test_split_read_matches_single_read() {
        let mut dev = open_loopback_device();
        let base = 0xFFF8_0000;
        let len = 2048usize;

        let mut whole = vec![0u8; len];
        dev.read(base, &mut whole).unwrap();

        let mut split = vec![0u8; len];
        let cuts = [0usize, 15, 64, 65, 700, 1024, 2048];
        for pair in cuts.windows(2) {
            let (from, to) = (pair[0], pair[1]);
            dev.read(base + from as u32, &mut split[from..to]).unwrap();
        }

        assert_eq!(whole, split);
    }

    #[test]
    fn test_buffer_discard_on_new_address() {
        // After a read that consumes only part of the declared range, a
        // fresh SET_ADDRESS plus full-range read must match a pristine
        // read: no leakage from the abandoned stream on either side.
        let mut dev = open_loopback_device();
        let size = 1024usize;
        let base = TOP - size as u32 + 1;
        let chip_off = 0x10_0000 - size;

        dev.set_address(base, TOP).unwrap();
        let mut partial = vec![0u8; 100];
        dev.read_n(&mut partial).unwrap();

        dev.set_address(base, TOP).unwrap();
        let mut full = vec![0u8; size];
        dev.read_n(&mut full).unwrap();

        for i in 0..size {
            assert_eq!(full[i], chip_byte(chip_off + i), "stale byte {}", i);
        }
    }

    #[test]
    fn test_bulk_write_end_to_end() {
        let chip = MemoryChip::new_default();
        let len = 1000usize;
        let base = TOP - len as u32 + 1;
        let xport = LoopbackTransport::new(chip, EP_SIZE).unwrap();
        let mut dev = Device::new(Box::new(Master::new(xport)));
        dev.open().unwrap();

        let payload: alloc::vec::Vec<u8> = (0..len).map(|i| (i % 256) as u8).collect();
        dev.write(base, &payload).unwrap();
        assert_eq!(dev.window().pwrite(), TOP as u64 + 1);

        let mut readback = vec![0u8; len];
        dev.read(base, &mut readback).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn test_read_past_end_rejected_before_transfers() {
        let mut dev = open_loopback_device();
        dev.set_address(TOP - 63, TOP).unwrap();
        let mut buf = vec![0u8; 65];
        assert_eq!(dev.read_n(&mut buf), Err(Error::InvalidArgument));
        // The stream is still intact afterwards.
        dev.read_n(&mut buf[..64]).unwrap();
    }
}
