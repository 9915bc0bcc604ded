//! Host-side command marshaller.
//!
//! [`Master`] turns typed programmer calls into wire requests over any
//! [`WireTransport`]. Every command follows the same rigid pattern: pack
//! 32-bit arguments into the two 16-bit request fields (most-significant
//! half first), serialize the body little-endian through the codec, issue
//! the request, parse the reply. Arguments that can be rejected without
//! wire contact are rejected here.
//!
//! The bulk-read path additionally carries the leftover buffer: bulk
//! endpoints move whole packets, callers ask for arbitrary byte counts, so
//! the surplus of the last packet is retained and handed out first on the
//! next call. A new SET_ADDRESS discards it.

use alloc::vec;
use alloc::vec::Vec;

use crate::codec::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};
use crate::driver::ProgrammerOps;
use crate::error::{Error, Result};
use crate::transport::{WireTransport, DEFAULT_TIMEOUT_MS};
use crate::wire::{
    encode_erase_sizes, encode_set_address, parse_chip_ids, split_u32, Bus, Capabilities,
    ChipCommand, ChipId, CtrlRequest, EraseBlock, CAPABILITIES_LEN, CAPABILITIES_XFER_LEN,
    CHIP_ID_LEN, CTRL_BUF_SIZE, MAX_CHIP_IDS, SET_ADDRESS_LEN,
};

/// Command marshaller speaking the QiProg wire format over a transport.
///
/// This is the host half of the protocol: the device half is the
/// translator in `qiprog-device`, which demarshals the same wire traffic
/// back into driver calls.
pub struct Master<T> {
    xport: T,
    /// Endpoint-packet bytes read ahead of caller demand, valid
    /// immediately after the read cursor in chip-address order.
    leftover: Vec<u8>,
}

impl<T: WireTransport> Master<T> {
    /// Wrap a transport. The wire is not opened until
    /// [`dev_open`](ProgrammerOps::dev_open).
    pub fn new(xport: T) -> Self {
        Self {
            xport,
            leftover: Vec::new(),
        }
    }

    /// Access the underlying transport.
    pub fn transport(&self) -> &T {
        &self.xport
    }

    fn request_in(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        buf: &mut [u8],
    ) -> Result<usize> {
        self.xport
            .request_in(code, field_a, field_b, buf, DEFAULT_TIMEOUT_MS)
    }

    fn request_out(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        data: &[u8],
    ) -> Result<()> {
        self.xport
            .request_out(code, field_a, field_b, data, DEFAULT_TIMEOUT_MS)
    }
}

impl<T: WireTransport> ProgrammerOps for Master<T> {
    fn dev_open(&mut self) -> Result<()> {
        self.xport.open()
    }

    fn dev_close(&mut self) -> Result<()> {
        self.leftover.clear();
        self.xport.close()
    }

    fn get_capabilities(&mut self) -> Result<Capabilities> {
        let mut buf = [0u8; CAPABILITIES_XFER_LEN];
        let got = self.request_in(CtrlRequest::GetCapabilities, 0, 0, &mut buf)?;
        if got < CAPABILITIES_LEN {
            log::error!("short capabilities reply: {} bytes", got);
            return Err(Error::Protocol);
        }
        Capabilities::parse(&buf)
    }

    fn set_bus(&mut self, bus: Bus) -> Result<()> {
        if bus.is_empty() {
            return Err(Error::InvalidArgument);
        }
        let (hi, lo) = split_u32(bus.bits());
        self.request_out(CtrlRequest::SetBus, hi, lo, &[])
    }

    fn set_clock(&mut self, clock_khz: u32) -> Result<u32> {
        let (hi, lo) = split_u32(clock_khz);
        let mut buf = [0u8; 4];
        let got = self.request_in(CtrlRequest::SetClock, hi, lo, &mut buf)?;
        if got < 4 {
            return Err(Error::Protocol);
        }
        Ok(read_u32_le(&buf, 0))
    }

    fn read_chip_id(&mut self) -> Result<[ChipId; MAX_CHIP_IDS]> {
        let mut buf = [0u8; CHIP_ID_LEN * MAX_CHIP_IDS];
        let got = self.request_in(CtrlRequest::ReadDeviceId, 0, 0, &mut buf)?;
        if got < buf.len() {
            log::error!("short chip-id reply: {} bytes", got);
            return Err(Error::Protocol);
        }
        parse_chip_ids(&buf)
    }

    fn set_address(&mut self, start: u32, end: u32) -> Result<()> {
        if end < start {
            return Err(Error::InvalidArgument);
        }
        log::trace!("setting address range {:#010x} -> {:#010x}", start, end);
        let mut buf = [0u8; SET_ADDRESS_LEN];
        encode_set_address(start, end, &mut buf)?;
        self.request_out(CtrlRequest::SetAddress, 0, 0, &buf)?;
        // Bytes buffered from the previous range are stale now.
        self.leftover.clear();
        Ok(())
    }

    fn set_erase_size(&mut self, chip_idx: u8, blocks: &[EraseBlock]) -> Result<()> {
        let mut buf = [0u8; CTRL_BUF_SIZE];
        let len = encode_erase_sizes(blocks, &mut buf)?;
        self.request_out(CtrlRequest::SetEraseSize, 0, chip_idx as u16, &buf[..len])
    }

    fn set_erase_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()> {
        let mut buf = [0u8; ChipCommand::LEN];
        cmd.encode(&mut buf)?;
        self.request_out(CtrlRequest::SetEraseCommand, 0, chip_idx as u16, &buf)
    }

    fn set_write_command(&mut self, chip_idx: u8, cmd: ChipCommand) -> Result<()> {
        let mut buf = [0u8; ChipCommand::LEN];
        cmd.encode(&mut buf)?;
        self.request_out(CtrlRequest::SetWriteCommand, 0, chip_idx as u16, &buf)
    }

    fn set_chip_size(&mut self, chip_idx: u8, size: u32) -> Result<()> {
        let mut buf = [0u8; 4];
        write_u32_le(size, &mut buf, 0);
        self.request_out(CtrlRequest::SetChipSize, 0, chip_idx as u16, &buf)
    }

    fn set_spi_timing(&mut self, tpu_read_us: u16, tces_ns: u32) -> Result<()> {
        if tces_ns > 0xFFFF {
            return Err(Error::InvalidArgument);
        }
        self.request_out(CtrlRequest::SetSpiTiming, tpu_read_us, tces_ns as u16, &[])
    }

    fn set_vdd(&mut self, vdd_mv: u16, enable: bool) -> Result<()> {
        self.request_out(CtrlRequest::SetVdd, vdd_mv, enable as u16, &[])
    }

    fn read8(&mut self, addr: u32) -> Result<u8> {
        let (hi, lo) = split_u32(addr);
        let mut buf = [0u8; 1];
        let got = self.request_in(CtrlRequest::Read8, hi, lo, &mut buf)?;
        if got < 1 {
            return Err(Error::Protocol);
        }
        Ok(buf[0])
    }

    fn read16(&mut self, addr: u32) -> Result<u16> {
        let (hi, lo) = split_u32(addr);
        let mut buf = [0u8; 2];
        let got = self.request_in(CtrlRequest::Read16, hi, lo, &mut buf)?;
        if got < 2 {
            return Err(Error::Protocol);
        }
        Ok(read_u16_le(&buf, 0))
    }

    fn read32(&mut self, addr: u32) -> Result<u32> {
        let (hi, lo) = split_u32(addr);
        let mut buf = [0u8; 4];
        let got = self.request_in(CtrlRequest::Read32, hi, lo, &mut buf)?;
        if got < 4 {
            return Err(Error::Protocol);
        }
        Ok(read_u32_le(&buf, 0))
    }

    fn write8(&mut self, addr: u32, data: u8) -> Result<()> {
        let (hi, lo) = split_u32(addr);
        self.request_out(CtrlRequest::Write8, hi, lo, &[data])
    }

    fn write16(&mut self, addr: u32, data: u16) -> Result<()> {
        let (hi, lo) = split_u32(addr);
        let mut buf = [0u8; 2];
        write_u16_le(data, &mut buf, 0);
        self.request_out(CtrlRequest::Write16, hi, lo, &buf)
    }

    fn write32(&mut self, addr: u32, data: u32) -> Result<()> {
        let (hi, lo) = split_u32(addr);
        let mut buf = [0u8; 4];
        write_u32_le(data, &mut buf, 0);
        self.request_out(CtrlRequest::Write32, hi, lo, &buf)
    }

    fn read_n(&mut self, dest: &mut [u8]) -> Result<usize> {
        let n = dest.len();
        let mut filled = 0;

        // Hand out buffered bytes from the previous call first.
        if !self.leftover.is_empty() {
            let take = n.min(self.leftover.len());
            dest[..take].copy_from_slice(&self.leftover[..take]);
            self.leftover.drain(..take);
            filled = take;
            if filled == n {
                return Ok(filled);
            }
        }

        // Whole endpoint packets stream straight into the caller's buffer.
        let ep = self.xport.max_packet_in();
        if ep == 0 {
            return Err(Error::InvalidArgument);
        }
        let whole = (n - filled) / ep * ep;
        if whole > 0 {
            let got = self.xport.bulk_in(&mut dest[filled..filled + whole])?;
            filled += got;
            if got < whole {
                return Ok(filled);
            }
        }

        // A sub-packet remainder still costs one endpoint-sized packet;
        // surplus bytes go into the leftover buffer for the next call.
        let tail = n - filled;
        if tail > 0 {
            let mut pkt = vec![0u8; ep];
            let got = self.xport.bulk_in(&mut pkt)?;
            let take = tail.min(got);
            dest[filled..filled + take].copy_from_slice(&pkt[..take]);
            filled += take;
            self.leftover.clear();
            self.leftover.extend_from_slice(&pkt[take..got]);
        }

        Ok(filled)
    }

    fn write_n(&mut self, src: &[u8]) -> Result<usize> {
        let ep = self.xport.max_packet_out();
        if ep == 0 {
            return Err(Error::InvalidArgument);
        }
        let whole = src.len() / ep * ep;
        let mut sent = 0;

        if whole > 0 {
            sent = self.xport.bulk_out(&src[..whole])?;
            if sent < whole {
                return Ok(sent);
            }
        }

        // Trailing sub-packet chunk goes out as a single short packet.
        if src.len() > whole {
            sent += self.xport.bulk_out(&src[whole..])?;
        }

        Ok(sent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::collections::VecDeque;

    const EP_SIZE: usize = 64;

    #[derive(Debug, PartialEq)]
    struct Request {
        code: u8,
        field_a: u16,
        field_b: u16,
        body: Vec<u8>,
        wanted: usize,
    }

    /// Scripted transport: records every request, replays canned control
    /// replies, and serves bulk reads from a byte stream in endpoint-sized
    /// packets.
    struct MockTransport {
        requests: Vec<Request>,
        replies: VecDeque<Vec<u8>>,
        bulk_stream: VecDeque<u8>,
        bulk_sink: Vec<Vec<u8>>,
    }

    impl MockTransport {
        fn new() -> Self {
            Self {
                requests: Vec::new(),
                replies: VecDeque::new(),
                bulk_stream: VecDeque::new(),
                bulk_sink: Vec::new(),
            }
        }

        fn push_reply(&mut self, reply: &[u8]) {
            self.replies.push_back(reply.to_vec());
        }

        fn stream(&mut self, data: &[u8]) {
            self.bulk_stream.extend(data.iter().copied());
        }
    }

    impl WireTransport for MockTransport {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn request_in(
            &mut self,
            code: CtrlRequest,
            field_a: u16,
            field_b: u16,
            buf: &mut [u8],
            _timeout_ms: u32,
        ) -> Result<usize> {
            self.requests.push(Request {
                code: code as u8,
                field_a,
                field_b,
                body: Vec::new(),
                wanted: buf.len(),
            });
            let reply = self.replies.pop_front().expect("unscripted IN request");
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
            self.requests.push(Request {
                code: code as u8,
                field_a,
                field_b,
                body: data.to_vec(),
                wanted: 0,
            });
            Ok(())
        }

        fn bulk_in(&mut self, dest: &mut [u8]) -> Result<usize> {
            assert_eq!(dest.len() % EP_SIZE, 0);
            let mut filled = 0;
            while filled < dest.len() && !self.bulk_stream.is_empty() {
                let take = EP_SIZE.min(self.bulk_stream.len());
                for b in dest[filled..filled + take].iter_mut() {
                    *b = self.bulk_stream.pop_front().unwrap();
                }
                filled += take;
                if take < EP_SIZE {
                    break;
                }
            }
            Ok(filled)
        }

        fn bulk_out(&mut self, src: &[u8]) -> Result<usize> {
            self.bulk_sink.push(src.to_vec());
            Ok(src.len())
        }

        fn max_packet_in(&self) -> usize {
            EP_SIZE
        }

        fn max_packet_out(&self) -> usize {
            EP_SIZE
        }
    }

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 + 3) as u8).collect()
    }

    #[test]
    fn test_capability_query_wire() {
        let mut xport = MockTransport::new();
        let mut reply = [0u8; CAPABILITIES_XFER_LEN];
        reply[..14].copy_from_slice(&[
            0x01, 0x00, 0x0A, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xE4, 0x0C, 0x08, 0x07,
        ]);
        xport.push_reply(&reply);

        let mut master = Master::new(xport);
        let caps = master.get_capabilities().unwrap();
        assert_eq!(caps.instruction_set, 1);
        assert_eq!(caps.bus_master, Bus::ISA | Bus::SPI);
        assert_eq!(caps.max_direct_data, 0);
        assert_eq!(caps.supported_voltages(), &[3300, 1800]);

        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x00);
        assert_eq!((req.field_a, req.field_b), (0, 0));
        assert_eq!(req.wanted, 0x20);
    }

    #[test]
    fn test_set_bus_spi_wire() {
        let mut master = Master::new(MockTransport::new());
        master.set_bus(Bus::SPI).unwrap();
        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x01);
        assert_eq!((req.field_a, req.field_b), (0, 8));
        assert!(req.body.is_empty());
    }

    #[test]
    fn test_set_bus_rejects_empty_mask() {
        let mut master = Master::new(MockTransport::new());
        assert_eq!(master.set_bus(Bus::empty()), Err(Error::InvalidArgument));
        assert!(master.transport().requests.is_empty());
    }

    #[test]
    fn test_read8_wire() {
        let mut xport = MockTransport::new();
        xport.push_reply(&[0x5A]);
        let mut master = Master::new(xport);
        assert_eq!(master.read8(0xFFBC_0000).unwrap(), 0x5A);
        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x30);
        assert_eq!((req.field_a, req.field_b), (0xFFBC, 0x0000));
        assert_eq!(req.wanted, 1);
    }

    #[test]
    fn test_read32_is_little_endian() {
        let mut xport = MockTransport::new();
        xport.push_reply(&[0xEF, 0xBE, 0xAD, 0xDE]);
        let mut master = Master::new(xport);
        assert_eq!(master.read32(0xFFBC_0000).unwrap(), 0xDEAD_BEEF);
    }

    #[test]
    fn test_write32_wire() {
        let mut master = Master::new(MockTransport::new());
        master.write32(0xFFFF_FFF0, 0x00C0_FFEE).unwrap();
        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x35);
        assert_eq!((req.field_a, req.field_b), (0xFFFF, 0xFFF0));
        assert_eq!(req.body, [0xEE, 0xFF, 0xC0, 0x00]);
    }

    #[test]
    fn test_set_address_wire() {
        let mut master = Master::new(MockTransport::new());
        master.set_address(0xFFFF_FC00, 0xFFFF_FFFF).unwrap();
        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x04);
        assert_eq!((req.field_a, req.field_b), (0, 0));
        assert_eq!(req.body, [0x00, 0xFC, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_set_address_rejects_inverted_range() {
        let mut master = Master::new(MockTransport::new());
        assert_eq!(
            master.set_address(0x1000, 0x0FFF),
            Err(Error::InvalidArgument)
        );
        assert!(master.transport().requests.is_empty());
    }

    #[test]
    fn test_set_spi_timing_validates_tces() {
        let mut master = Master::new(MockTransport::new());
        assert_eq!(
            master.set_spi_timing(10, 0x1_0000),
            Err(Error::InvalidArgument)
        );
        master.set_spi_timing(10, 50).unwrap();
        let req = &master.transport().requests[0];
        assert_eq!(req.code, 0x20);
        assert_eq!((req.field_a, req.field_b), (10, 50));
    }

    #[test]
    fn test_erase_sizes_rejected_before_wire() {
        let mut master = Master::new(MockTransport::new());
        let blocks = [EraseBlock { kind: 1, size: 4096 }; 13];
        assert_eq!(
            master.set_erase_size(0, &blocks),
            Err(Error::InvalidArgument)
        );
        assert!(master.transport().requests.is_empty());
    }

    #[test]
    fn test_read_n_buffers_packet_surplus() {
        let data = pattern(1024);
        let mut xport = MockTransport::new();
        xport.stream(&data);
        let mut master = Master::new(xport);

        // 15 bytes wanted: one packet comes off the wire, 49 bytes wait in
        // the leftover buffer.
        let mut head = [0u8; 15];
        assert_eq!(master.read_n(&mut head).unwrap(), 15);
        assert_eq!(head, data[..15]);
        assert_eq!(master.leftover.len(), EP_SIZE - 15);
        assert_eq!(master.transport().bulk_stream.len(), 1024 - EP_SIZE);

        // The continuation drains the leftover before touching the wire.
        let mut rest = [0u8; 497];
        assert_eq!(master.read_n(&mut rest).unwrap(), 497);
        assert_eq!(rest[..], data[15..512]);
        assert!(master.leftover.is_empty());
        assert_eq!(master.transport().bulk_stream.len(), 512);
    }

    #[test]
    fn test_read_n_does_not_touch_bytes_past_count() {
        let mut xport = MockTransport::new();
        xport.stream(&pattern(64));
        let mut master = Master::new(xport);

        let mut buf = [0xAAu8; 40];
        assert_eq!(master.read_n(&mut buf[..10]).unwrap(), 10);
        assert!(buf[10..].iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_set_address_discards_leftover() {
        let data = pattern(128);
        let mut xport = MockTransport::new();
        xport.stream(&data);
        let mut master = Master::new(xport);

        let mut head = [0u8; 10];
        master.read_n(&mut head).unwrap();
        assert!(!master.leftover.is_empty());

        master.set_address(0, 0xFFFF).unwrap();
        assert!(master.leftover.is_empty());
    }

    #[test]
    fn test_read_n_reports_short_stream() {
        let mut xport = MockTransport::new();
        xport.stream(&pattern(128));
        let mut master = Master::new(xport);

        let mut buf = [0u8; 256];
        // Only two packets exist; the stream dries up mid-transfer.
        assert_eq!(master.read_n(&mut buf).unwrap(), 128);
    }

    #[test]
    fn test_write_n_splits_trailing_short_packet() {
        let mut master = Master::new(MockTransport::new());
        let data = pattern(100);
        assert_eq!(master.write_n(&data).unwrap(), 100);
        let sink = &master.transport().bulk_sink;
        assert_eq!(sink.len(), 2);
        assert_eq!(sink[0], data[..64]);
        assert_eq!(sink[1], data[64..]);
    }

    #[test]
    fn test_write_n_whole_packets_single_submission() {
        let mut master = Master::new(MockTransport::new());
        let data = pattern(128);
        assert_eq!(master.write_n(&data).unwrap(), 128);
        assert_eq!(master.transport().bulk_sink.len(), 1);
    }
}
