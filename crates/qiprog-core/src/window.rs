//! The per-device address window and its read/write cursors.

use crate::error::{Error, Result};

/// Chip-address range declared for bulk I/O, with the read and write
/// cursors that advance through it.
///
/// `end` is inclusive; cursors are held as u64 so that a window ending at
/// `0xFFFF_FFFF` can express the exhausted position `end + 1` without
/// wrapping. Invariants: `start <= pread <= end + 1` and likewise for
/// `pwrite`. A new window resets both cursors to `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressWindow {
    start: u32,
    end: u32,
    pread: u64,
    pwrite: u64,
}

impl AddressWindow {
    /// An empty window at address zero. Any real transfer first goes
    /// through [`set`](Self::set).
    pub fn new() -> Self {
        Self {
            start: 0,
            end: 0,
            pread: 0,
            pwrite: 0,
        }
    }

    /// Declare a new range and reset both cursors to `start`.
    ///
    /// `end < start` is rejected; the protocol expresses a range reaching
    /// the top of the address space as `end = 0xFFFF_FFFF`, never by
    /// wrapping.
    pub fn set(&mut self, start: u32, end: u32) -> Result<()> {
        if end < start {
            return Err(Error::InvalidArgument);
        }
        self.start = start;
        self.end = end;
        self.pread = start as u64;
        self.pwrite = start as u64;
        Ok(())
    }

    /// First address of the window
    pub fn start(&self) -> u32 {
        self.start
    }

    /// Last address of the window (inclusive)
    pub fn end(&self) -> u32 {
        self.end
    }

    /// Next chip address the host will receive
    pub fn pread(&self) -> u64 {
        self.pread
    }

    /// Next chip address the host will send to
    pub fn pwrite(&self) -> u64 {
        self.pwrite
    }

    /// Bytes left to read before the cursor passes `end`
    pub fn remaining_read(&self) -> u64 {
        self.end as u64 + 1 - self.pread
    }

    /// Bytes left to write before the cursor passes `end`
    pub fn remaining_write(&self) -> u64 {
        self.end as u64 + 1 - self.pwrite
    }

    /// Advance the read cursor by `n` bytes
    pub fn advance_read(&mut self, n: u64) {
        debug_assert!(n <= self.remaining_read());
        self.pread += n;
    }

    /// Advance the write cursor by `n` bytes
    pub fn advance_write(&mut self, n: u64) {
        debug_assert!(n <= self.remaining_write());
        self.pwrite += n;
    }

    /// Whether the declared range covers `len` bytes starting at `addr`
    pub fn covers(&self, addr: u32, len: u64) -> bool {
        if len == 0 {
            return true;
        }
        addr >= self.start && addr as u64 + len - 1 <= self.end as u64
    }
}

impl Default for AddressWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_resets_cursors() {
        let mut w = AddressWindow::new();
        w.set(0x1000, 0x1FFF).unwrap();
        w.advance_read(0x100);
        w.advance_write(0x80);
        w.set(0x2000, 0x2FFF).unwrap();
        assert_eq!(w.pread(), 0x2000);
        assert_eq!(w.pwrite(), 0x2000);
        assert_eq!(w.remaining_read(), 0x1000);
    }

    #[test]
    fn test_rejects_inverted_range() {
        let mut w = AddressWindow::new();
        assert_eq!(w.set(0x2000, 0x1FFF), Err(Error::InvalidArgument));
    }

    #[test]
    fn test_single_byte_window() {
        let mut w = AddressWindow::new();
        w.set(0xFFBC_0000, 0xFFBC_0000).unwrap();
        assert_eq!(w.remaining_read(), 1);
        w.advance_read(1);
        assert_eq!(w.remaining_read(), 0);
    }

    #[test]
    fn test_top_of_address_space() {
        // end + 1 crosses the 32-bit boundary; remaining math stays exact.
        let mut w = AddressWindow::new();
        w.set(0xFFFF_FC00, 0xFFFF_FFFF).unwrap();
        assert_eq!(w.remaining_read(), 1024);
        w.advance_read(1024);
        assert_eq!(w.pread(), 0x1_0000_0000);
        assert_eq!(w.remaining_read(), 0);
    }

    #[test]
    fn test_covers() {
        let mut w = AddressWindow::new();
        w.set(0xFFFF_FC00, 0xFFFF_FFFF).unwrap();
        assert!(w.covers(0xFFFF_FC00, 1024));
        assert!(w.covers(0xFFFF_FFFF, 1));
        assert!(!w.covers(0xFFFF_FBFF, 1));
        assert!(!w.covers(0xFFFF_FC00, 1025));
        assert!(w.covers(0, 0));
    }
}
