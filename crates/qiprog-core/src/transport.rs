//! The wire-transport abstraction.
//!
//! A transport hides the mechanism that moves QiProg requests: vendor
//! control transfers plus bulk endpoints for real USB hardware, or a
//! direct hand-off into the device-side translator for loopback setups.
//! The host marshaller ([`crate::master`]) is generic over this trait and
//! never touches a USB API itself.

use crate::error::Result;
use crate::wire::CtrlRequest;

/// Timeout applied to each wire operation, in milliseconds
pub const DEFAULT_TIMEOUT_MS: u32 = 3000;

/// A bidirectional wire to one QiProg programmer.
///
/// Control requests are synchronous and carry an opcode, two 16-bit
/// fields, and a small fixed-layout body. Bulk transfers stream
/// endpoint-sized packets; how deeply they are pipelined is the
/// implementation's business.
pub trait WireTransport {
    /// Establish the wire (open the USB handle and claim the interface).
    fn open(&mut self) -> Result<()>;

    /// Tear the wire down, aborting outstanding transfers.
    fn close(&mut self) -> Result<()>;

    /// Issue an IN control request and fill `buf` with the reply.
    /// Returns the number of bytes received.
    fn request_in(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize>;

    /// Issue an OUT control request carrying `data` as its body.
    fn request_out(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<()>;

    /// Stream bulk IN data into `dest`, whose length must be a multiple of
    /// [`max_packet_in`](Self::max_packet_in). Returns the number of bytes
    /// delivered; a short count means the stream failed or ended early,
    /// and bytes past it are untouched.
    fn bulk_in(&mut self, dest: &mut [u8]) -> Result<usize>;

    /// Stream `src` out over the bulk pipe. `src` is either a whole number
    /// of packets or a single short packet. Returns the number of bytes
    /// accepted; a short count means the stream failed partway.
    fn bulk_out(&mut self, src: &[u8]) -> Result<usize>;

    /// Max packet size of the bulk IN endpoint, from the device descriptor
    fn max_packet_in(&self) -> usize;

    /// Max packet size of the bulk OUT endpoint, from the device descriptor
    fn max_packet_out(&self) -> usize;
}
