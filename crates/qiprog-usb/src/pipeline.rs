//! Depth-bounded pipeline of queued bulk transfers.
//!
//! A multi-megabyte chip read is thousands of endpoint-sized packets; one
//! blocking transfer per packet would leave the bus idle between
//! completions. The pipeline keeps up to [`MAX_IN_FLIGHT`] transfers
//! queued and tops the queue back up as completions come in. The USB
//! layer delivers completions in submission order per endpoint, which is
//! what lets each completed packet land at `finished * packet_size`
//! without further bookkeeping.
//!
//! The first failed or short transfer halts resubmission: the remaining
//! in-flight transfers are cancelled and drained, and the caller learns
//! how many bytes actually arrived so the address cursor can settle on
//! the last delivered position. Only whole endpoint-sized packets run
//! through here for IN; the sub-packet tail of a read is the marshaller's
//! leftover-buffer business.

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, In, Out};
use nusb::Endpoint;

use qiprog_core::transport::DEFAULT_TIMEOUT_MS;

/// Maximum number of bulk transfers queued at any time
pub const MAX_IN_FLIGHT: usize = 32;

/// Per-completion deadline: the wire timeout plus slack for a deep queue
const COMPLETION_TIMEOUT: Duration = Duration::from_millis(DEFAULT_TIMEOUT_MS as u64 + 7000);

macro_rules! drain {
    ($ep:expr) => {
        // Cancel and reap whatever is still in flight after a failure.
        $ep.cancel_all();
        while $ep.pending() > 0 {
            if $ep.wait_next_complete(Duration::from_secs(1)).is_none() {
                break;
            }
        }
    };
}

/// Stream `dest.len()` bytes from the endpoint; `dest` must be a whole
/// number of max-packet-size packets. Returns the bytes delivered, which
/// land at the front of `dest` in order; a short count means the stream
/// failed partway.
pub fn run_in(ep: &mut Endpoint<Bulk, In>, dest: &mut [u8]) -> usize {
    let packet_size = ep.max_packet_size();
    let total = dest.len() / packet_size;
    let depth = total.min(MAX_IN_FLIGHT);

    log::debug!("bulk IN: {} transfers of {} bytes", total, packet_size);

    let mut queued = 0;
    let mut finished = 0;
    let mut delivered = 0;

    while queued < total && queued - finished < depth {
        let mut buf = Buffer::new(packet_size);
        buf.set_requested_len(packet_size);
        ep.submit(buf);
        queued += 1;
    }

    while finished < total {
        let Some(completion) = ep.wait_next_complete(COMPLETION_TIMEOUT) else {
            log::error!("bulk IN timed out at packet {}/{}", finished, total);
            drain!(ep);
            return delivered;
        };

        match completion.status {
            Ok(()) => {
                let got = completion.buffer.len();
                let off = finished * packet_size;
                dest[off..off + got].copy_from_slice(&completion.buffer[..got]);
                delivered = off + got;
                if got != packet_size {
                    log::error!("short bulk IN packet: {} of {} bytes", got, packet_size);
                    drain!(ep);
                    return delivered;
                }
            }
            Err(e) => {
                log::error!("bulk IN failed at packet {}/{}: {:?}", finished, total, e);
                drain!(ep);
                return delivered;
            }
        }
        finished += 1;

        if queued < total {
            let mut buf = Buffer::new(packet_size);
            buf.set_requested_len(packet_size);
            ep.submit(buf);
            queued += 1;
        }
    }

    delivered
}

/// Stream `src` out over the endpoint in packet-sized chunks; a trailing
/// chunk shorter than a packet goes out as a short packet. Returns the
/// bytes the device accepted.
pub fn run_out(ep: &mut Endpoint<Bulk, Out>, src: &[u8]) -> usize {
    let packet_size = ep.max_packet_size();
    let total = src.len().div_ceil(packet_size);
    let depth = total.min(MAX_IN_FLIGHT);

    log::debug!("bulk OUT: {} bytes in {} transfers", src.len(), total);

    let chunk_len = |i: usize| {
        let start = i * packet_size;
        (src.len() - start).min(packet_size)
    };

    let mut queued = 0;
    let mut finished = 0;
    let mut delivered = 0;

    let submit_next = |ep: &mut Endpoint<Bulk, Out>, i: usize| {
        let start = i * packet_size;
        let chunk = &src[start..start + chunk_len(i)];
        let mut buf = Buffer::new(chunk.len());
        buf.extend_from_slice(chunk);
        ep.submit(buf);
    };

    while queued < total && queued - finished < depth {
        submit_next(ep, queued);
        queued += 1;
    }

    while finished < total {
        let Some(completion) = ep.wait_next_complete(COMPLETION_TIMEOUT) else {
            log::error!("bulk OUT timed out at packet {}/{}", finished, total);
            drain!(ep);
            return delivered;
        };

        let wanted = chunk_len(finished);
        match completion.status {
            Ok(()) => {
                delivered += completion.actual_len;
                if completion.actual_len != wanted {
                    log::error!(
                        "short bulk OUT packet: {} of {} bytes",
                        completion.actual_len,
                        wanted
                    );
                    drain!(ep);
                    return delivered;
                }
            }
            Err(e) => {
                log::error!("bulk OUT failed at packet {}/{}: {:?}", finished, total, e);
                drain!(ep);
                return delivered;
            }
        }
        finished += 1;

        if queued < total {
            submit_next(ep, queued);
            queued += 1;
        }
    }

    delivered
}
