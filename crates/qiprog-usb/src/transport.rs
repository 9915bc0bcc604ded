//! Wire transport over nusb.
//!
//! Control requests map to vendor control transfers addressed to the
//! device (`bmRequestType` 0xC0/0x40); bulk streams run through the
//! transfer pipeline on endpoint 1. The USB handle is not created until
//! the device is opened, and the true max packet sizes come from the
//! claimed interface's descriptors rather than being assumed.

use std::time::Duration;

use nusb::transfer::{Bulk, ControlIn, ControlOut, ControlType, In, Out, Recipient};
use nusb::{DeviceInfo, Endpoint, Interface, MaybeFuture};

use qiprog_core::error::{Error, Result};
use qiprog_core::transport::WireTransport;
use qiprog_core::wire::{CtrlRequest, BULK_EP_IN, BULK_EP_OUT};

use crate::error::UsbError;
use crate::pipeline;

struct Claimed {
    interface: Interface,
    ep_size_in: usize,
    ep_size_out: usize,
}

/// [`WireTransport`] backed by one USB device.
pub struct UsbTransport {
    info: DeviceInfo,
    claimed: Option<Claimed>,
}

impl UsbTransport {
    /// Wrap a discovered device. No handle is created yet.
    pub fn new(info: DeviceInfo) -> Self {
        Self {
            info,
            claimed: None,
        }
    }

    fn open_inner(&mut self) -> std::result::Result<(), UsbError> {
        let device = self
            .info
            .open()
            .wait()
            .map_err(|e| UsbError::OpenFailed(e.to_string()))?;

        let interface = device
            .claim_interface(0)
            .wait()
            .map_err(|e| UsbError::ClaimFailed(e.to_string()))?;

        // Learn the real endpoint granularity from the descriptors.
        let ep_size_in = {
            let ep: Endpoint<Bulk, In> = interface
                .endpoint(BULK_EP_IN)
                .map_err(|e| UsbError::EndpointUnavailable(BULK_EP_IN, e.to_string()))?;
            ep.max_packet_size()
        };
        let ep_size_out = {
            let ep: Endpoint<Bulk, Out> = interface
                .endpoint(BULK_EP_OUT)
                .map_err(|e| UsbError::EndpointUnavailable(BULK_EP_OUT, e.to_string()))?;
            ep.max_packet_size()
        };

        log::debug!("max packet size: {} IN, {} OUT", ep_size_in, ep_size_out);

        self.claimed = Some(Claimed {
            interface,
            ep_size_in,
            ep_size_out,
        });
        Ok(())
    }

    fn claimed(&self) -> Result<&Claimed> {
        self.claimed.as_ref().ok_or_else(|| {
            log::error!("{}", UsbError::NotOpen);
            Error::InvalidArgument
        })
    }
}

impl WireTransport for UsbTransport {
    fn open(&mut self) -> Result<()> {
        self.open_inner().map_err(|e| {
            log::error!("{}", e);
            Error::Protocol
        })
    }

    fn close(&mut self) -> Result<()> {
        // Dropping the interface releases the claim and aborts anything
        // still in flight.
        self.claimed = None;
        Ok(())
    }

    fn request_in(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        buf: &mut [u8],
        timeout_ms: u32,
    ) -> Result<usize> {
        let claimed = self.claimed()?;
        let data = claimed
            .interface
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: code as u8,
                    value: field_a,
                    index: field_b,
                    length: buf.len() as u16,
                },
                Duration::from_millis(timeout_ms as u64),
            )
            .wait()
            .map_err(|e| {
                log::error!(
                    "request {:#04x}: {}",
                    code as u8,
                    UsbError::TransferFailed(e.to_string())
                );
                Error::Protocol
            })?;

        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }

    fn request_out(
        &mut self,
        code: CtrlRequest,
        field_a: u16,
        field_b: u16,
        data: &[u8],
        timeout_ms: u32,
    ) -> Result<()> {
        let claimed = self.claimed()?;
        claimed
            .interface
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request: code as u8,
                    value: field_a,
                    index: field_b,
                    data,
                },
                Duration::from_millis(timeout_ms as u64),
            )
            .wait()
            .map_err(|e| {
                log::error!(
                    "request {:#04x}: {}",
                    code as u8,
                    UsbError::TransferFailed(e.to_string())
                );
                Error::Protocol
            })?;

        Ok(())
    }

    fn bulk_in(&mut self, dest: &mut [u8]) -> Result<usize> {
        let claimed = self.claimed()?;
        let mut ep: Endpoint<Bulk, In> = claimed.interface.endpoint(BULK_EP_IN).map_err(|e| {
            log::error!("bulk IN endpoint unavailable: {}", e);
            Error::Protocol
        })?;
        Ok(pipeline::run_in(&mut ep, dest))
    }

    fn bulk_out(&mut self, src: &[u8]) -> Result<usize> {
        let claimed = self.claimed()?;
        let mut ep: Endpoint<Bulk, Out> = claimed.interface.endpoint(BULK_EP_OUT).map_err(|e| {
            log::error!("bulk OUT endpoint unavailable: {}", e);
            Error::Protocol
        })?;
        Ok(pipeline::run_out(&mut ep, src))
    }

    fn max_packet_in(&self) -> usize {
        self.claimed.as_ref().map_or(0, |c| c.ep_size_in)
    }

    fn max_packet_out(&self) -> usize {
        self.claimed.as_ref().map_or(0, |c| c.ep_size_out)
    }
}
