//! Discovery of QiProg programmers on the USB bus.

use nusb::MaybeFuture;

use qiprog_core::master::Master;
use qiprog_core::registry::{Context, Device, DeviceId};
use qiprog_core::wire::{QIPROG_USB_PID, QIPROG_USB_VID};

use crate::error::{Result, UsbError};
use crate::transport::UsbTransport;

/// A QiProg programmer reached over USB
pub type UsbProgrammer = Master<UsbTransport>;

/// VID/PID pair the scan matches devices against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbMatch {
    /// USB vendor ID
    pub vid: u16,
    /// USB product ID
    pub pid: u16,
}

impl Default for UsbMatch {
    fn default() -> Self {
        Self {
            vid: QIPROG_USB_VID,
            pid: QIPROG_USB_PID,
        }
    }
}

/// Scan the bus for QiProg programmers with the default VID/PID and append
/// them to the context. Returns how many devices were found; finding none
/// is not an error.
pub fn scan(ctx: &mut Context) -> Result<usize> {
    scan_with(ctx, UsbMatch::default())
}

/// Scan the bus for devices matching `m` and append them to the context.
///
/// Each discovered programmer enters the registry CLOSED; opening it
/// creates the USB handle and claims its interface.
pub fn scan_with(ctx: &mut Context, m: UsbMatch) -> Result<usize> {
    let devices = nusb::list_devices()
        .wait()
        .map_err(|e| UsbError::EnumerationFailed(e.to_string()))?;

    let mut found = 0;
    for info in devices.filter(|d| d.vendor_id() == m.vid && d.product_id() == m.pid) {
        log::info!(
            "QiProg programmer at bus {} address {}",
            info.busnum(),
            info.device_address()
        );

        let manufacturer = info.manufacturer_string().map(str::to_string);
        let product = info.product_string().map(str::to_string);
        let serial = info.serial_number().map(str::to_string);

        let mut dev = Device::new(Box::new(Master::new(UsbTransport::new(info))));
        dev.set_identification(manufacturer, product, serial);
        let _: DeviceId = ctx.add_device(dev);
        found += 1;
    }

    Ok(found)
}
