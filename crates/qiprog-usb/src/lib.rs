//! qiprog-usb - USB master backend for QiProg programmers
//!
//! Discovers QiProg devices on the USB bus and drives them through the
//! protocol engine in `qiprog-core`: control requests become vendor
//! control transfers, bulk streams run through a depth-bounded pipeline of
//! queued transfers on endpoint 1.
//!
//! ```no_run
//! use qiprog_core::registry::Context;
//!
//! let mut ctx = Context::new();
//! let found = qiprog_usb::scan(&mut ctx)?;
//! println!("{} programmer(s) found", found);
//! # Ok::<(), qiprog_usb::UsbError>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod device;
mod error;
mod pipeline;
mod transport;

pub use device::{scan, scan_with, UsbMatch, UsbProgrammer};
pub use error::UsbError;
pub use transport::UsbTransport;
