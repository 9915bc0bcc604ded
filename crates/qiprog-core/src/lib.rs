//! qiprog-core - Protocol engine for QiProg flash programmers
//!
//! QiProg is a USB protocol for driving external flash-memory programmers:
//! devices that read, erase, and write ROM/flash chips (LPC, FWH, SPI, ISA)
//! attached to a host over USB. This crate contains everything that is
//! independent of a concrete wire mechanism:
//!
//! - the little-endian byte codec ([`codec`])
//! - the wire format: opcodes, capability and chip-ID records ([`wire`])
//! - the typed command surface every backend implements ([`driver`])
//! - the transport abstraction control/bulk traffic flows through
//!   ([`transport`])
//! - the host command marshaller with its address cursor and leftover
//!   buffer ([`master`], [`window`])
//! - the context/device registry ([`registry`])
//!
//! Backends live in separate crates: `qiprog-usb` talks to real hardware
//! over USB, `qiprog-device` is the firmware-side translator.

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod codec;
pub mod driver;
pub mod error;
pub mod master;
pub mod registry;
pub mod transport;
pub mod window;
pub mod wire;

pub use error::{Error, Result};
