//! qiprog-device - Device-side half of the QiProg protocol
//!
//! A QiProg programmer's firmware receives USB control requests and bulk
//! traffic and has to turn them back into operations on whatever chip
//! driver is attached. The [`translator`] module is that layer: it is not
//! a driver itself but a translation unit, dispatching inbound wire
//! requests to a driver through the same [`ProgrammerOps`] surface the
//! host API uses.
//!
//! [`memory`] provides an in-memory chip driver for development and
//! testing; [`loopback`] wires the translator up as a host-side transport
//! so the full marshal/demarshal path runs with no hardware at all.
//!
//! [`ProgrammerOps`]: qiprog_core::driver::ProgrammerOps

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

extern crate alloc;

pub mod loopback;
pub mod memory;
pub mod translator;

pub use loopback::LoopbackTransport;
pub use memory::{MemoryChip, MemoryChipConfig};
pub use translator::Translator;
