//! Error types shared across the QiProg crates.

use core::fmt;

/// QiProg error type - no_std compatible, Copy for efficiency
///
/// The taxonomy is deliberately coarse: callers get the kind of failure,
/// nothing more. Backends log the gory details before mapping into one of
/// these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// Illegal argument: bad device handle, zero bus mask, impossible
    /// range, over-length control body
    InvalidArgument,
    /// Out of memory while growing the registry or creating a device
    OutOfMemory,
    /// A wire operation exceeded its deadline
    Timeout,
    /// The programmer reported that the flash chip timed out
    ChipTimeout,
    /// The programmer reported that the flash chip did not respond
    NoResponse,
    /// Transport failure, protocol STALL, short transfer, or any other
    /// unrecovered condition
    Protocol,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Timeout => write!(f, "operation timed out"),
            Self::ChipTimeout => write!(f, "flash chip operation timed out"),
            Self::NoResponse => write!(f, "flash chip did not respond"),
            Self::Protocol => write!(f, "protocol error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the QiProg error type
pub type Result<T> = core::result::Result<T, Error>;
