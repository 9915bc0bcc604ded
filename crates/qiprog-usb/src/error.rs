//! Error types for the USB backend.
//!
//! These carry the underlying USB detail for humans and logs; at the
//! `ProgrammerOps` boundary everything collapses into the core taxonomy.

use thiserror::Error;

/// Errors raised while talking to a QiProg programmer over USB
#[derive(Debug, Error)]
pub enum UsbError {
    /// Enumerating the bus failed
    #[error("USB device enumeration failed: {0}")]
    EnumerationFailed(String),

    /// Opening the device failed
    #[error("failed to open device: {0}")]
    OpenFailed(String),

    /// Claiming interface 0 failed
    #[error("failed to claim interface: {0}")]
    ClaimFailed(String),

    /// A bulk endpoint could not be opened
    #[error("endpoint {0:#04x} unavailable: {1}")]
    EndpointUnavailable(u8, String),

    /// A control transfer failed
    #[error("control transfer failed: {0}")]
    TransferFailed(String),

    /// Operation attempted on a device that is not open
    #[error("device is not open")]
    NotOpen,
}

/// Result type for USB backend operations
pub type Result<T> = std::result::Result<T, UsbError>;
