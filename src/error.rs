//! Error types for the blocklight library.

use thiserror::Error;

/// The main error type for blocklight operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bluetooth stack error.
    #[error("bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),

    /// The transport session could not be opened or set up.
    #[error("connection error: {message}")]
    Connection { message: String },

    /// A write on an already-open session failed.
    #[error("command error: {message}")]
    Command { message: String },

    /// Timer duration outside the device's supported range.
    #[error("timer duration {minutes} out of range (1-60 minutes)")]
    InvalidTimerDuration { minutes: u16 },

    /// Timed out waiting for a device reply.
    #[error("timed out after {timeout_ms}ms waiting for a reply")]
    Timeout { timeout_ms: u64 },

    /// No Bluetooth adapter available on this host.
    #[error("no bluetooth adapter found")]
    NoAdapter,

    /// The device was not seen during the scan window.
    #[error("device {address} not found")]
    DeviceNotFound { address: String },

    /// A required GATT characteristic is missing from the device.
    #[error("characteristic not found: {uuid}")]
    CharacteristicNotFound { uuid: uuid::Uuid },

    /// Connection is not established.
    #[error("not connected")]
    NotConnected,
}

/// Result type alias for blocklight operations.
pub type Result<T> = std::result::Result<T, Error>;
