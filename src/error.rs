//! Error types for the mtplib library.

use thiserror::Error;

use crate::fs::ObjectId;
use crate::transport::ResponseCode;

/// Main error type for device and cache operations.
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The requested device is not (or no longer) attached.
    #[error("No device found")]
    NoDeviceFound,

    /// The primary storage has less free space than the configured floor.
    #[error("Not enough free space: {available} bytes available, {required} bytes required")]
    NotEnoughSpace { available: u64, required: u64 },

    /// I/O level failure talking to the device, including timeouts.
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The device answered with a non-OK response code.
    #[error("Device error: {code:?} - {message}")]
    Response { code: ResponseCode, message: String },

    /// Structural violation, e.g. creating a folder under a file.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The object is not present in the current tree.
    #[error("Object not found: {0:#x}")]
    NotFound(ObjectId),

    /// The object exists but no longer matches the reference held by the caller.
    #[error("Stale reference to object {0:#x}")]
    StaleReference(ObjectId),

    /// Operation attempted while no device is open, or interrupted by close.
    #[error("Not connected")]
    NotConnected,

    /// `open` was called while a device is already open.
    #[error("A device is already open")]
    AlreadyOpen,

    /// Configuration could not be parsed.
    #[error("Config error: {0}")]
    Config(#[from] serde_json::Error),
}

impl DeviceError {
    /// Build an error from a device response code.
    pub fn from_response(code: ResponseCode) -> Self {
        DeviceError::Response {
            code,
            message: code.description().to_string(),
        }
    }

    /// Whether the caller may reasonably retry the operation.
    ///
    /// The library itself never retries.
    pub fn is_retryable(&self) -> bool {
        match self {
            DeviceError::TransportError(_) => true,
            DeviceError::Response { code, .. } => code.is_transient(),
            _ => false,
        }
    }
}

/// Result type alias for mtplib operations.
pub type Result<T> = std::result::Result<T, DeviceError>;
