use thiserror::Error;

/// Error type for device, protocol and configuration operations
#[derive(Debug, Error)]
pub enum TrackerError {
    /// A feature report came back with a different leading id than requested
    #[error("Feature report id mismatch: expected {expected:#04x}, found {found:#04x}")]
    ProtocolMismatch { expected: u8, found: u8 },

    /// A decoder was handed fewer bytes than its fixed layout requires
    #[error("Buffer underrun: needed {needed} bytes, got {actual}")]
    BufferUnderrun { needed: usize, actual: usize },

    /// Read or write failure in the HID transport
    #[error("Device I/O failed: {0}")]
    DeviceIo(#[from] hidapi::HidError),

    /// No HID device matched the requested vendor/product id
    #[error("No device found with VID={vendor_id:04x}, PID={product_id:04x}")]
    DeviceNotFound { vendor_id: u16, product_id: u16 },

    /// Operation not allowed in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Configuration could not be parsed or failed validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be read
    #[error("Configuration I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// The polling thread panicked instead of returning
    #[error("Polling thread panicked")]
    ThreadPanicked,
}

impl From<toml::de::Error> for TrackerError {
    fn from(err: toml::de::Error) -> Self {
        TrackerError::Config(err.to_string())
    }
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
