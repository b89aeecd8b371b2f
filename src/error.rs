use thiserror::Error;

/// Reasons a byte sequence was rejected by the frame codec
///
/// Decoding checks length, preamble, command code, data length and checksum in that
/// order; the first failing check decides the variant.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame is not exactly the size of its frame kind
    #[error("Wrong frame length: {actual} bytes, expected {expected}")]
    Length {
        /// Required length
        expected: usize,
        /// Received length
        actual: usize,
    },

    /// Frame does not start with 0xFEFE
    #[error("Incorrect preamble {0:#06x}")]
    Preamble(u16),

    /// Command code does not match the frame kind
    #[error("Incorrect command code {actual:#04x}, expected {expected:#04x}")]
    CommandCode {
        /// Code of the frame kind
        expected: u8,
        /// Received code
        actual: u8,
    },

    /// Data length byte does not match the frame kind
    #[error("Incorrect data length {actual:#04x}, expected {expected:#04x}")]
    DataLength {
        /// Data length of the frame kind
        expected: u8,
        /// Received data length
        actual: u8,
    },

    /// Checksum does not validate
    #[error("CRC does not validate: computed {computed:#06x}, frame carries {received:#06x}")]
    Checksum {
        /// Sum computed over the frame
        computed: u16,
        /// Checksum carried by the frame
        received: u16,
    },

    /// The frame kind has no decoder (the static ping literal)
    #[error("Frame kind cannot be decoded")]
    NotDecodable,
}

/// Errors that can occur when working with K25 fridges
#[derive(Error, Debug)]
pub enum FridgeError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Device not found during scanning
    #[error("Fridge not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to device: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Device disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Malformed frame received or built
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Requested setpoint is outside the device-reported limits
    #[error("Temperature {requested} outside device limits [{lowest}, {highest}]")]
    OutOfBounds {
        /// Requested setpoint in device units
        requested: i8,
        /// Lowest allowed setpoint
        lowest: i8,
        /// Highest allowed setpoint
        highest: i8,
    },

    /// Writing to the command characteristic failed; the session is over
    #[error("Link write failed: {0}")]
    LinkWrite(String),

    /// No status report has been received from the device yet
    #[error("Fridge state not yet known - waiting for first status report")]
    Uninitialized,

    /// The command dispatcher has stopped and accepts no more requests
    #[error("Command dispatcher is not running")]
    DispatcherClosed,

    /// Invalid request parameters
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A background task panicked or was aborted
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Result type for fridge operations
pub type Result<T> = std::result::Result<T, FridgeError>;

impl FridgeError {
    /// Check if this error indicates a connection issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_)
                | Self::ConnectionFailed(_)
                | Self::Disconnected
                | Self::DeviceNotFound
                | Self::LinkWrite(_)
        )
    }

    /// Check if this error is recoverable
    ///
    /// Recoverable errors leave the session intact: the offending frame or request is
    /// dropped and everything else keeps running.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Frame(_)
                | Self::OutOfBounds { .. }
                | Self::Uninitialized
                | Self::InvalidParameters(_)
                | Self::Timeout { .. }
        )
    }

    /// Check if this error ends the current session
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LinkWrite(_) | Self::Disconnected | Self::DispatcherClosed
        )
    }
}
