use thiserror::Error;

/// Result type for Yeelight operations
pub type Result<T> = std::result::Result<T, YeelightError>;

/// Errors that can occur when discovering or talking to Yeelight devices
#[derive(Error, Debug)]
pub enum YeelightError {
    /// Discovery response whose `Location` lacks the `yeelight://` scheme
    #[error("Malformed advertisement: {0}")]
    MalformedAdvertisement(String),

    /// Numeric advertisement header that does not parse as an integer
    #[error("Invalid value {value:?} for field {field}")]
    InvalidField {
        /// Header name
        field: &'static str,
        /// Raw header value
        value: String,
    },

    /// Command missing from the device's `support` set
    #[error("Command not supported: {0}")]
    UnsupportedCommand(String),

    /// No live stream to the device
    #[error("Device not connected")]
    NotConnected,

    /// Command parameter out of the accepted range
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Request id that was never issued or whose result was already taken
    #[error("Unknown request id: {0}")]
    UnknownRequest(u32),

    /// Request timed out waiting for a result
    #[error("Request timeout")]
    Timeout,

    /// Connection was closed while waiting
    #[error("Connection closed")]
    ConnectionClosed,

    /// Device answered a command with an error body
    #[error("Device error {code}: {message}")]
    Device {
        /// Error code reported by the device
        code: i64,
        /// Error message reported by the device
        message: String,
    },

    /// Invalid or unexpected message from the device
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
