//! # Error Types
//!
//! Custom error types for Sensor Bridge using `thiserror`.

use thiserror::Error;

/// Main error type for Sensor Bridge
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding errors (queue file, upload bodies)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Serial port errors
    #[error("Serial error: {0}")]
    Serial(String),

    /// None of the candidate serial devices could be opened
    #[error("No serial device found (tried: {0})")]
    SerialPortNotFound(String),

    /// A line pattern failed to compile
    #[error("Invalid line pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// A matched telemetry field carried text that is not a number
    #[error("Malformed {field} value: {value:?}")]
    MalformedField {
        /// Snapshot field being extracted
        field: &'static str,
        /// Raw captured text
        value: String,
    },
}

/// Result type alias for Sensor Bridge
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_field_message() {
        let err = BridgeError::MalformedField {
            field: "latitude",
            value: "1.2.3".to_string(),
        };
        assert_eq!(err.to_string(), "Malformed latitude value: \"1.2.3\"");
    }

    #[test]
    fn test_io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: BridgeError = io.into();
        assert!(matches!(err, BridgeError::Io(_)));
    }
}
