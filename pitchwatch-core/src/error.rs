//! Error types for the pitch engine.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    // Capture errors
    #[error("Audio device unavailable: {message}")]
    DeviceUnavailable { message: String },

    #[error("Microphone permission denied: {message}")]
    PermissionDenied { message: String },

    #[error("Audio stream closed")]
    StreamClosed,

    // Configuration errors
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidConfig { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn invalid_config(key: &str, message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_device_unavailable_display() {
        let error = Error::DeviceUnavailable {
            message: "no input device".to_string(),
        };
        assert_eq!(error.to_string(), "Audio device unavailable: no input device");
    }

    #[test]
    fn test_permission_denied_display() {
        let error = Error::PermissionDenied {
            message: "access denied".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Microphone permission denied: access denied"
        );
    }

    #[test]
    fn test_invalid_config_display() {
        let error = Error::invalid_config("block_size", "must be at least 2");
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for block_size: must be at least 2"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "missing");
        let error: Error = io_error.into();
        assert!(matches!(error, Error::Io(_)));
    }
}
