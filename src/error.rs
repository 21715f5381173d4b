//! Error types and handling for Helion
//!
//! This module defines the error types used throughout the controller,
//! providing consistent error handling and reporting.

use thiserror::Error;

/// Result type alias for Helion operations
pub type Result<T> = std::result::Result<T, HelionError>;

/// Main error type for Helion
#[derive(Debug, Error)]
pub enum HelionError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Charger or meter communication errors
    #[error("Device error: {message}")]
    Device { message: String },

    /// Vehicle API errors
    #[error("Vehicle error: {message}")]
    Vehicle { message: String },

    /// Circuit tree errors (unknown circuit, broken hierarchy)
    #[error("Circuit error: {message}")]
    Circuit { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Timeout errors, including an exhausted retry budget
    #[error("Timeout error: {message}")]
    Timeout { message: String },

    /// Capability not offered by the device
    #[error("Not supported: {message}")]
    NotSupported { message: String },

    /// Generic errors with context
    #[error("Error: {message}")]
    Generic { message: String },
}

impl HelionError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a new device error
    pub fn device<S: Into<String>>(message: S) -> Self {
        Self::Device {
            message: message.into(),
        }
    }

    /// Create a new vehicle error
    pub fn vehicle<S: Into<String>>(message: S) -> Self {
        Self::Vehicle {
            message: message.into(),
        }
    }

    /// Create a new circuit error
    pub fn circuit<S: Into<String>>(message: S) -> Self {
        Self::Circuit {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(field: S, message: S) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
        }
    }

    /// Create a new timeout error
    pub fn timeout<S: Into<String>>(message: S) -> Self {
        Self::Timeout {
            message: message.into(),
        }
    }

    /// Create a new not-supported error
    pub fn not_supported<S: Into<String>>(message: S) -> Self {
        Self::NotSupported {
            message: message.into(),
        }
    }

    /// Create a new generic error
    pub fn generic<S: Into<String>>(message: S) -> Self {
        Self::Generic {
            message: message.into(),
        }
    }

    /// Whether retrying the failed operation may succeed
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Device { .. } | Self::Vehicle { .. } | Self::Io { .. } | Self::Timeout { .. }
        )
    }
}

impl From<std::io::Error> for HelionError {
    fn from(err: std::io::Error) -> Self {
        Self::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HelionError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for HelionError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

impl From<chrono::ParseError> for HelionError {
    fn from(err: chrono::ParseError) -> Self {
        Self::validation("datetime", &err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = HelionError::config("test config error");
        assert!(matches!(err, HelionError::Config { .. }));

        let err = HelionError::device("test device error");
        assert!(matches!(err, HelionError::Device { .. }));

        let err = HelionError::validation("field", "test validation error");
        assert!(matches!(err, HelionError::Validation { .. }));
    }

    #[test]
    fn test_error_display() {
        let err = HelionError::config("test error");
        assert_eq!(err.to_string(), "Configuration error: test error");

        let err = HelionError::validation("test_field", "invalid value");
        assert_eq!(err.to_string(), "Validation error: test_field - invalid value");
    }

    #[test]
    fn test_transient_classification() {
        assert!(HelionError::device("timeout").is_transient());
        assert!(HelionError::timeout("budget").is_transient());
        assert!(!HelionError::config("bad").is_transient());
        assert!(!HelionError::not_supported("phases").is_transient());
    }
}
