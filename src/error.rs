//! Error types and handling for Hestia
//!
//! Every fallible operation in the crate returns [`Result`]. The variants
//! mirror the failure classes the host energy manager can act on: login
//! problems, transient upstream failures, rejected commands and switch
//! verification mismatches, plus the usual configuration and I/O errors.

use thiserror::Error;

/// Result type alias for Hestia operations
pub type Result<T> = std::result::Result<T, HestiaError>;

/// Main error type for Hestia
#[derive(Debug, Error)]
pub enum HestiaError {
    /// Configuration-related errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Validation errors
    #[error("Validation error: {field} - {message}")]
    Validation { field: String, message: String },

    /// Login or token refresh failed
    #[error("Authentication error: {message}")]
    Auth { message: String },

    /// Transport, protocol or timeout failure while talking to the device backend
    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// A start/stop command was rejected or could not be delivered
    #[error("Command failed: {message}")]
    CommandFailed { message: String },

    /// The device does not report the state that was just requested
    #[error("Verification mismatch: {message}")]
    VerificationMismatch { message: String },

    /// HTTP server errors
    #[error("Web server error: {message}")]
    Web { message: String },

    /// Serialization/deserialization errors
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// File I/O errors
    #[error("I/O error: {message}")]
    Io { message: String },
}

impl HestiaError {
    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        HestiaError::Config {
            message: message.into(),
        }
    }

    /// Create a new validation error
    pub fn validation<F: Into<String>, S: Into<String>>(field: F, message: S) -> Self {
        HestiaError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new auth error
    pub fn auth<S: Into<String>>(message: S) -> Self {
        HestiaError::Auth {
            message: message.into(),
        }
    }

    /// Create a new upstream error
    pub fn upstream<S: Into<String>>(message: S) -> Self {
        HestiaError::Upstream {
            message: message.into(),
        }
    }

    /// Create a new command error
    pub fn command_failed<S: Into<String>>(message: S) -> Self {
        HestiaError::CommandFailed {
            message: message.into(),
        }
    }

    /// Create a new verification error
    pub fn verification_mismatch<S: Into<String>>(message: S) -> Self {
        HestiaError::VerificationMismatch {
            message: message.into(),
        }
    }

    /// Create a new web error
    pub fn web<S: Into<String>>(message: S) -> Self {
        HestiaError::Web {
            message: message.into(),
        }
    }

    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(message: S) -> Self {
        HestiaError::Serialization {
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        HestiaError::Io {
            message: message.into(),
        }
    }

    /// Whether the error asks for a token refresh or a new login
    pub fn is_auth(&self) -> bool {
        matches!(self, HestiaError::Auth { .. })
    }

    /// Whether a single retry of the same request is worthwhile
    pub fn is_transient(&self) -> bool {
        matches!(self, HestiaError::Upstream { .. } | HestiaError::Io { .. })
    }
}

impl From<std::io::Error> for HestiaError {
    fn from(err: std::io::Error) -> Self {
        HestiaError::io(err.to_string())
    }
}

impl From<serde_yaml::Error> for HestiaError {
    fn from(err: serde_yaml::Error) -> Self {
        HestiaError::serialization(err.to_string())
    }
}

impl From<serde_json::Error> for HestiaError {
    fn from(err: serde_json::Error) -> Self {
        HestiaError::serialization(err.to_string())
    }
}

#[cfg(feature = "cloud")]
impl From<reqwest::Error> for HestiaError {
    fn from(err: reqwest::Error) -> Self {
        HestiaError::upstream(err.to_string())
    }
}
