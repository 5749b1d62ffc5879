//! Error types for bucketsync

use thiserror::Error;

/// Result type alias for bucketsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for bucketsync
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (file system operations)
    #[error("I/O error: {message}")]
    Io {
        message: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed or unsupported location string
    #[error("Invalid locator: {locator} - {reason}")]
    InvalidLocator { locator: String, reason: String },

    /// A paginated listing call failed
    #[error("Listing error for s3://{bucket}/{prefix}: {message}")]
    Listing {
        bucket: String,
        prefix: String,
        message: String,
    },

    /// One item's get/put/copy failed
    #[error("Transfer {from} -> {to} failed: {message}")]
    Transfer {
        from: String,
        to: String,
        message: String,
    },

    /// Fewer (or more) bytes were read than the listing announced
    #[error("Short read on {locator}: expected {expected} bytes, got {actual}")]
    ShortRead {
        locator: String,
        expected: u64,
        actual: u64,
    },

    /// Multipart upload error
    #[error("Multipart upload error: {message}")]
    Multipart {
        message: String,
        upload_id: Option<String>,
    },

    /// Storage backend errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// AWS SDK error
    #[error("AWS error: {message}")]
    Aws { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl Error {
    /// Create an I/O error with context
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create an invalid-locator error
    pub fn invalid_locator(locator: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidLocator {
            locator: locator.into(),
            reason: reason.into(),
        }
    }

    /// Create a multipart error bound to a session
    pub fn multipart(message: impl Into<String>, upload_id: Option<&str>) -> Self {
        Self::Multipart {
            message: message.into(),
            upload_id: upload_id.map(str::to_string),
        }
    }

    /// Whether this error must stop the whole command before any work starts
    pub fn is_fatal_before_work(&self) -> bool {
        matches!(self, Error::InvalidLocator { .. } | Error::Config { .. })
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: format!("TOML parse error: {}", err),
        }
    }
}
