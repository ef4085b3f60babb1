/*!
Common error types for the thermal camera components.
*/

use thiserror::Error;

/// Common result type used throughout the shared library
pub type Result<T> = std::result::Result<T, SharedError>;

/// Comprehensive error type for all shared operations
#[derive(Error, Debug)]
pub enum SharedError {
    /// I/O errors (file operations, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// Invalid frame data
    #[error("Invalid frame data: {0}")]
    InvalidFrame(String),

    /// Invalid structured packet
    #[error("Invalid packet: {0}")]
    InvalidPacket(String),

    /// File format errors
    #[error("Invalid file format: {0}")]
    InvalidFileFormat(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Every connection attempt failed
    #[error("Failed to connect to {addr} after {attempts} attempts: {source}")]
    Connection {
        addr: String,
        attempts: u32,
        #[source]
        source: std::io::Error,
    },

    /// A stop was requested before the operation could complete
    #[error("Operation cancelled")]
    Cancelled,

    /// Generic errors with context
    #[error("Error: {0}")]
    Generic(String),
}

impl SharedError {
    /// Create a new generic error with a message
    pub fn new(msg: impl Into<String>) -> Self {
        Self::Generic(msg.into())
    }

    /// Create a new invalid frame error
    pub fn invalid_frame(msg: impl Into<String>) -> Self {
        Self::InvalidFrame(msg.into())
    }

    /// Create a new invalid packet error
    pub fn invalid_packet(msg: impl Into<String>) -> Self {
        Self::InvalidPacket(msg.into())
    }

    /// Create a new invalid file format error
    pub fn invalid_file_format(msg: impl Into<String>) -> Self {
        Self::InvalidFileFormat(msg.into())
    }

    /// Create a new configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
