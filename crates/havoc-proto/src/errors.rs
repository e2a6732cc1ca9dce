//! Error types for the havoc wire format.
//!
//! All errors are structured, testable, and provide actionable information.

use thiserror::Error;

/// Protocol-level errors that can occur during frame and message parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    // Frame parsing errors
    /// Buffer is shorter than the 4-byte length prefix
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Expected minimum size in bytes
        expected: usize,
        /// Actual size received
        actual: usize,
    },

    /// Length prefix claims a zero-byte payload
    #[error("empty frame: length prefix is zero")]
    EmptyFrame,

    /// Payload exceeds maximum allowed size
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge {
        /// Size claimed by the prefix (or the payload being encoded)
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Frame is truncated (prefix claims more data than available)
    #[error("frame truncated: prefix claims {expected} payload bytes, but only {actual} available")]
    FrameTruncated {
        /// Payload size from the prefix
        expected: usize,
        /// Actual bytes available
        actual: usize,
    },

    // JSON errors (wrapped for testability)
    /// Decrypted payload is not a valid chaos message
    #[error("invalid chaos message JSON: {0}")]
    InvalidJson(String),

    /// Failed to encode a chaos message as JSON
    #[error("failed to encode chaos message: {0}")]
    JsonEncode(String),
}

/// Errors from sealing or opening an envelope.
///
/// Every variant is scoped to a single message: the receive loop drops the
/// message and keeps reading.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    /// Envelope text is not valid base64
    #[error("envelope is not valid base64: {0}")]
    Base64(String),

    /// Authentication failed or ciphertext is malformed
    #[error("failed to open sealed envelope")]
    Open,

    /// Sealing failed (RNG or cipher failure)
    #[error("failed to seal envelope")]
    Seal,

    /// Key material has the wrong length
    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidKeyLength(usize),
}

/// Convenient Result type alias for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
