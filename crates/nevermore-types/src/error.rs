//! Error types for data parsing in nevermore-types.

use thiserror::Error;

/// Errors that can occur when decoding Nevermore characteristic payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in nevermore-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Payload length does not match the declared layout width.
    #[error("Malformed {layout} payload: expected {expected} bytes, got {actual}")]
    MalformedPayload {
        /// Name of the scalar format or aggregate layout.
        layout: &'static str,
        /// Exact number of bytes the layout requires.
        expected: usize,
        /// Number of bytes received.
        actual: usize,
    },

    /// Payload could not be interpreted.
    #[error("Invalid data: {0}")]
    InvalidData(String),
}

/// Result type alias using nevermore-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
