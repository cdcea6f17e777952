//! Error types for message rendering.

/// Result type alias for rendering operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Rendering error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Header name or value cannot be placed on the wire.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),

    /// Missing required header.
    #[error("Missing required header: {0}")]
    MissingHeader(String),
}
