//! Error types for SMTP operations.

use std::io;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS setup failed.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Server returned an error reply.
    #[error("SMTP error {code}: {message}")]
    Smtp {
        /// Reply code (e.g., 550).
        code: u16,
        /// Reply text from the server.
        message: String,
    },

    /// Unexpected or malformed server response.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server closed the connection mid-conversation.
    #[error("Connection closed by server")]
    ConnectionClosed,

    /// Address cannot be used in an envelope.
    #[error("Invalid envelope address: {0}")]
    InvalidAddress(String),

    /// Message is larger than the server's advertised SIZE.
    #[error("Message exceeds size limit: {size} > {limit} bytes")]
    MessageTooLarge {
        /// Message size in bytes.
        size: usize,
        /// Limit advertised by the server.
        limit: usize,
    },

    /// Feature not offered by the server.
    #[error("Server does not support {0}")]
    NotSupported(String),
}

impl Error {
    /// Creates an SMTP error from a reply code and message.
    #[must_use]
    pub fn smtp(code: u16, message: impl Into<String>) -> Self {
        Self::Smtp {
            code,
            message: message.into(),
        }
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Smtp { code, .. } if *code >= 500 && *code < 600)
    }

    /// Returns true if this is a transient error (4xx) or the connection
    /// dropped before the server answered.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Smtp { code, .. } => *code >= 400 && *code < 500,
            Self::Io(_) | Self::ConnectionClosed => true,
            _ => false,
        }
    }
}
