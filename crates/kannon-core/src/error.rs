//! Error types for the core library.
//!
//! Every error carries a classification: [`Error::is_fatal`] tells a loop
//! whether to stop (store or broker connectivity) or to log and move on to
//! the next entry.

use kannon_mime::dkim::SigningError;
use thiserror::Error;

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Backing store unavailable, query failed, or a row could not be decoded.
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// A referenced record is missing.
    #[error("{kind} not found: {key}")]
    NotFound {
        /// Record kind (`sending pool`, `domain`, `template`, ...).
        kind: &'static str,
        /// Lookup key.
        key: String,
    },

    /// Payload encode/decode failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Message rendering or DKIM signing failed.
    #[error("Signing error: {0}")]
    Signing(#[from] SigningError),

    /// Delivery attempt failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Publish or consume failure.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// See [`Error::Store`].
    Store,
    /// See [`Error::NotFound`].
    NotFound,
    /// See [`Error::Serialization`].
    Serialization,
    /// See [`Error::Signing`].
    Signing,
    /// See [`Error::Transport`].
    Transport,
    /// See [`Error::Broker`].
    Broker,
    /// See [`Error::Config`].
    Config,
}

impl Error {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, key: impl ToString) -> Self {
        Self::NotFound {
            kind,
            key: key.to_string(),
        }
    }

    /// Returns the classification of this error.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Store(_) => ErrorKind::Store,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Serialization(_) => ErrorKind::Serialization,
            Self::Signing(_) => ErrorKind::Signing,
            Self::Transport(_) => ErrorKind::Transport,
            Self::Broker(_) => ErrorKind::Broker,
            Self::Config(_) => ErrorKind::Config,
        }
    }

    /// Returns true if the error must stop the task that hit it.
    ///
    /// Store and configuration errors are always fatal. Broker errors are
    /// fatal except for publish failures, which only affect one entry.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::Store(_) | Self::Config(_) => true,
            Self::Broker(e) => e.is_fatal(),
            Self::NotFound { .. } | Self::Serialization(_) | Self::Signing(_) | Self::Transport(_) => {
                false
            }
        }
    }
}

impl From<prost::DecodeError> for Error {
    fn from(e: prost::DecodeError) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Failure reported by a transport.
///
/// The text is whatever the transport said; it is persisted verbatim as the
/// entry's error detail.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl From<kannon_smtp::Error> for TransportError {
    fn from(e: kannon_smtp::Error) -> Self {
        Self(e.to_string())
    }
}

/// Broker failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// Could not connect or set up the stream.
    #[error("cannot connect to broker: {0}")]
    Connect(String),

    /// Durable consumer could not be registered.
    #[error("cannot register consumer {name}: {reason}")]
    Consumer {
        /// Durable consumer name.
        name: String,
        /// Broker's reason.
        reason: String,
    },

    /// Reading the next message failed.
    #[error("cannot read from broker: {0}")]
    Read(String),

    /// Acknowledgement failed.
    #[error("cannot acknowledge message: {0}")]
    Ack(String),

    /// Publishing failed.
    #[error("cannot publish to {subject}: {reason}")]
    Publish {
        /// Target subject.
        subject: String,
        /// Broker's reason.
        reason: String,
    },
}

impl BrokerError {
    /// Publish failures are per-entry; everything else stops the task.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self, Self::Publish { .. })
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(Error::Store(sqlx::Error::PoolTimedOut).is_fatal());
        assert_eq!(Error::Store(sqlx::Error::PoolTimedOut).kind(), ErrorKind::Store);

        let missing = Error::not_found("template", "tpl_1");
        assert!(!missing.is_fatal());
        assert_eq!(missing.kind(), ErrorKind::NotFound);
        assert_eq!(missing.to_string(), "template not found: tpl_1");

        let publish = Error::from(BrokerError::Publish {
            subject: "emails.sending".into(),
            reason: "disconnected".into(),
        });
        assert!(!publish.is_fatal());
        assert!(Error::from(BrokerError::Read("eof".into())).is_fatal());
        assert!(Error::from(BrokerError::Ack("timeout".into())).is_fatal());
    }

    #[test]
    fn test_transport_text_is_verbatim() {
        let err = Error::from(TransportError("550 mailbox unavailable".into()));
        assert_eq!(err.to_string(), "550 mailbox unavailable");
        assert_eq!(err.kind(), ErrorKind::Transport);

        let smtp = TransportError::from(kannon_smtp::Error::smtp(452, "mailbox full"));
        assert_eq!(smtp.0, "SMTP error 452: mailbox full");
    }
}
