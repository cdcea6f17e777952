//! Dispatch pipeline data models.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use kannon_mime::encoding::encode_mailbox;
use uuid::Uuid;

/// Sender identity of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    /// Sender address.
    pub email: String,
    /// Display name, empty when none.
    pub alias: String,
}

impl SenderIdentity {
    /// Creates a sender identity.
    #[must_use]
    pub fn new(email: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            alias: alias.into(),
        }
    }

    /// Renders the sender for a `From` header: `Alias <email>` or the bare
    /// address when there is no alias. Non-ASCII aliases are RFC 2047
    /// encoded and aliases with specials are quoted.
    #[must_use]
    pub fn display(&self) -> String {
        encode_mailbox(&self.alias, &self.email)
    }
}

/// One outbound send job (a sending pool). Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendingPool {
    /// Pool identifier.
    pub id: i64,
    /// Process-unique message identifier, `message_<uuid>@<domain>`.
    pub message_id: String,
    /// Owning sending domain.
    pub domain: String,
    /// Who the mail is from.
    pub sender: SenderIdentity,
    /// Subject line.
    pub subject: String,
    /// Template used for the body.
    pub template_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Generates a fresh campaign message identifier for a domain.
#[must_use]
pub fn new_message_id(domain: &str) -> String {
    format!("message_{}@{domain}", Uuid::new_v4())
}

/// Lifecycle of a backlog entry.
///
/// The only transitions are `scheduled → sending → {sent | error}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SendingStatus {
    /// Waiting to be claimed.
    Scheduled,
    /// Claimed by a dispatcher; in flight.
    Sending,
    /// Accepted by the transport.
    Sent,
    /// Delivery attempt failed.
    Error,
}

impl SendingStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(Self::Scheduled),
            "sending" => Some(Self::Sending),
            "sent" => Some(Self::Sent),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Sending => "sending",
            Self::Sent => "sent",
            Self::Error => "error",
        }
    }

    /// Returns true for `sent` and `error`.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Sent | Self::Error)
    }
}

impl fmt::Display for SendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome written at the end of a delivery attempt.
///
/// Only terminal statuses can be expressed, so no write can move an entry
/// back to `scheduled`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalStatus {
    /// Delivered to the transport.
    Sent,
    /// Failed with a detail message.
    Error(String),
}

impl TerminalStatus {
    /// Stored status.
    #[must_use]
    pub const fn status(&self) -> SendingStatus {
        match self {
            Self::Sent => SendingStatus::Sent,
            Self::Error(_) => SendingStatus::Error,
        }
    }

    /// Stored error text.
    #[must_use]
    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Sent => None,
            Self::Error(detail) => Some(detail),
        }
    }
}

/// One (campaign, recipient) pair in the backlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendingPoolEmail {
    /// Entry identifier.
    pub id: i64,
    /// Owning pool.
    pub sending_pool_id: i64,
    /// Recipient address.
    pub email: String,
    /// Current status.
    pub status: SendingStatus,
    /// Error text of the last failed attempt.
    pub error: Option<String>,
    /// Per-recipient template substitutions.
    pub fields: BTreeMap<String, String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// A sending domain and its DKIM keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Domain {
    /// Domain name.
    pub domain: String,
    /// DKIM private key: PKCS#1/PKCS#8 PEM or base64 DER.
    pub dkim_private_key: String,
    /// DKIM public key, as published in DNS.
    pub dkim_public_key: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// The HTML body of a campaign.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    /// Template identifier.
    pub template_id: String,
    /// Owning domain.
    pub domain: String,
    /// HTML with `{{ name }}` placeholders.
    pub html: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}
