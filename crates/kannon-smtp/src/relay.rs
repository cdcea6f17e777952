//! One-shot relay delivery.

use std::fmt;
use std::str::FromStr;

use tokio::io::{AsyncRead, AsyncWrite};
use tracing::debug;

use crate::connection::{Conversation, connect, handshake};
use crate::error::{Error, Result};
use crate::types::Envelope;

/// Connection security.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Security {
    /// Plain text, no encryption.
    #[default]
    None,
    /// Implicit TLS from the first byte.
    Tls,
    /// Plain connection upgraded with STARTTLS.
    StartTls,
}

impl fmt::Display for Security {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Tls => "tls",
            Self::StartTls => "starttls",
        })
    }
}

impl FromStr for Security {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "plain" => Ok(Self::None),
            "tls" | "ssl" => Ok(Self::Tls),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::NotSupported(format!("security mode {other:?}"))),
        }
    }
}

/// An SMTP relay that accepts one envelope per connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relay {
    host: String,
    port: u16,
    security: Security,
    hello_name: String,
}

impl Relay {
    /// Creates a relay target with no encryption and `localhost` as the EHLO
    /// name.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            security: Security::None,
            hello_name: "localhost".to_string(),
        }
    }

    /// Sets connection security.
    #[must_use]
    pub const fn security(mut self, security: Security) -> Self {
        self.security = security;
        self
    }

    /// Sets the name sent with EHLO.
    #[must_use]
    pub fn hello_name(mut self, hello_name: impl Into<String>) -> Self {
        self.hello_name = hello_name.into();
        self
    }

    /// Relay host.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Relay port.
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Delivers one message: connect, greet, transact, quit.
    ///
    /// `from` is the envelope reverse path, so bounces land on it rather than
    /// on the `From` header.
    ///
    /// # Errors
    ///
    /// Returns an error on invalid addresses, connection or TLS failure, or
    /// any rejected step of the conversation.
    pub async fn deliver(&self, from: &str, to: &str, message: &[u8]) -> Result<()> {
        let envelope = Envelope::new(from, to)?;
        debug!(
            host = %self.host,
            port = self.port,
            security = %self.security,
            to = %envelope.to,
            "Relaying message"
        );

        let tcp = connect(&self.host, self.port).await?;
        match self.security {
            Security::None => {
                let conversation = Conversation::open(tcp).await?;
                self.transact(conversation, &envelope, message).await
            }
            Security::Tls => {
                let tls = handshake(&self.host, tcp).await?;
                let conversation = Conversation::open(tls).await?;
                self.transact(conversation, &envelope, message).await
            }
            Security::StartTls => {
                let mut conversation = Conversation::open(tcp).await?;
                conversation.ehlo(&self.hello_name).await?;
                let conversation = conversation.starttls(&self.host).await?;
                self.transact(conversation, &envelope, message).await
            }
        }
    }

    async fn transact<S>(
        &self,
        mut conversation: Conversation<S>,
        envelope: &Envelope,
        message: &[u8],
    ) -> Result<()>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        conversation.ehlo(&self.hello_name).await?;
        conversation.send_mail(envelope, message).await?;
        conversation.quit().await
    }
}
