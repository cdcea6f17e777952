//! SMTP conversation driver.
//!
//! A [`Conversation`] owns one connection and walks it through the relay
//! dialogue. It is generic over the byte stream so the same code runs over
//! TCP, TLS and in-memory test streams.

mod stream;

pub use stream::{connect, handshake};

use crate::command::{Command, data_payload, message_size};
use crate::error::{Error, Result};
use crate::parser::{is_last_reply_line, parse_reply};
use crate::types::{Envelope, Reply, ReplyCode};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

/// Server capabilities from the EHLO response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Hostname the server announced in its EHLO reply.
    pub hostname: String,
    /// Server offers STARTTLS.
    pub starttls: bool,
    /// Maximum message size, if advertised with a value.
    pub max_size: Option<usize>,
    /// Every advertised keyword, uppercased.
    pub keywords: Vec<String>,
}

impl Capabilities {
    /// Builds capabilities from an EHLO reply.
    #[must_use]
    pub fn from_ehlo(reply: &Reply) -> Self {
        let mut lines = reply.message.iter();
        let hostname = lines
            .next()
            .and_then(|line| line.split_whitespace().next())
            .unwrap_or_default()
            .to_string();

        let mut caps = Self {
            hostname,
            ..Self::default()
        };

        for line in lines {
            let mut parts = line.split_whitespace();
            let Some(keyword) = parts.next() else {
                continue;
            };
            let keyword = keyword.to_ascii_uppercase();
            match keyword.as_str() {
                "STARTTLS" => caps.starttls = true,
                "SIZE" => {
                    caps.max_size = parts
                        .next()
                        .and_then(|s| s.parse().ok())
                        .filter(|&n| n > 0);
                }
                _ => {}
            }
            caps.keywords.push(keyword);
        }

        caps
    }
}

/// One SMTP session over a byte stream.
#[derive(Debug)]
pub struct Conversation<S> {
    stream: BufReader<S>,
    capabilities: Capabilities,
}

impl<S> Conversation<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wraps a connected stream and reads the server greeting.
    ///
    /// # Errors
    ///
    /// Returns an error if the greeting cannot be read or is not `220`.
    pub async fn open(stream: S) -> Result<Self> {
        let mut conversation = Self {
            stream: BufReader::new(stream),
            capabilities: Capabilities::default(),
        };
        conversation
            .read_reply()
            .await?
            .require(ReplyCode::SERVICE_READY)?;
        Ok(conversation)
    }

    /// Sends EHLO and records the server's capabilities.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the greeting.
    pub async fn ehlo(&mut self, hello_name: &str) -> Result<&Capabilities> {
        let reply = self
            .command(Command::Ehlo {
                hostname: hello_name.to_string(),
            })
            .await?
            .require_success()?;
        self.capabilities = Capabilities::from_ehlo(&reply);
        Ok(&self.capabilities)
    }

    /// Capabilities from the last EHLO.
    #[must_use]
    pub const fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Runs one mail transaction: `MAIL FROM`, `RCPT TO`, `DATA`.
    ///
    /// # Errors
    ///
    /// Returns an error if the message exceeds the advertised size, or the
    /// server rejects any step.
    pub async fn send_mail(&mut self, envelope: &Envelope, message: &[u8]) -> Result<()> {
        let size = self
            .capabilities
            .max_size
            .map(|limit| (message_size(message), limit));
        if let Some((size, limit)) = size {
            if size > limit {
                return Err(Error::MessageTooLarge { size, limit });
            }
        }

        self.command(Command::MailFrom {
            from: envelope.from.clone(),
            size: size.map(|(size, _)| size),
        })
        .await?
        .require_success()?;

        self.command(Command::RcptTo {
            to: envelope.to.clone(),
        })
        .await?
        .require_success()?;

        self.command(Command::Data)
            .await?
            .require(ReplyCode::START_DATA)?;

        self.write(&data_payload(message)).await?;
        self.read_reply().await?.require_success()?;
        Ok(())
    }

    /// Sends QUIT and drops the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server answers with anything but `221`/`250`.
    pub async fn quit(mut self) -> Result<()> {
        let reply = self.command(Command::Quit).await?;
        if reply.code != ReplyCode::CLOSING {
            reply.require_success()?;
        }
        Ok(())
    }

    async fn command(&mut self, cmd: Command) -> Result<Reply> {
        tracing::trace!(verb = cmd.verb(), "SMTP command");
        self.write(&cmd.serialize()).await?;
        let reply = self.read_reply().await?;
        tracing::trace!(verb = cmd.verb(), code = reply.code.as_u16(), "SMTP reply");
        Ok(reply)
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        let stream = self.stream.get_mut();
        stream.write_all(data).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn read_reply(&mut self) -> Result<Reply> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            if self.stream.read_line(&mut line).await? == 0 {
                return Err(Error::ConnectionClosed);
            }

            let line = line.trim_end_matches(['\r', '\n']).to_string();
            if line.is_empty() {
                continue;
            }

            let is_last = is_last_reply_line(&line);
            lines.push(line);
            if is_last {
                break;
            }
        }

        parse_reply(&lines)
    }
}

impl Conversation<TcpStream> {
    /// Upgrades the session with STARTTLS.
    ///
    /// The returned conversation has no capabilities until EHLO is sent again.
    ///
    /// # Errors
    ///
    /// Returns an error if the server did not offer STARTTLS, rejects it, or
    /// the handshake fails.
    pub async fn starttls(mut self, hostname: &str) -> Result<Conversation<TlsStream<TcpStream>>> {
        if !self.capabilities.starttls {
            return Err(Error::NotSupported("STARTTLS".into()));
        }

        self.command(Command::StartTls)
            .await?
            .require(ReplyCode::SERVICE_READY)?;

        let tls = handshake(hostname, self.stream.into_inner()).await?;
        Ok(Conversation {
            stream: BufReader::new(tls),
            capabilities: Capabilities::default(),
        })
    }
}
