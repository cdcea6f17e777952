//! # kannon-smtp
//!
//! A small SMTP client (RFC 5321) that relays one envelope per connection.
//!
//! ## Features
//!
//! - **Relay delivery**: greeting, EHLO, MAIL FROM, RCPT TO, DATA, QUIT
//! - **TLS support**: implicit TLS (port 465) and STARTTLS, via rustls
//! - **Transparent DATA**: CRLF normalisation and dot-stuffing
//! - **Reply classification**: transient (4xx) vs permanent (5xx) failures
//!
//! ## Quick Start
//!
//! ```ignore
//! use kannon_smtp::{Relay, Security};
//!
//! #[tokio::main]
//! async fn main() -> kannon_smtp::Result<()> {
//!     let relay = Relay::new("mx.example.com", 587)
//!         .security(Security::StartTls)
//!         .hello_name("mailer.acme.test");
//!
//!     relay
//!         .deliver(
//!             "bump_YWxpY2VAZXhhbXBsZS5jb20=-message_1@acme.test",
//!             "alice@example.com",
//!             b"Subject: Test\r\n\r\nHello, World!\r\n",
//!         )
//!         .await
//! }
//! ```
//!
//! ## Modules
//!
//! - [`command`]: SMTP command serialization
//! - [`connection`]: Conversation driver and transport setup
//! - [`parser`]: Reply parser
//! - [`types`]: Envelope addresses and replies

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod command;
pub mod connection;
mod error;
pub mod parser;
mod relay;
pub mod types;

pub use connection::{Capabilities, Conversation};
pub use error::{Error, Result};
pub use relay::{Relay, Security};
pub use types::{Address, Envelope, Reply, ReplyCode};
