//! # kannon-mime
//!
//! Wire-format message rendering and DKIM signing for outbound campaign mail.
//!
//! ## Features
//!
//! - **Rendering**: Build RFC 5322 messages with an HTML body from a template
//!   and per-recipient substitution fields
//! - **Encoding**: Base64 (standard and URL-safe), Quoted-Printable, RFC 2047
//!   header encoding
//! - **DKIM**: RFC 6376 `rsa-sha256` signing with relaxed/relaxed
//!   canonicalization, via `mail-auth`
//!
//! ## Quick Start
//!
//! ### Rendering a message
//!
//! ```ignore
//! use kannon_mime::MessageBuilder;
//!
//! let message = MessageBuilder::new()
//!     .from("Acme <news@acme.test>")
//!     .to("alice@example.com")
//!     .subject("Hello")
//!     .message_id("<YWxpY2U=/message_1@acme.test>")
//!     .html_body("<p>Hello {{ name }}</p>")
//!     .field("name", "Alice")
//!     .build()?;
//!
//! let bytes = message.to_bytes();
//! ```
//!
//! ### Signing
//!
//! ```ignore
//! use kannon_mime::dkim::{SignData, sign_message};
//!
//! let data = SignData::new(private_key_pem, "acme.test", "smtp")
//!     .headers(["From", "To", "Subject", "Message-ID"]);
//! let signed = sign_message(&data, &bytes)?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

mod error;
mod header;
mod message;

pub mod dkim;
pub mod encoding;

pub use error::{Error, Result};
pub use header::Headers;
pub use message::{Message, MessageBuilder, render_template};
