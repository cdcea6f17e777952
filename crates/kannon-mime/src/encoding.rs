//! Encoding utilities for message bodies and headers.
//!
//! Supports Base64 (standard and URL-safe), Quoted-Printable and RFC 2047
//! header encoding.

use crate::error::Result;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE};
use std::fmt::Write as _;

/// Encodes data as Base64.
#[must_use]
pub fn encode_base64(data: &[u8]) -> String {
    STANDARD.encode(data)
}

/// Decodes Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid Base64.
pub fn decode_base64(data: &str) -> Result<Vec<u8>> {
    STANDARD.decode(data).map_err(Into::into)
}

/// Encodes data with the URL-safe Base64 alphabet (`-` and `_`), padded.
///
/// Used wherever an address has to survive inside another address or a
/// message identifier.
#[must_use]
pub fn encode_base64_url(data: &[u8]) -> String {
    URL_SAFE.encode(data)
}

/// Decodes padded URL-safe Base64 data.
///
/// # Errors
///
/// Returns an error if the input is not valid URL-safe Base64.
pub fn decode_base64_url(data: &str) -> Result<Vec<u8>> {
    URL_SAFE.decode(data).map_err(Into::into)
}

/// Maximum line length for Quoted-Printable encoding.
const MAX_LINE_LENGTH: usize = 76;

/// Encodes text using Quoted-Printable encoding (RFC 2045).
///
/// Hard line breaks in the input are kept as CRLF; long lines get soft
/// breaks so no encoded line exceeds 76 characters.
#[must_use]
pub fn encode_quoted_printable(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for (index, line) in text.split('\n').enumerate() {
        if index > 0 {
            result.push_str("\r\n");
        }
        let line = line.strip_suffix('\r').unwrap_or(line);
        let bytes = line.as_bytes();
        let mut line_length = 0;

        for (pos, &byte) in bytes.iter().enumerate() {
            let at_end = pos + 1 == bytes.len();
            // Whitespace is only literal when something follows it on the line
            let literal = matches!(byte, b'!'..=b'<' | b'>'..=b'~')
                || (matches!(byte, b' ' | b'\t') && !at_end);
            let width = if literal { 1 } else { 3 };

            if line_length + width > MAX_LINE_LENGTH - 1 {
                result.push_str("=\r\n");
                line_length = 0;
            }

            if literal {
                result.push(char::from(byte));
            } else {
                let _ = write!(result, "={byte:02X}");
            }
            line_length += width;
        }
    }

    result
}

/// Text bytes per encoded-word. A utf-8 word then stays well under the
/// 75-character RFC 2047 cap, and `Subject: ` plus one word fits in 76.
const WORD_BYTES: usize = 39;

/// Separator between encoded-words of one header: a folding point.
const FOLD: &str = "\r\n ";

/// RFC 5322 `specials`; a display name containing one must be quoted.
const SPECIALS: &[char] = &['(', ')', '<', '>', '[', ']', ':', ';', '@', '\\', ',', '.', '"'];

/// Encodes a header value using RFC 2047 encoding when it is not plain ASCII.
///
/// The value is split on character boundaries into `=?charset?B?...?=` words
/// folded onto continuation lines.
#[must_use]
pub fn encode_rfc2047(text: &str, charset: &str) -> String {
    if is_plain(text) {
        return text.to_string();
    }

    let mut words = Vec::new();
    let mut chunk = String::new();
    for c in text.chars() {
        if !chunk.is_empty() && chunk.len() + c.len_utf8() > WORD_BYTES {
            words.push(encoded_word(&chunk, charset));
            chunk.clear();
        }
        chunk.push(c);
    }
    if !chunk.is_empty() {
        words.push(encoded_word(&chunk, charset));
    }

    words.join(FOLD)
}

/// Renders a mailbox, `display-name <address>`, for an address header.
///
/// A non-ASCII name is RFC 2047 encoded; an ASCII name containing specials is
/// sent as a quoted string. An empty name yields the bare address.
#[must_use]
pub fn encode_mailbox(name: &str, address: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        return address.to_string();
    }

    let phrase = if !is_plain(name) {
        encode_rfc2047(name, "utf-8")
    } else if name.contains(SPECIALS) {
        quote(name)
    } else {
        name.to_string()
    };

    format!("{phrase} <{address}>")
}

fn quote(phrase: &str) -> String {
    let escaped = phrase.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

fn is_plain(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
}

fn encoded_word(chunk: &str, charset: &str) -> String {
    format!("=?{charset}?B?{}?=", encode_base64(chunk.as_bytes()))
}
