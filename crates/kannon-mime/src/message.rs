//! Wire-format message rendering.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::encoding::{encode_quoted_printable, encode_rfc2047};
use crate::error::{Error, Result};
use crate::header::Headers;

/// A rendered message ready to be signed and sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Message headers, in wire order.
    pub headers: Headers,
    /// Encoded body (Quoted-Printable, CRLF line endings).
    pub body: String,
}

impl Message {
    /// Serializes the message to RFC 5322 bytes.
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.headers.to_string().into_bytes();
        out.extend_from_slice(b"\r\n");
        out.extend_from_slice(self.body.as_bytes());
        if !self.body.ends_with("\r\n") {
            out.extend_from_slice(b"\r\n");
        }
        out
    }
}

/// Builder for single-part HTML messages.
#[derive(Debug, Clone, Default)]
pub struct MessageBuilder {
    headers: Headers,
    html: String,
    fields: BTreeMap<String, String>,
    date: Option<DateTime<Utc>>,
}

impl MessageBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the `From` header.
    #[must_use]
    pub fn from(mut self, from: impl Into<String>) -> Self {
        self.headers.set("From", from);
        self
    }

    /// Sets the `To` header.
    #[must_use]
    pub fn to(mut self, to: impl Into<String>) -> Self {
        self.headers.set("To", to);
        self
    }

    /// Sets the `Subject` header, RFC 2047 encoded when needed.
    #[must_use]
    pub fn subject(mut self, subject: &str) -> Self {
        self.headers.set("Subject", encode_rfc2047(subject, "utf-8"));
        self
    }

    /// Sets the `Message-ID` header. The value should include angle brackets.
    #[must_use]
    pub fn message_id(mut self, message_id: impl Into<String>) -> Self {
        self.headers.set("Message-ID", message_id);
        self
    }

    /// Sets an arbitrary header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Sets the `Date` header. Defaults to the time of [`build`](Self::build).
    #[must_use]
    pub const fn date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the HTML template used as body.
    #[must_use]
    pub fn html_body(mut self, html: impl Into<String>) -> Self {
        self.html = html.into();
        self
    }

    /// Adds a substitution field for `{{ name }}` placeholders.
    #[must_use]
    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Adds several substitution fields.
    #[must_use]
    pub fn fields<I, K, V>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Renders the message.
    ///
    /// # Errors
    ///
    /// Returns an error if `From` or `To` is missing, or a header would break
    /// the message framing.
    pub fn build(self) -> Result<Message> {
        let mut headers = self.headers;

        for required in ["From", "To"] {
            if headers.get(required).is_none() {
                return Err(Error::MissingHeader(required.to_string()));
            }
        }

        let date = self.date.unwrap_or_else(Utc::now);
        headers.set("Date", date.to_rfc2822());
        headers.set("MIME-Version", "1.0");
        headers.set("Content-Type", "text/html; charset=UTF-8");
        headers.set("Content-Transfer-Encoding", "quoted-printable");
        headers.validate()?;

        let html = render_template(&self.html, &self.fields);
        Ok(Message {
            headers,
            body: encode_quoted_printable(&html),
        })
    }
}

/// Replaces `{{ name }}` placeholders with values from `fields`.
///
/// Whitespace inside the braces is ignored. Unknown placeholders are left
/// untouched so a missing field is visible in the output rather than silently
/// blank.
#[must_use]
pub fn render_template(template: &str, fields: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];

        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            return out;
        };

        let key = after[..end].trim();
        match fields.get(key) {
            Some(value) => out.push_str(value),
            None => out.push_str(&rest[start..start + 2 + end + 2]),
        }
        rest = &after[end + 2..];
    }

    out.push_str(rest);
    out
}
