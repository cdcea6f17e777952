//! Ordered header collection.

use crate::error::{Error, Result};
use std::fmt;

/// Collection of email headers, kept in insertion order.
///
/// Names keep the casing they were added with; lookups are case-insensitive.
/// Order matters on the wire because DKIM signs headers bottom-up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    /// Creates a new empty header collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a header value.
    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.push((name.into(), value.into()));
    }

    /// Sets a header value, replacing any existing values.
    ///
    /// The header keeps the position of its first occurrence, or is appended
    /// if it was not present.
    pub fn set(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();

        match self.position(&name) {
            Some(index) => {
                self.entries[index].1 = value;
                let mut seen = 0;
                self.entries.retain(|(n, _)| {
                    if n.eq_ignore_ascii_case(&name) {
                        seen += 1;
                        seen == 1
                    } else {
                        true
                    }
                });
            }
            None => self.entries.push((name, value)),
        }
    }

    /// Gets the first value for a header.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.position(name).map(|index| self.entries[index].1.as_str())
    }

    /// Returns an iterator over all headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Returns the number of header lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no headers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Checks that every header can be written as a single field.
    ///
    /// # Errors
    ///
    /// Returns an error if a name is empty or contains characters outside
    /// printable ASCII or `:`, or if a value contains a line break that is
    /// not a fold (CRLF followed by a space or tab).
    pub fn validate(&self) -> Result<()> {
        for (name, value) in &self.entries {
            let bad_name = name.is_empty()
                || name
                    .bytes()
                    .any(|b| !b.is_ascii_graphic() || b == b':');
            if bad_name {
                return Err(Error::InvalidHeader(format!("bad name {name:?}")));
            }
            if has_bare_break(value) {
                return Err(Error::InvalidHeader(format!(
                    "line break in value of {name}"
                )));
            }
        }
        Ok(())
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
    }
}

fn has_bare_break(value: &str) -> bool {
    let bytes = value.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| match b {
        b'\r' => {
            bytes.get(i + 1) != Some(&b'\n') || !matches!(bytes.get(i + 2), Some(b' ' | b'\t'))
        }
        b'\n' => i == 0 || bytes[i - 1] != b'\r',
        _ => false,
    })
}

impl fmt::Display for Headers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (name, value) in &self.entries {
            write!(f, "{name}: {value}\r\n")?;
        }
        Ok(())
    }
}
