//! Envelope address types.

use crate::error::{Error, Result};

/// Address usable in `MAIL FROM` / `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is empty, lacks a single `@` with
    /// non-empty sides, or contains characters that would break the command
    /// line (whitespace, angle brackets, control characters).
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("address cannot be empty".into()));
        }

        if addr
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!("illegal character in {addr:?}")));
        }

        match addr.split_once('@') {
            Some((local, domain))
                if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
            {
                Ok(())
            }
            _ => Err(Error::InvalidAddress(format!(
                "{addr:?} must be local@domain"
            ))),
        }
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// One sender and one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Reverse path (`MAIL FROM`), where bounces go.
    pub from: Address,
    /// Forward path (`RCPT TO`).
    pub to: Address,
}

impl Envelope {
    /// Builds an envelope, validating both addresses.
    ///
    /// # Errors
    ///
    /// Returns an error if either address is invalid.
    pub fn new(from: &str, to: &str) -> Result<Self> {
        Ok(Self {
            from: Address::new(from)?,
            to: Address::new(to)?,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_return_path_is_valid() {
        let addr = Address::new("bump_YWxpY2VAZXhhbXBsZS5jb20=-message_1@acme.test").unwrap();
        assert_eq!(addr.to_string(), "bump_YWxpY2VAZXhhbXBsZS5jb20=-message_1@acme.test");
    }

    #[test]
    fn test_invalid_addresses() {
        for bad in [
            "",
            "userexample.com",
            "@example.com",
            "user@",
            "a@b@c",
            "user@example.com>",
            "user@example.com\r\nRCPT TO:<x@y>",
            "us er@example.com",
        ] {
            assert!(Address::new(bad).is_err(), "{bad:?} accepted");
        }
    }

    #[test]
    fn test_envelope() {
        let envelope = Envelope::new("bounce@acme.test", "alice@example.com").unwrap();
        assert_eq!(envelope.to.as_str(), "alice@example.com");
        assert!(Envelope::new("bounce@acme.test", "nobody").is_err());
    }
}
