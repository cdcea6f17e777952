//! DKIM signing (RFC 6376).
//!
//! Produces `rsa-sha256` signatures with `relaxed/relaxed` canonicalization
//! through `mail-auth`. PKCS#1 v1.5 signatures carry no randomness, so two
//! signatures of the same message taken in the same second (same `t=`) are
//! byte-identical.

mod key;

use std::fmt;

use mail_auth::common::crypto::{RsaKey, Sha256};
use mail_auth::common::headers::HeaderWriter;
use mail_auth::dkim::{self, Canonicalization, Done};
use rsa::RsaPrivateKey;
use rsa::pkcs1::{EncodeRsaPrivateKey, LineEnding};

pub use key::parse_private_key;

/// Errors that can occur while signing.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// Private key could not be parsed.
    #[error("invalid DKIM private key: {0}")]
    InvalidKey(String),

    /// Message has no header/body separator.
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    /// Domain, selector or header list missing.
    #[error("invalid signing parameters: {0}")]
    InvalidParameters(String),

    /// Signature computation failed.
    #[error("RSA signing failed: {0}")]
    Rsa(String),
}

/// Everything needed to sign a message for one domain.
#[derive(Debug, Clone)]
pub struct SignData {
    /// Private key, PEM (PKCS#1 or PKCS#8) or bare base64 DER.
    pub private_key: String,
    /// Signing domain (`d=`).
    pub domain: String,
    /// Selector (`s=`).
    pub selector: String,
    /// Header names to sign.
    pub headers: Vec<String>,
}

impl SignData {
    /// Creates sign data with no headers.
    #[must_use]
    pub fn new(
        private_key: impl Into<String>,
        domain: impl Into<String>,
        selector: impl Into<String>,
    ) -> Self {
        Self {
            private_key: private_key.into(),
            domain: domain.into(),
            selector: selector.into(),
            headers: Vec::new(),
        }
    }

    /// Sets the header names to sign.
    #[must_use]
    pub fn headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.headers = headers.into_iter().map(Into::into).collect();
        self
    }
}

/// Signs `message` and returns it with a `DKIM-Signature` header prepended.
///
/// # Errors
///
/// Returns a [`SigningError`] on malformed key material, missing parameters
/// or an unparseable message.
pub fn sign_message(data: &SignData, message: &[u8]) -> Result<Vec<u8>, SigningError> {
    let key = parse_private_key(&data.private_key)?;
    DkimSigner::new(key, &data.domain, &data.selector, &data.headers)?.sign(message)
}

/// A parsed key bound to a domain, selector and header list.
pub struct DkimSigner {
    inner: dkim::DkimSigner<RsaKey<Sha256>, Done>,
    domain: String,
    selector: String,
}

impl DkimSigner {
    /// Creates a signer.
    ///
    /// # Errors
    ///
    /// Returns an error if domain, selector or headers are empty, or the key
    /// is rejected by the signer.
    pub fn new<S: AsRef<str>>(
        key: RsaPrivateKey,
        domain: &str,
        selector: &str,
        headers: &[S],
    ) -> Result<Self, SigningError> {
        if domain.is_empty() || selector.is_empty() {
            return Err(SigningError::InvalidParameters(
                "domain and selector are required".to_string(),
            ));
        }
        if headers.is_empty() {
            return Err(SigningError::InvalidParameters(
                "no headers to sign".to_string(),
            ));
        }

        let pem = key
            .to_pkcs1_pem(LineEnding::LF)
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;
        let key = RsaKey::<Sha256>::from_pkcs1_pem(pem.as_str())
            .map_err(|e| SigningError::InvalidKey(e.to_string()))?;

        let inner = dkim::DkimSigner::from_key(key)
            .domain(domain)
            .selector(selector)
            .headers(headers.iter().map(|h| h.as_ref().to_string()))
            .header_canonicalization(Canonicalization::Relaxed)
            .body_canonicalization(Canonicalization::Relaxed);

        Ok(Self {
            inner,
            domain: domain.to_string(),
            selector: selector.to_string(),
        })
    }

    /// Signs a message.
    ///
    /// # Errors
    ///
    /// Returns an error if the message has no header/body separator or
    /// signing fails.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SigningError> {
        if !message.windows(4).any(|w| w == b"\r\n\r\n") {
            return Err(SigningError::MalformedMessage(
                "no header/body separator".to_string(),
            ));
        }

        let signature = self
            .inner
            .sign(message)
            .map_err(|e| SigningError::Rsa(e.to_string()))?;
        let header = signature.to_header();

        let mut out = Vec::with_capacity(header.len() + 2 + message.len());
        out.extend_from_slice(header.as_bytes());
        if !header.ends_with("\r\n") {
            out.extend_from_slice(b"\r\n");
        }
        out.extend_from_slice(message);
        Ok(out)
    }
}

impl fmt::Debug for DkimSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSigner")
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .finish_non_exhaustive()
    }
}
