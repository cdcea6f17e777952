//! Private key loading.

use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;

use super::SigningError;
use crate::encoding::decode_base64;

/// Parses an RSA private key.
///
/// Accepts PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`)
/// PEM, or the bare base64 DER body of either.
///
/// # Errors
///
/// Returns [`SigningError::InvalidKey`] if no format matches.
pub fn parse_private_key(material: &str) -> Result<RsaPrivateKey, SigningError> {
    let material = material.trim();

    if material.contains("-----BEGIN") {
        return RsaPrivateKey::from_pkcs8_pem(material)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(material))
            .map_err(|e| SigningError::InvalidKey(e.to_string()));
    }

    let compact: String = material.split_whitespace().collect();
    let der = decode_base64(&compact).map_err(|e| SigningError::InvalidKey(e.to_string()))?;
    RsaPrivateKey::from_pkcs8_der(&der)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(&der))
        .map_err(|e| SigningError::InvalidKey(e.to_string()))
}
