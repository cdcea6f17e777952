//! Bounce-correlation addresses.
//!
//! The envelope sender of every message encodes the recipient and the
//! campaign message id, so a bounce can be traced back to one backlog entry:
//!
//! ```text
//! bump_<base64url(recipient)>-<message id>
//! ```

use kannon_mime::encoding::{decode_base64_url, encode_base64_url};

const PREFIX: &str = "bump_";

/// Builds the return path for a recipient of a campaign.
#[must_use]
pub fn return_path(recipient: &str, message_id: &str) -> String {
    format!("{PREFIX}{}-{message_id}", encode_base64_url(recipient.as_bytes()))
}

/// Builds the `Message-ID` header value, angle brackets included.
#[must_use]
pub fn message_id_header(recipient: &str, message_id: &str) -> String {
    format!("<{}/{message_id}>", encode_base64_url(recipient.as_bytes()))
}

/// Recovers `(recipient, message id)` from a return path.
///
/// The encoded recipient may itself contain `-`, and so may the message id.
/// The separator is the rightmost `-` whose left side is a complete padded
/// base64url block decoding to an address. Any later `-` starts a base64
/// quantum with a `0xF8..=0xFB` lead byte, which is never valid UTF-8.
#[must_use]
pub fn parse_return_path(value: &str) -> Option<(String, String)> {
    let rest = value.strip_prefix(PREFIX)?;

    rest.rmatch_indices('-').find_map(|(index, _)| {
        let (encoded, message_id) = (&rest[..index], &rest[index + 1..]);
        if encoded.is_empty() || encoded.len() % 4 != 0 || message_id.is_empty() {
            return None;
        }
        let recipient = String::from_utf8(decode_base64_url(encoded).ok()?).ok()?;
        recipient
            .contains('@')
            .then(|| (recipient, message_id.to_string()))
    })
}
