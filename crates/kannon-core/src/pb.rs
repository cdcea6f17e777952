//! Queue payloads exchanged over the broker.
//!
//! Protobuf-compatible: field tags are part of the wire contract with other
//! consumers of the `kannon` stream and must not be renumbered.

use prost::Message;

use crate::Result;

/// A message ready to be delivered, published on `emails.sending`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct EmailToSend {
    /// Rendered sender, `Alias <email>` or the bare address.
    #[prost(string, tag = "1")]
    pub from: String,
    /// Recipient address.
    #[prost(string, tag = "2")]
    pub to: String,
    /// Subject line.
    #[prost(string, tag = "3")]
    pub subject: String,
    /// Campaign message id.
    #[prost(string, tag = "4")]
    pub message_id: String,
    /// Envelope sender used for bounce correlation.
    #[prost(string, tag = "5")]
    pub return_path: String,
    /// Owning campaign.
    #[prost(int64, tag = "6")]
    pub sending_pool_id: i64,
    /// Template used for the body.
    #[prost(string, tag = "7")]
    pub template_id: String,
}

/// A failed delivery, published on `email-error`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct EmailError {
    /// Recipient address.
    #[prost(string, tag = "1")]
    pub email: String,
    /// Campaign message id.
    #[prost(string, tag = "2")]
    pub message_id: String,
    /// Failure detail.
    #[prost(string, tag = "3")]
    pub msg: String,
}

/// A successful delivery, published on `email-delivered`.
#[derive(Clone, PartialEq, Eq, Message)]
pub struct EmailDelivered {
    /// Recipient address.
    #[prost(string, tag = "1")]
    pub email: String,
    /// Campaign message id.
    #[prost(string, tag = "2")]
    pub message_id: String,
}

/// Encodes a payload to its wire bytes.
#[must_use]
pub fn encode<M: Message>(message: &M) -> Vec<u8> {
    message.encode_to_vec()
}

/// Decodes a payload from wire bytes.
///
/// # Errors
///
/// Returns [`Error::Serialization`](crate::Error::Serialization) if the bytes
/// are not a valid encoding of `M`.
pub fn decode<M: Message + Default>(bytes: &[u8]) -> Result<M> {
    Ok(M::decode(bytes)?)
}
