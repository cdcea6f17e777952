//! Message broker bridge.
//!
//! The pipeline only needs three capabilities from a broker: publish bytes to
//! a subject, pull the next message of a durable consumer, and acknowledge it
//! once processed. [`NatsBroker`] implements them on NATS `JetStream`.

mod nats;

pub use nats::{NatsBroker, NatsConsumer, NatsMessage};

use async_trait::async_trait;

use crate::error::BrokerError;

/// Stream carrying every pipeline subject.
pub const STREAM: &str = "kannon";

/// Subject of [`EmailToSend`](crate::pb::EmailToSend) payloads.
pub const SUBJECT_SENDING: &str = "emails.sending";

/// Subject of [`EmailError`](crate::pb::EmailError) events.
pub const SUBJECT_ERROR: &str = "email-error";

/// Subject of [`EmailDelivered`](crate::pb::EmailDelivered) events.
pub const SUBJECT_DELIVERED: &str = "email-delivered";

/// Durable consumer of the sending worker.
pub const CONSUMER_SENDER: &str = "email-sender";

/// Publishes payloads.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publishes `payload` on `subject`.
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError>;
}

/// A delivered message awaiting acknowledgement.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    /// Message body.
    fn payload(&self) -> &[u8];

    /// Acknowledges the message so it is not redelivered.
    async fn ack(&self) -> Result<(), BrokerError>;
}

/// A durable pull consumer.
#[async_trait]
pub trait Consumer: Send {
    /// Message type handed out by this consumer.
    type Message: Acknowledge;

    /// Waits for the next message.
    async fn next(&mut self) -> Result<Self::Message, BrokerError>;
}
