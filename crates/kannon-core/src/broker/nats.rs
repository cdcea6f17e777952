//! NATS `JetStream` binding.

use std::fmt;

use async_nats::jetstream::{self, consumer::AckPolicy, consumer::pull, stream};
use async_trait::async_trait;
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    Acknowledge, Consumer, Publisher, STREAM, SUBJECT_DELIVERED, SUBJECT_ERROR, SUBJECT_SENDING,
};
use crate::error::BrokerError;

/// Connection to a NATS server with the `kannon` stream in place.
#[derive(Clone)]
pub struct NatsBroker {
    client: async_nats::Client,
    jetstream: jetstream::Context,
}

impl NatsBroker {
    /// Connects and makes sure the `kannon` stream exists.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Connect`] if the server is unreachable or the
    /// stream cannot be created.
    pub async fn connect(url: &str) -> Result<Self, BrokerError> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;
        let jetstream = jetstream::new(client.clone());

        jetstream
            .get_or_create_stream(stream::Config {
                name: STREAM.to_string(),
                subjects: vec![
                    SUBJECT_SENDING.to_string(),
                    SUBJECT_ERROR.to_string(),
                    SUBJECT_DELIVERED.to_string(),
                ],
                ..Default::default()
            })
            .await
            .map_err(|e| BrokerError::Connect(e.to_string()))?;

        info!(url, stream = STREAM, "Connected to broker");
        Ok(Self { client, jetstream })
    }

    /// Registers (or reuses) a durable pull consumer on `subject` with
    /// explicit acknowledgement.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Consumer`] if the consumer cannot be created or
    /// its message stream opened.
    pub async fn durable_consumer(
        &self,
        name: &str,
        subject: &str,
    ) -> Result<NatsConsumer, BrokerError> {
        let consumer_error = |reason: String| BrokerError::Consumer {
            name: name.to_string(),
            reason,
        };

        let stream = self
            .jetstream
            .get_stream(STREAM)
            .await
            .map_err(|e| consumer_error(e.to_string()))?;
        let consumer: jetstream::consumer::PullConsumer = stream
            .get_or_create_consumer(
                name,
                pull::Config {
                    durable_name: Some(name.to_string()),
                    filter_subject: subject.to_string(),
                    ack_policy: AckPolicy::Explicit,
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| consumer_error(e.to_string()))?;
        let messages = consumer
            .messages()
            .await
            .map_err(|e| consumer_error(e.to_string()))?;

        debug!(consumer = name, subject, "Durable consumer ready");
        Ok(NatsConsumer {
            name: name.to_string(),
            messages,
        })
    }
}

impl fmt::Debug for NatsBroker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsBroker").finish_non_exhaustive()
    }
}

#[async_trait]
impl Publisher for NatsBroker {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), BrokerError> {
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .map_err(|e| BrokerError::Publish {
                subject: subject.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Message stream of a durable consumer.
pub struct NatsConsumer {
    name: String,
    messages: pull::Stream,
}

impl NatsConsumer {
    /// Durable consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for NatsConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsConsumer")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Consumer for NatsConsumer {
    type Message = NatsMessage;

    async fn next(&mut self) -> Result<NatsMessage, BrokerError> {
        match self.messages.next().await {
            Some(Ok(inner)) => Ok(NatsMessage { inner }),
            Some(Err(e)) => Err(BrokerError::Read(e.to_string())),
            None => Err(BrokerError::Read(format!(
                "consumer {} stream ended",
                self.name
            ))),
        }
    }
}

/// A `JetStream` message.
pub struct NatsMessage {
    inner: jetstream::Message,
}

impl fmt::Debug for NatsMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NatsMessage")
            .field("subject", &self.inner.subject)
            .field("len", &self.inner.payload.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Acknowledge for NatsMessage {
    fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    async fn ack(&self) -> Result<(), BrokerError> {
        self.inner
            .ack()
            .await
            .map_err(|e| BrokerError::Ack(e.to_string()))
    }
}
