//! Outcome consumers: ingest delivery and error events.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::broker::{Acknowledge, Consumer, SUBJECT_DELIVERED, SUBJECT_ERROR};
use crate::error::BrokerError;
use crate::pb::{self, EmailDelivered, EmailError};

/// The two kinds of outcome event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    /// `email-error` events.
    Error,
    /// `email-delivered` events.
    Delivered,
}

impl OutcomeKind {
    /// Subject the events are published on.
    #[must_use]
    pub const fn subject(&self) -> &'static str {
        match self {
            Self::Error => SUBJECT_ERROR,
            Self::Delivered => SUBJECT_DELIVERED,
        }
    }

    /// Durable consumer name; same as the subject.
    #[must_use]
    pub const fn durable_name(&self) -> &'static str {
        self.subject()
    }
}

/// A decoded outcome event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Delivery failed.
    Error(EmailError),
    /// Delivery succeeded.
    Delivered(EmailDelivered),
}

impl Outcome {
    /// Decodes an event of the given kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`](crate::Error::Serialization) on
    /// malformed bytes.
    pub fn decode(kind: OutcomeKind, bytes: &[u8]) -> crate::Result<Self> {
        Ok(match kind {
            OutcomeKind::Error => Self::Error(pb::decode(bytes)?),
            OutcomeKind::Delivered => Self::Delivered(pb::decode(bytes)?),
        })
    }
}

/// Reconciliation hook called for every decoded outcome.
#[async_trait]
pub trait OutcomeHandler: Send + Sync {
    /// Handles one outcome. Called before the event is acknowledged.
    async fn handle(&self, outcome: &Outcome);
}

/// Handler that writes each outcome to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOutcome;

#[async_trait]
impl OutcomeHandler for LogOutcome {
    async fn handle(&self, outcome: &Outcome) {
        match outcome {
            Outcome::Error(e) => warn!(
                email = %e.email,
                message_id = %e.message_id,
                reason = %e.msg,
                "Bounced"
            ),
            Outcome::Delivered(d) => info!(
                email = %d.email,
                message_id = %d.message_id,
                "Delivered"
            ),
        }
    }
}

/// Drains one durable outcome consumer.
pub struct OutcomeConsumer<C, H = LogOutcome> {
    kind: OutcomeKind,
    consumer: C,
    handler: H,
}

impl<C: Consumer> OutcomeConsumer<C> {
    /// Creates a consumer that logs every outcome.
    pub const fn new(kind: OutcomeKind, consumer: C) -> Self {
        Self {
            kind,
            consumer,
            handler: LogOutcome,
        }
    }
}

impl<C: Consumer, H: OutcomeHandler> OutcomeConsumer<C, H> {
    /// Replaces the handler.
    pub fn with_handler<H2: OutcomeHandler>(self, handler: H2) -> OutcomeConsumer<C, H2> {
        OutcomeConsumer {
            kind: self.kind,
            consumer: self.consumer,
            handler,
        }
    }

    /// Waits for one event, handles it and acknowledges it.
    ///
    /// Malformed events are logged and acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error if reading or acknowledging fails.
    pub async fn process_next(&mut self) -> Result<(), BrokerError> {
        let message = self.consumer.next().await?;

        match Outcome::decode(self.kind, message.payload()) {
            Ok(outcome) => self.handler.handle(&outcome).await,
            Err(e) => error!(subject = self.kind.subject(), error = %e, "Cannot decode outcome"),
        }

        message.ack().await
    }

    /// Processes events until the broker fails.
    ///
    /// # Errors
    ///
    /// Returns the read or acknowledge failure that stopped the loop.
    pub async fn run(mut self) -> Result<(), BrokerError> {
        info!(consumer = self.kind.durable_name(), "Outcome consumer started");
        loop {
            self.process_next().await?;
        }
    }
}

impl<C, H> std::fmt::Debug for OutcomeConsumer<C, H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutcomeConsumer")
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
