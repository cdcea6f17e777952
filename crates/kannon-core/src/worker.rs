//! Sending worker: consumes `emails.sending` and runs the delivery engine.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::Result;
use crate::broker::{Acknowledge, Consumer, Publisher, SUBJECT_DELIVERED, SUBJECT_ERROR};
use crate::mailer::{Attempt, SmtpMailer};
use crate::model::SendingStatus;
use crate::pb::{self, EmailDelivered, EmailError, EmailToSend};
use crate::store::Store;

/// Delivers queued payloads one at a time and reports their outcome.
pub struct SendingWorker<C> {
    consumer: C,
    store: Arc<dyn Store>,
    mailer: SmtpMailer,
    publisher: Arc<dyn Publisher>,
}

impl<C: Consumer> SendingWorker<C> {
    /// Creates a worker.
    pub fn new(
        consumer: C,
        store: Arc<dyn Store>,
        mailer: SmtpMailer,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            consumer,
            store,
            mailer,
            publisher,
        }
    }

    /// Takes one payload, delivers it and acknowledges it.
    ///
    /// Returns `None` when the payload was skipped: undecodable, unknown
    /// entry, or an entry that is not in flight. Skipped payloads are still
    /// acknowledged.
    ///
    /// # Errors
    ///
    /// Returns an error on broker read/ack failure or store failure. The
    /// payload is left unacknowledged so it is redelivered.
    pub async fn process_next(&mut self) -> Result<Option<Attempt>> {
        let message = self.consumer.next().await?;

        let attempt = match pb::decode::<EmailToSend>(message.payload()) {
            Ok(payload) => self.deliver(&payload).await?,
            Err(e) => {
                warn!(error = %e, "Cannot decode payload");
                None
            }
        };

        message.ack().await?;
        Ok(attempt)
    }

    /// Processes payloads until a fatal error. Non-fatal errors leave the
    /// payload unacknowledged and the loop moves on.
    ///
    /// # Errors
    ///
    /// Returns the fatal error that stopped the loop.
    pub async fn run(mut self) -> Result<()> {
        info!("Sending worker started");
        loop {
            match self.process_next().await {
                Ok(_) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(error = %e, "Payload left for redelivery"),
            }
        }
    }

    async fn deliver(&self, payload: &EmailToSend) -> Result<Option<Attempt>> {
        let Some(entry) = self
            .store
            .find_email(payload.sending_pool_id, &payload.to)
            .await?
        else {
            warn!(
                pool = payload.sending_pool_id,
                to = %payload.to,
                "No backlog entry for payload"
            );
            return Ok(None);
        };

        if entry.status != SendingStatus::Sending {
            debug!(id = entry.id, status = %entry.status, "Entry not in flight, skipping");
            return Ok(None);
        }

        let attempt = self.mailer.send(&entry).await?;

        let (subject, event) = match &attempt {
            Attempt::Sent => (
                SUBJECT_DELIVERED,
                pb::encode(&EmailDelivered {
                    email: entry.email.clone(),
                    message_id: payload.message_id.clone(),
                }),
            ),
            Attempt::Failed { detail, .. } => (
                SUBJECT_ERROR,
                pb::encode(&EmailError {
                    email: entry.email.clone(),
                    message_id: payload.message_id.clone(),
                    msg: detail.clone(),
                }),
            ),
        };
        if let Err(e) = self.publisher.publish(subject, event).await {
            warn!(id = entry.id, error = %e, "Cannot publish outcome");
        }

        Ok(Some(attempt))
    }
}

impl<C> std::fmt::Debug for SendingWorker<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingWorker").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::{BrokerError, TransportError};
    use crate::mailer::Sender;
    use crate::model::{
        Domain, SenderIdentity, SendingPool, SendingPoolEmail, Template, TerminalStatus,
    };
    use crate::{Error, ErrorKind};
    use crate::store::{NewSendingPool, SqliteStore};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::collections::{BTreeMap, VecDeque};
    use std::sync::Mutex;

    const KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/dkim-rsa1024-pkcs1.pem"
    ));

    type Journal = Arc<Mutex<Vec<String>>>;

    struct FakeMessage(Vec<u8>, Journal);

    #[async_trait]
    impl Acknowledge for FakeMessage {
        fn payload(&self) -> &[u8] {
            &self.0
        }

        async fn ack(&self) -> std::result::Result<(), BrokerError> {
            self.1.lock().unwrap().push("ack".into());
            Ok(())
        }
    }

    struct FakeConsumer(VecDeque<Vec<u8>>, Journal);

    #[async_trait]
    impl Consumer for FakeConsumer {
        type Message = FakeMessage;

        async fn next(&mut self) -> std::result::Result<FakeMessage, BrokerError> {
            let payload = self
                .0
                .pop_front()
                .ok_or_else(|| BrokerError::Read("closed".into()))?;
            Ok(FakeMessage(payload, self.1.clone()))
        }
    }

    struct FakePublisher(Journal);

    #[async_trait]
    impl Publisher for FakePublisher {
        async fn publish(
            &self,
            subject: &str,
            _payload: Vec<u8>,
        ) -> std::result::Result<(), BrokerError> {
            self.0.lock().unwrap().push(format!("publish {subject}"));
            Ok(())
        }
    }

    struct FakeSender(Journal, Option<&'static str>);

    #[async_trait]
    impl Sender for FakeSender {
        async fn send(
            &self,
            _return_path: &str,
            to: &str,
            _message: &[u8],
        ) -> std::result::Result<(), TransportError> {
            self.0.lock().unwrap().push(format!("send {to}"));
            self.1.map_or(Ok(()), |reason| Err(TransportError(reason.into())))
        }
    }

    /// Delegates to SQLite but loses every row before the status write.
    struct VanishingStore(Arc<SqliteStore>);

    #[async_trait]
    impl Store for VanishingStore {
        async fn claim_scheduled(&self, limit: u32) -> Result<Vec<SendingPoolEmail>> {
            self.0.claim_scheduled(limit).await
        }

        async fn find_pool(&self, id: i64) -> Result<Option<SendingPool>> {
            self.0.find_pool(id).await
        }

        async fn find_domain(&self, domain: &str) -> Result<Option<Domain>> {
            self.0.find_domain(domain).await
        }

        async fn find_template(&self, template_id: &str) -> Result<Option<Template>> {
            self.0.find_template(template_id).await
        }

        async fn find_email(
            &self,
            sending_pool_id: i64,
            email: &str,
        ) -> Result<Option<SendingPoolEmail>> {
            self.0.find_email(sending_pool_id, email).await
        }

        async fn set_status(&self, id: i64, _status: &TerminalStatus) -> Result<()> {
            Err(Error::not_found("backlog entry", id))
        }
    }

    async fn claimed_entry() -> (Arc<SqliteStore>, SendingPoolEmail, String) {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_domain(&Domain {
                domain: "acme.test".into(),
                dkim_private_key: KEY.into(),
                dkim_public_key: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_template(&Template {
                template_id: "tpl_1".into(),
                domain: "acme.test".into(),
                html: "<p>Hi</p>".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let pool = store
            .create_pool(&NewSendingPool {
                domain: "acme.test".into(),
                sender: SenderIdentity::new("news@acme.test", ""),
                subject: "Hello".into(),
                template_id: "tpl_1".into(),
            })
            .await
            .unwrap();
        store
            .enqueue(pool.id, "alice@example.com", &BTreeMap::new())
            .await
            .unwrap();
        let entry = store.claim_scheduled(1).await.unwrap().remove(0);
        (Arc::new(store), entry, pool.message_id)
    }

    fn payload(entry: &SendingPoolEmail, message_id: &str) -> Vec<u8> {
        pb::encode(&EmailToSend {
            to: entry.email.clone(),
            sending_pool_id: entry.sending_pool_id,
            message_id: message_id.to_string(),
            ..Default::default()
        })
    }

    fn worker(
        store: &Arc<SqliteStore>,
        payloads: Vec<Vec<u8>>,
        journal: &Journal,
        reject: Option<&'static str>,
    ) -> SendingWorker<FakeConsumer> {
        let mailer = SmtpMailer::new(
            store.clone(),
            Arc::new(FakeSender(journal.clone(), reject)),
        );
        SendingWorker::new(
            FakeConsumer(payloads.into(), journal.clone()),
            store.clone(),
            mailer,
            Arc::new(FakePublisher(journal.clone())),
        )
    }

    #[tokio::test]
    async fn test_delivers_then_reports_then_acks() {
        let (store, entry, message_id) = claimed_entry().await;
        let journal = Journal::default();
        let mut worker = worker(&store, vec![payload(&entry, &message_id)], &journal, None);

        let attempt = worker.process_next().await.unwrap();
        assert_eq!(attempt, Some(Attempt::Sent));
        assert_eq!(
            *journal.lock().unwrap(),
            ["send alice@example.com", "publish email-delivered", "ack"]
        );
        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SendingStatus::Sent);
    }

    #[tokio::test]
    async fn test_reports_failure() {
        let (store, entry, message_id) = claimed_entry().await;
        let journal = Journal::default();
        let mut worker = worker(
            &store,
            vec![payload(&entry, &message_id)],
            &journal,
            Some("451 try later"),
        );

        let attempt = worker.process_next().await.unwrap().unwrap();
        assert!(!attempt.is_sent());
        assert_eq!(
            *journal.lock().unwrap(),
            ["send alice@example.com", "publish email-error", "ack"]
        );
        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("451 try later"));
    }

    #[tokio::test]
    async fn test_redelivered_payload_is_skipped() {
        let (store, entry, message_id) = claimed_entry().await;
        let journal = Journal::default();
        let bytes = payload(&entry, &message_id);
        let mut worker = worker(&store, vec![bytes.clone(), bytes], &journal, None);

        worker.process_next().await.unwrap();
        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(
            *journal.lock().unwrap(),
            ["send alice@example.com", "publish email-delivered", "ack", "ack"]
        );
    }

    #[tokio::test]
    async fn test_unknown_and_garbage_payloads_are_acked() {
        let (store, entry, message_id) = claimed_entry().await;
        let journal = Journal::default();
        let mut unknown = entry.clone();
        unknown.email = "nobody@example.com".into();
        let mut worker = worker(
            &store,
            vec![vec![0xff, 0xff, 0xff], payload(&unknown, &message_id)],
            &journal,
            None,
        );

        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(worker.process_next().await.unwrap(), None);
        assert_eq!(*journal.lock().unwrap(), ["ack", "ack"]);
        assert!(worker.process_next().await.unwrap_err().is_fatal());
    }

    #[tokio::test]
    async fn test_run_survives_non_fatal_errors() {
        let (store, entry, message_id) = claimed_entry().await;
        let journal = Journal::default();
        let vanishing: Arc<dyn Store> = Arc::new(VanishingStore(store.clone()));
        let mailer = SmtpMailer::new(
            vanishing.clone(),
            Arc::new(FakeSender(journal.clone(), None)),
        );
        let bytes = payload(&entry, &message_id);
        let worker = SendingWorker::new(
            FakeConsumer(vec![bytes.clone(), bytes].into(), journal.clone()),
            vanishing,
            mailer,
            Arc::new(FakePublisher(journal.clone())),
        );

        // Both payloads fail on the status write and stay unacknowledged; the
        // loop only stops when the consumer closes.
        let err = worker.run().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Broker);
        assert_eq!(
            *journal.lock().unwrap(),
            ["send alice@example.com", "send alice@example.com"]
        );
    }
}
