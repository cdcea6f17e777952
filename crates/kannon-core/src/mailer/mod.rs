//! Delivery engine.
//!
//! [`SmtpMailer`] performs one delivery attempt for a claimed backlog entry:
//! load the campaign records, render the message, sign it with the domain's
//! DKIM key, hand it to a [`Sender`] and persist the outcome. There is no
//! retry here; an entry leaves the engine as `sent` or `error`.

mod return_path;

pub use return_path::{message_id_header, parse_return_path, return_path};

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use kannon_mime::MessageBuilder;
use kannon_mime::dkim::{SignData, SigningError, sign_message};
use kannon_smtp::Relay;
use tracing::{info, warn};

use crate::error::TransportError;
use crate::model::{Domain, SendingPool, SendingPoolEmail, Template, TerminalStatus};
use crate::store::Store;
use crate::{Error, Result};

/// DKIM selector used for every domain.
pub const DKIM_SELECTOR: &str = "smtp";

/// Headers covered by the DKIM signature.
pub const SIGNED_HEADERS: [&str; 4] = ["From", "To", "Subject", "Message-ID"];

/// Value of the `X-Mailer` header.
pub const X_MAILER: &str = "kannon";

/// Capability to hand a signed message to a transport.
#[async_trait]
pub trait Sender: Send + Sync {
    /// Sends `message` to `to` with `return_path` as envelope sender.
    async fn send(
        &self,
        return_path: &str,
        to: &str,
        message: &[u8],
    ) -> std::result::Result<(), TransportError>;
}

/// [`Sender`] backed by an SMTP relay.
#[derive(Debug, Clone)]
pub struct SmtpSender {
    relay: Relay,
}

impl SmtpSender {
    /// Creates a sender for a relay.
    #[must_use]
    pub const fn new(relay: Relay) -> Self {
        Self { relay }
    }
}

#[async_trait]
impl Sender for SmtpSender {
    async fn send(
        &self,
        return_path: &str,
        to: &str,
        message: &[u8],
    ) -> std::result::Result<(), TransportError> {
        self.relay
            .deliver(return_path, to, message)
            .await
            .map_err(TransportError::from)
    }
}

/// Where a delivery attempt stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStage {
    /// Loading the campaign, domain and template.
    Claimed,
    /// Building the message.
    Rendering,
    /// DKIM signing.
    Signing,
    /// Handing the message to the transport.
    Sending,
}

impl AttemptStage {
    /// Stage name for logs.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Claimed => "claimed",
            Self::Rendering => "rendering",
            Self::Signing => "signing",
            Self::Sending => "sending",
        }
    }
}

impl fmt::Display for AttemptStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt {
    /// The transport accepted the message.
    Sent,
    /// The attempt stopped at `stage`.
    Failed {
        /// Stage that failed.
        stage: AttemptStage,
        /// Error text, persisted as the entry's error.
        detail: String,
    },
}

impl Attempt {
    fn failed(stage: AttemptStage, error: impl fmt::Display) -> Self {
        Self::Failed {
            stage,
            detail: error.to_string(),
        }
    }

    /// Returns true if the message was accepted.
    #[must_use]
    pub const fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }

    /// The status this attempt leaves the entry in.
    #[must_use]
    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            Self::Sent => TerminalStatus::Sent,
            Self::Failed { detail, .. } => TerminalStatus::Error(detail.clone()),
        }
    }
}

/// Renders the wire message for one recipient of a campaign.
///
/// # Errors
///
/// Returns an error if a header value cannot be placed on the wire.
pub fn render_message(
    pool: &SendingPool,
    template: &Template,
    entry: &SendingPoolEmail,
    date: DateTime<Utc>,
) -> kannon_mime::Result<Vec<u8>> {
    let message = MessageBuilder::new()
        .from(pool.sender.display())
        .to(entry.email.as_str())
        .subject(&pool.subject)
        .message_id(message_id_header(&entry.email, &pool.message_id))
        .header("X-Pool-Message-ID", pool.message_id.as_str())
        .header("X-Mailer", X_MAILER)
        .date(date)
        .html_body(template.html.as_str())
        .fields(&entry.fields)
        .field("email", entry.email.as_str())
        .build()?;

    Ok(message.to_bytes())
}

/// Signs a rendered message with the domain's key.
///
/// # Errors
///
/// Returns a [`SigningError`] if the key cannot be parsed or the message is
/// malformed.
pub fn sign(domain: &Domain, message: &[u8]) -> std::result::Result<Vec<u8>, SigningError> {
    let data = SignData::new(
        domain.dkim_private_key.as_str(),
        domain.domain.as_str(),
        DKIM_SELECTOR,
    )
    .headers(SIGNED_HEADERS);

    sign_message(&data, message)
}

/// Delivery engine over a store and a transport.
#[derive(Clone)]
pub struct SmtpMailer {
    store: Arc<dyn Store>,
    sender: Arc<dyn Sender>,
}

impl SmtpMailer {
    /// Creates a mailer.
    #[must_use]
    pub fn new(store: Arc<dyn Store>, sender: Arc<dyn Sender>) -> Self {
        Self { store, sender }
    }

    /// Runs one delivery attempt for a claimed entry and persists its
    /// outcome.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the outcome is returned; every other failure
    /// is reported as [`Attempt::Failed`].
    pub async fn send(&self, entry: &SendingPoolEmail) -> Result<Attempt> {
        self.send_at(entry, Utc::now()).await
    }

    /// Same as [`send`](Self::send) with an explicit `Date` header.
    ///
    /// # Errors
    ///
    /// Only a failure to persist the outcome is returned.
    pub async fn send_at(&self, entry: &SendingPoolEmail, now: DateTime<Utc>) -> Result<Attempt> {
        let attempt = match self.attempt(entry, now).await {
            Ok(()) => Attempt::Sent,
            Err(failed) => failed,
        };

        match &attempt {
            Attempt::Sent => info!(
                id = entry.id,
                to = %entry.email,
                pool = entry.sending_pool_id,
                "Message sent"
            ),
            Attempt::Failed { stage, detail } => warn!(
                id = entry.id,
                to = %entry.email,
                pool = entry.sending_pool_id,
                %stage,
                %detail,
                "Delivery failed"
            ),
        }

        self.store
            .set_status(entry.id, &attempt.terminal_status())
            .await?;
        Ok(attempt)
    }

    async fn attempt(
        &self,
        entry: &SendingPoolEmail,
        now: DateTime<Utc>,
    ) -> std::result::Result<(), Attempt> {
        let (pool, domain, template) = self
            .load(entry)
            .await
            .map_err(|e| Attempt::failed(AttemptStage::Claimed, e))?;

        let message = render_message(&pool, &template, entry, now)
            .map_err(|e| Attempt::failed(AttemptStage::Rendering, e))?;

        let signed = sign(&domain, &message)
            .map_err(|e| Attempt::failed(AttemptStage::Signing, e))?;

        self.sender
            .send(
                &return_path(&entry.email, &pool.message_id),
                &entry.email,
                &signed,
            )
            .await
            .map_err(|e| Attempt::failed(AttemptStage::Sending, e))
    }

    async fn load(&self, entry: &SendingPoolEmail) -> Result<(SendingPool, Domain, Template)> {
        let pool = self
            .store
            .find_pool(entry.sending_pool_id)
            .await?
            .ok_or_else(|| Error::not_found("sending pool", entry.sending_pool_id))?;
        let domain = self
            .store
            .find_domain(&pool.domain)
            .await?
            .ok_or_else(|| Error::not_found("domain", &pool.domain))?;
        let template = self
            .store
            .find_template(&pool.template_id)
            .await?
            .ok_or_else(|| Error::not_found("template", &pool.template_id))?;

        Ok((pool, domain, template))
    }
}

impl fmt::Debug for SmtpMailer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpMailer").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{SenderIdentity, SendingStatus};
    use crate::store::{NewSendingPool, SqliteStore};
    use chrono::TimeZone;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    const KEY: &str = include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/testdata/dkim-rsa1024-pkcs1.pem"
    ));

    #[derive(Default)]
    struct RecordingSender {
        sent: Mutex<Vec<(String, String, Vec<u8>)>>,
        reject: Option<String>,
    }

    #[async_trait]
    impl Sender for RecordingSender {
        async fn send(
            &self,
            return_path: &str,
            to: &str,
            message: &[u8],
        ) -> std::result::Result<(), TransportError> {
            if let Some(reason) = &self.reject {
                return Err(TransportError(reason.clone()));
            }
            self.sent
                .lock()
                .unwrap()
                .push((return_path.to_string(), to.to_string(), message.to_vec()));
            Ok(())
        }
    }

    async fn setup(key: &str) -> (Arc<SqliteStore>, SendingPool, SendingPoolEmail) {
        let store = SqliteStore::in_memory().await.unwrap();
        store
            .insert_domain(&Domain {
                domain: "acme.test".into(),
                dkim_private_key: key.into(),
                dkim_public_key: String::new(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        store
            .insert_template(&Template {
                template_id: "tpl_1".into(),
                domain: "acme.test".into(),
                html: "<p>Hi {{ name }}, this went to {{ email }}</p>".into(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();
        let pool = store
            .create_pool(&NewSendingPool {
                domain: "acme.test".into(),
                sender: SenderIdentity::new("news@acme.test", "Acme"),
                subject: "Hello".into(),
                template_id: "tpl_1".into(),
            })
            .await
            .unwrap();
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Alice".to_string());
        store.enqueue(pool.id, "alice@example.com", &fields).await.unwrap();

        let entry = store.claim_scheduled(1).await.unwrap().remove(0);
        (Arc::new(store), pool, entry)
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    /// Whitespace-free value of a tag in the leading `DKIM-Signature` field.
    fn dkim_tag(message: &str, name: &str) -> String {
        let mut field = String::new();
        for (index, line) in message.split("\r\n").enumerate() {
            if index > 0 && !line.starts_with([' ', '\t']) {
                break;
            }
            field.push_str(line);
        }
        field
            .strip_prefix("DKIM-Signature:")
            .unwrap()
            .split(';')
            .find_map(|t| {
                let (k, v) = t.split_once('=')?;
                (k.trim() == name).then(|| v.chars().filter(|c| !c.is_whitespace()).collect())
            })
            .unwrap()
    }

    #[tokio::test]
    async fn test_successful_attempt() {
        let (store, pool, entry) = setup(KEY).await;
        let sender = Arc::new(RecordingSender::default());
        let mailer = SmtpMailer::new(store.clone(), sender.clone());

        let attempt = mailer.send_at(&entry, now()).await.unwrap();
        assert_eq!(attempt, Attempt::Sent);

        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SendingStatus::Sent);
        assert_eq!(stored.error, None);

        let sent = sender.sent.lock().unwrap();
        let (path, to, message) = &sent[0];
        assert_eq!(to, "alice@example.com");
        assert_eq!(
            parse_return_path(path),
            Some(("alice@example.com".to_string(), pool.message_id.clone()))
        );

        let text = String::from_utf8(message.clone()).unwrap();
        assert!(text.starts_with("DKIM-Signature:"));
        assert_eq!(dkim_tag(&text, "a"), "rsa-sha256");
        assert_eq!(dkim_tag(&text, "d"), "acme.test");
        assert_eq!(dkim_tag(&text, "s"), "smtp");
        assert!(dkim_tag(&text, "h").eq_ignore_ascii_case("From:To:Subject:Message-ID"));
        assert!(text.contains("\r\nFrom: Acme <news@acme.test>\r\n"));
        assert!(text.contains(&format!(
            "\r\nMessage-ID: <YWxpY2VAZXhhbXBsZS5jb20=/{}>\r\n",
            pool.message_id
        )));
        assert!(text.contains(&format!("\r\nX-Pool-Message-ID: {}\r\n", pool.message_id)));
        assert!(text.contains("\r\nX-Mailer: kannon\r\n"));
        assert!(text.contains("Hi Alice, this went to alice@example.com"));
    }

    #[tokio::test]
    async fn test_transport_failure_is_persisted_verbatim() {
        let (store, _, entry) = setup(KEY).await;
        let sender = Arc::new(RecordingSender {
            reject: Some("550 mailbox unavailable".into()),
            ..Default::default()
        });
        let mailer = SmtpMailer::new(store.clone(), sender);

        let attempt = mailer.send_at(&entry, now()).await.unwrap();
        assert_eq!(
            attempt,
            Attempt::Failed {
                stage: AttemptStage::Sending,
                detail: "550 mailbox unavailable".into(),
            }
        );

        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SendingStatus::Error);
        assert_eq!(stored.error.as_deref(), Some("550 mailbox unavailable"));
    }

    #[tokio::test]
    async fn test_bad_key_fails_at_signing() {
        let (store, _, entry) = setup("not a key").await;
        let sender = Arc::new(RecordingSender::default());
        let mailer = SmtpMailer::new(store.clone(), sender.clone());

        let attempt = mailer.send_at(&entry, now()).await.unwrap();
        assert!(matches!(
            attempt,
            Attempt::Failed {
                stage: AttemptStage::Signing,
                ..
            }
        ));
        assert!(sender.sent.lock().unwrap().is_empty());
        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SendingStatus::Error);
    }

    #[tokio::test]
    async fn test_missing_pool_fails_at_claimed() {
        let (store, _, mut entry) = setup(KEY).await;
        entry.sending_pool_id = 404;
        let mailer = SmtpMailer::new(store.clone(), Arc::new(RecordingSender::default()));

        let attempt = mailer.send_at(&entry, now()).await.unwrap();
        assert_eq!(
            attempt,
            Attempt::Failed {
                stage: AttemptStage::Claimed,
                detail: "sending pool not found: 404".into(),
            }
        );
        let stored = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(stored.error.as_deref(), Some("sending pool not found: 404"));
    }

    #[tokio::test]
    async fn test_render_and_sign_are_deterministic() {
        let (store, pool, entry) = setup(KEY).await;
        let template = store.find_template("tpl_1").await.unwrap().unwrap();
        let domain = store.find_domain("acme.test").await.unwrap().unwrap();

        let first = render_message(&pool, &template, &entry, now()).unwrap();
        let second = render_message(&pool, &template, &entry, now()).unwrap();
        assert_eq!(first, second);

        // Signatures taken in the same second share t= and must match
        loop {
            let a = String::from_utf8(sign(&domain, &first).unwrap()).unwrap();
            let b = String::from_utf8(sign(&domain, &second).unwrap()).unwrap();
            if dkim_tag(&a, "t") == dkim_tag(&b, "t") {
                assert_eq!(a, b);
                break;
            }
        }
    }

    #[tokio::test]
    async fn test_non_ascii_sender_and_long_subject_stay_on_the_wire_limits() {
        let (store, mut pool, entry) = setup(KEY).await;
        let template = store.find_template("tpl_1").await.unwrap().unwrap();
        pool.sender = SenderIdentity::new("news@acme.test", "Café Müller");
        pool.subject = "Größere Rabatte für Ihre Bestellung: jetzt bis Ende März sparen".into();

        let message = render_message(&pool, &template, &entry, now()).unwrap();
        let text = String::from_utf8(message).unwrap();
        let (head, _) = text.split_once("\r\n\r\n").unwrap();

        assert!(head.is_ascii());
        assert!(head.contains("From: =?utf-8?B?Q2Fmw6kgTcO8bGxlcg==?= <news@acme.test>\r\n"));
        let encoded_lines: Vec<&str> = head
            .split("\r\n")
            .filter(|line| line.starts_with("Subject:") || line.starts_with(" =?"))
            .collect();
        assert!(encoded_lines.len() > 1);
        for line in encoded_lines {
            assert!(line.len() <= 76, "line too long: {line}");
            for word in line.split(' ').filter(|w| w.starts_with("=?")) {
                assert!(word.len() <= 75, "encoded-word too long: {word}");
            }
        }
    }
}
