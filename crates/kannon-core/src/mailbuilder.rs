//! Turns a backlog entry into a queue payload.

use std::sync::Arc;

use crate::mailer::return_path;
use crate::model::SendingPoolEmail;
use crate::pb::EmailToSend;
use crate::store::Store;
use crate::{Error, Result};

/// Builds [`EmailToSend`] payloads from backlog entries.
#[derive(Clone)]
pub struct MailBuilder {
    store: Arc<dyn Store>,
}

impl MailBuilder {
    /// Creates a builder over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Loads the entry's campaign, domain and template and assembles the
    /// payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotFound`] when the campaign, its domain or its
    /// template is missing, or [`Error::Store`] if a lookup fails.
    pub async fn prepare_for_send(&self, entry: &SendingPoolEmail) -> Result<EmailToSend> {
        let pool = self
            .store
            .find_pool(entry.sending_pool_id)
            .await?
            .ok_or_else(|| Error::not_found("sending pool", entry.sending_pool_id))?;

        // Domain and template are only checked for existence here; the
        // sending worker loads them again when it renders.
        self.store
            .find_domain(&pool.domain)
            .await?
            .ok_or_else(|| Error::not_found("domain", &pool.domain))?;
        self.store
            .find_template(&pool.template_id)
            .await?
            .ok_or_else(|| Error::not_found("template", &pool.template_id))?;

        Ok(EmailToSend {
            from: pool.sender.display(),
            to: entry.email.clone(),
            subject: pool.subject,
            return_path: return_path(&entry.email, &pool.message_id),
            message_id: pool.message_id,
            sending_pool_id: pool.id,
            template_id: pool.template_id,
        })
    }
}

impl std::fmt::Debug for MailBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailBuilder").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mailer::parse_return_path;
    use crate::model::{Domain, SenderIdentity, Template};
    use crate::store::{NewSendingPool, SqliteStore};
    use chrono::Utc;
    use std::collections::BTreeMap;

    async fn setup(with_domain: bool, with_template: bool) -> (Arc<SqliteStore>, SendingPoolEmail) {
        let store = SqliteStore::in_memory().await.unwrap();
        if with_domain {
            store
                .insert_domain(&Domain {
                    domain: "acme.test".into(),
                    dkim_private_key: "key".into(),
                    dkim_public_key: "pub".into(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        if with_template {
            store
                .insert_template(&Template {
                    template_id: "tpl_1".into(),
                    domain: "acme.test".into(),
                    html: "<p>Hi</p>".into(),
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let pool = store
            .create_pool(&NewSendingPool {
                domain: "acme.test".into(),
                sender: SenderIdentity::new("news@acme.test", "Acme News"),
                subject: "Spring sale".into(),
                template_id: "tpl_1".into(),
            })
            .await
            .unwrap();
        let entry = store
            .enqueue(pool.id, "alice@example.com", &BTreeMap::new())
            .await
            .unwrap();
        (Arc::new(store), entry)
    }

    #[tokio::test]
    async fn test_builds_payload() {
        let (store, entry) = setup(true, true).await;
        let pool = store.find_pool(entry.sending_pool_id).await.unwrap().unwrap();

        let payload = MailBuilder::new(store).prepare_for_send(&entry).await.unwrap();
        assert_eq!(payload.from, "Acme News <news@acme.test>");
        assert_eq!(payload.to, "alice@example.com");
        assert_eq!(payload.subject, "Spring sale");
        assert_eq!(payload.sending_pool_id, pool.id);
        assert_eq!(payload.template_id, "tpl_1");
        assert_eq!(payload.message_id, pool.message_id);
        assert_eq!(
            parse_return_path(&payload.return_path),
            Some(("alice@example.com".to_string(), pool.message_id))
        );
    }

    #[tokio::test]
    async fn test_missing_template() {
        let (store, entry) = setup(true, false).await;
        let err = MailBuilder::new(store).prepare_for_send(&entry).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "template not found: tpl_1");
    }

    #[tokio::test]
    async fn test_missing_domain() {
        let (store, entry) = setup(false, true).await;
        let err = MailBuilder::new(store).prepare_for_send(&entry).await.unwrap_err();
        assert_eq!(err.to_string(), "domain not found: acme.test");
    }

    #[tokio::test]
    async fn test_missing_pool() {
        let (store, mut entry) = setup(true, true).await;
        entry.sending_pool_id = 999;
        let err = MailBuilder::new(store).prepare_for_send(&entry).await.unwrap_err();
        assert_eq!(err.to_string(), "sending pool not found: 999");
    }
}
