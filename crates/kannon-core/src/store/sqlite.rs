//! SQLite implementation of [`Store`].

use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Sqlite, pool::PoolConnection};

use super::Store;
use crate::model::{
    Domain, SenderIdentity, SendingPool, SendingPoolEmail, SendingStatus, Template,
    TerminalStatus, new_message_id,
};
use crate::{Error, Result};

const EMAIL_COLUMNS: &str = "id, sending_pool_id, email, status, error_msg, fields, created_at";

/// Everything needed to create a campaign; the id and message id are
/// assigned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSendingPool {
    /// Sending domain.
    pub domain: String,
    /// Sender identity.
    pub sender: SenderIdentity,
    /// Subject line.
    pub subject: String,
    /// Template identifier.
    pub template_id: String,
}

/// Store backed by a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new store with the given database path.
    ///
    /// Creates the database and tables if they don't exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn new(database_path: &str) -> Result<Self> {
        Self::connect(&format!("sqlite:{database_path}?mode=rwc")).await
    }

    /// Create a store from a `sqlite:` URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid, the connection fails or schema
    /// creation fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Create an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database connection fails or schema creation fails.
    pub async fn in_memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.initialize().await?;
        Ok(store)
    }

    /// Initialize database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS domains (
                domain TEXT PRIMARY KEY,
                dkim_private_key TEXT NOT NULL,
                dkim_public_key TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS templates (
                template_id TEXT PRIMARY KEY,
                domain TEXT NOT NULL,
                html TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sending_pools (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL UNIQUE,
                domain TEXT NOT NULL,
                sender_email TEXT NOT NULL,
                sender_alias TEXT NOT NULL DEFAULT '',
                subject TEXT NOT NULL,
                template_id TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS sending_pool_emails (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                sending_pool_id INTEGER NOT NULL,
                email TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'scheduled',
                error_msg TEXT,
                fields TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL,
                UNIQUE(sending_pool_id, email)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Claim scans scheduled entries oldest first
        sqlx::query(
            r"
            CREATE INDEX IF NOT EXISTS idx_sending_pool_emails_status
            ON sending_pool_emails(status, created_at, id)
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds or replaces a sending domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_domain(&self, domain: &Domain) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO domains (domain, dkim_private_key, dkim_public_key, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(domain) DO UPDATE SET
                dkim_private_key = excluded.dkim_private_key,
                dkim_public_key = excluded.dkim_public_key
            ",
        )
        .bind(&domain.domain)
        .bind(&domain.dkim_private_key)
        .bind(&domain.dkim_public_key)
        .bind(timestamp(domain.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Adds or replaces a template.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn insert_template(&self, template: &Template) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO templates (template_id, domain, html, created_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(template_id) DO UPDATE SET html = excluded.html
            ",
        )
        .bind(&template.template_id)
        .bind(&template.domain)
        .bind(&template.html)
        .bind(timestamp(template.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Creates a campaign with a fresh message identifier.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn create_pool(&self, new: &NewSendingPool) -> Result<SendingPool> {
        let message_id = new_message_id(&new.domain);
        let created_at = Utc::now().trunc_subsecs(6);

        let row = sqlx::query(
            r"
            INSERT INTO sending_pools
                (message_id, domain, sender_email, sender_alias, subject, template_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            ",
        )
        .bind(&message_id)
        .bind(&new.domain)
        .bind(&new.sender.email)
        .bind(&new.sender.alias)
        .bind(&new.subject)
        .bind(&new.template_id)
        .bind(timestamp(created_at))
        .fetch_one(&self.pool)
        .await?;

        Ok(SendingPool {
            id: row.try_get("id")?,
            message_id,
            domain: new.domain.clone(),
            sender: new.sender.clone(),
            subject: new.subject.clone(),
            template_id: new.template_id.clone(),
            created_at,
        })
    }

    /// Adds a recipient to a campaign's backlog in `scheduled` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the recipient is already in the campaign or the
    /// database query fails.
    pub async fn enqueue(
        &self,
        sending_pool_id: i64,
        email: &str,
        fields: &BTreeMap<String, String>,
    ) -> Result<SendingPoolEmail> {
        let row = sqlx::query(&format!(
            r"
            INSERT INTO sending_pool_emails (sending_pool_id, email, status, fields, created_at)
            VALUES (?, ?, 'scheduled', ?, ?)
            RETURNING {EMAIL_COLUMNS}
            "
        ))
        .bind(sending_pool_id)
        .bind(email)
        .bind(serde_json::to_string(fields)?)
        .bind(timestamp(Utc::now()))
        .fetch_one(&self.pool)
        .await?;

        email_from_row(&row)
    }

    /// Looks up a backlog entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn get_email(&self, id: i64) -> Result<Option<SendingPoolEmail>> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM sending_pool_emails WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(email_from_row).transpose()
    }

    /// Counts backlog entries in a status.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn count_by_status(&self, status: SendingStatus) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM sending_pool_emails WHERE status = ?")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn claim_scheduled(&self, limit: u32) -> Result<Vec<SendingPoolEmail>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        // IMMEDIATE takes the write lock up front, so a concurrent claimer
        // waits on the busy timeout instead of failing with SQLITE_BUSY.
        let mut conn = self.pool.acquire().await?;
        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

        let claimed = sqlx::query(&format!(
            r"
            UPDATE sending_pool_emails
            SET status = 'sending'
            WHERE status = 'scheduled'
              AND id IN (
                SELECT id FROM sending_pool_emails
                WHERE status = 'scheduled'
                ORDER BY created_at ASC, id ASC
                LIMIT ?
              )
            RETURNING {EMAIL_COLUMNS}
            "
        ))
        .bind(i64::from(limit))
        .fetch_all(&mut *conn)
        .await;

        let rows = match claimed {
            Ok(rows) => rows,
            Err(e) => {
                rollback(&mut conn).await;
                return Err(e.into());
            }
        };

        if let Err(e) = sqlx::query("COMMIT").execute(&mut *conn).await {
            rollback(&mut conn).await;
            return Err(e.into());
        }

        let mut emails = rows.iter().map(email_from_row).collect::<Result<Vec<_>>>()?;
        emails.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(emails)
    }

    async fn find_pool(&self, id: i64) -> Result<Option<SendingPool>> {
        let row = sqlx::query(
            r"
            SELECT id, message_id, domain, sender_email, sender_alias, subject, template_id, created_at
            FROM sending_pools
            WHERE id = ?
            ",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<SendingPool> {
            Ok(SendingPool {
                id: row.try_get("id")?,
                message_id: row.try_get("message_id")?,
                domain: row.try_get("domain")?,
                sender: SenderIdentity {
                    email: row.try_get("sender_email")?,
                    alias: row.try_get("sender_alias")?,
                },
                subject: row.try_get("subject")?,
                template_id: row.try_get("template_id")?,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn find_domain(&self, domain: &str) -> Result<Option<Domain>> {
        let row = sqlx::query(
            r"
            SELECT domain, dkim_private_key, dkim_public_key, created_at
            FROM domains
            WHERE domain = ?
            ",
        )
        .bind(domain)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Domain> {
            Ok(Domain {
                domain: row.try_get("domain")?,
                dkim_private_key: row.try_get("dkim_private_key")?,
                dkim_public_key: row.try_get("dkim_public_key")?,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn find_template(&self, template_id: &str) -> Result<Option<Template>> {
        let row = sqlx::query(
            r"
            SELECT template_id, domain, html, created_at
            FROM templates
            WHERE template_id = ?
            ",
        )
        .bind(template_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| -> Result<Template> {
            Ok(Template {
                template_id: row.try_get("template_id")?,
                domain: row.try_get("domain")?,
                html: row.try_get("html")?,
                created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
            })
        })
        .transpose()
    }

    async fn find_email(
        &self,
        sending_pool_id: i64,
        email: &str,
    ) -> Result<Option<SendingPoolEmail>> {
        let row = sqlx::query(&format!(
            "SELECT {EMAIL_COLUMNS} FROM sending_pool_emails WHERE sending_pool_id = ? AND email = ?"
        ))
        .bind(sending_pool_id)
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(email_from_row).transpose()
    }

    async fn set_status(&self, id: i64, status: &TerminalStatus) -> Result<()> {
        let result = sqlx::query(
            r"
            UPDATE sending_pool_emails
            SET status = ?, error_msg = ?
            WHERE id = ?
            ",
        )
        .bind(status.status().as_str())
        .bind(status.detail())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("sending pool email", id));
        }
        Ok(())
    }
}

async fn rollback(conn: &mut PoolConnection<Sqlite>) {
    if let Err(e) = sqlx::query("ROLLBACK").execute(&mut **conn).await {
        tracing::warn!(error = %e, "Rollback after failed claim did not succeed");
    }
}

fn email_from_row(row: &SqliteRow) -> Result<SendingPoolEmail> {
    let status: String = row.try_get("status")?;
    let status = SendingStatus::parse(&status).ok_or_else(|| {
        sqlx::Error::Decode(format!("unknown sending status {status:?}").into())
    })?;
    let fields: String = row.try_get("fields")?;

    Ok(SendingPoolEmail {
        id: row.try_get("id")?,
        sending_pool_id: row.try_get("sending_pool_id")?,
        email: row.try_get("email")?,
        status,
        error: row.try_get("error_msg")?,
        fields: serde_json::from_str(&fields)?,
        created_at: parse_timestamp(&row.try_get::<String, _>("created_at")?)?,
    })
}

/// Fixed-width RFC 3339 so text ordering matches time ordering.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| Error::Store(sqlx::Error::Decode(Box::new(e))))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    async fn seeded() -> (SqliteStore, SendingPool) {
        let store = SqliteStore::in_memory().await.unwrap();
        let pool = store
            .create_pool(&NewSendingPool {
                domain: "acme.test".to_string(),
                sender: SenderIdentity::new("news@acme.test", "Acme"),
                subject: "Hello".to_string(),
                template_id: "tpl_1".to_string(),
            })
            .await
            .unwrap();
        (store, pool)
    }

    #[tokio::test]
    async fn test_create_pool_assigns_message_id() {
        let (store, pool) = seeded().await;
        assert!(pool.message_id.starts_with("message_"));
        assert!(pool.message_id.ends_with("@acme.test"));

        let found = store.find_pool(pool.id).await.unwrap().unwrap();
        assert_eq!(found.message_id, pool.message_id);
        assert_eq!(found.sender.display(), "Acme <news@acme.test>");
        assert!(store.find_pool(pool.id + 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_enqueue_and_claim_in_order() {
        let (store, pool) = seeded().await;
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), "Alice".to_string());

        let first = store.enqueue(pool.id, "alice@example.com", &fields).await.unwrap();
        let second = store.enqueue(pool.id, "bob@example.com", &BTreeMap::new()).await.unwrap();
        let third = store.enqueue(pool.id, "carol@example.com", &BTreeMap::new()).await.unwrap();
        assert_eq!(first.status, SendingStatus::Scheduled);
        assert_eq!(first.fields.get("name").map(String::as_str), Some("Alice"));

        let batch = store.claim_scheduled(2).await.unwrap();
        let ids: Vec<i64> = batch.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![first.id, second.id]);
        assert!(batch.iter().all(|e| e.status == SendingStatus::Sending));

        let rest = store.claim_scheduled(10).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].id, third.id);

        assert!(store.claim_scheduled(10).await.unwrap().is_empty());
        assert_eq!(store.count_by_status(SendingStatus::Scheduled).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_claim_zero_is_noop() {
        let (store, pool) = seeded().await;
        store.enqueue(pool.id, "alice@example.com", &BTreeMap::new()).await.unwrap();

        assert!(store.claim_scheduled(0).await.unwrap().is_empty());
        assert_eq!(store.count_by_status(SendingStatus::Scheduled).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_set_status_records_detail() {
        let (store, pool) = seeded().await;
        let entry = store.enqueue(pool.id, "a@b.com", &BTreeMap::new()).await.unwrap();

        store
            .set_status(entry.id, &TerminalStatus::Error("550 no such user".into()))
            .await
            .unwrap();
        let failed = store.find_email(pool.id, "a@b.com").await.unwrap().unwrap();
        assert_eq!(failed.status, SendingStatus::Error);
        assert_eq!(failed.error.as_deref(), Some("550 no such user"));

        // Last write wins; a later success clears the detail
        store.set_status(entry.id, &TerminalStatus::Sent).await.unwrap();
        let sent = store.get_email(entry.id).await.unwrap().unwrap();
        assert_eq!(sent.status, SendingStatus::Sent);
        assert_eq!(sent.error, None);
    }

    #[tokio::test]
    async fn test_set_status_unknown_entry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let err = store.set_status(42, &TerminalStatus::Sent).await.unwrap_err();
        assert!(matches!(err, Error::NotFound { kind: "sending pool email", .. }));
    }

    #[tokio::test]
    async fn test_domain_and_template_lookup() {
        let store = SqliteStore::in_memory().await.unwrap();
        let now = Utc::now();
        store
            .insert_domain(&Domain {
                domain: "acme.test".to_string(),
                dkim_private_key: "key".to_string(),
                dkim_public_key: "pub".to_string(),
                created_at: now,
            })
            .await
            .unwrap();
        store
            .insert_template(&Template {
                template_id: "tpl_1".to_string(),
                domain: "acme.test".to_string(),
                html: "<p>{{ name }}</p>".to_string(),
                created_at: now,
            })
            .await
            .unwrap();

        let domain = store.find_domain("acme.test").await.unwrap().unwrap();
        assert_eq!(domain.dkim_private_key, "key");
        let template = store.find_template("tpl_1").await.unwrap().unwrap();
        assert_eq!(template.html, "<p>{{ name }}</p>");
        assert!(store.find_template("missing").await.unwrap().is_none());
        assert!(store.find_domain("other.test").await.unwrap().is_none());
    }
}
