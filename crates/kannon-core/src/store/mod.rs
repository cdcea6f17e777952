//! Backing store for the dispatch pipeline.
//!
//! The pipeline reads campaigns, domains and templates, claims backlog
//! entries and writes their terminal status. [`Store`] is that surface;
//! [`SqliteStore`] is the shipped implementation.

mod sqlite;

pub use sqlite::{NewSendingPool, SqliteStore};

use async_trait::async_trait;

use crate::Result;
use crate::model::{Domain, SendingPool, SendingPoolEmail, Template, TerminalStatus};

/// Repository used by every pipeline stage.
#[async_trait]
pub trait Store: Send + Sync {
    /// Atomically moves up to `limit` `scheduled` entries to `sending` and
    /// returns them, oldest first.
    ///
    /// Concurrent callers never receive the same entry.
    async fn claim_scheduled(&self, limit: u32) -> Result<Vec<SendingPoolEmail>>;

    /// Looks up a campaign.
    async fn find_pool(&self, id: i64) -> Result<Option<SendingPool>>;

    /// Looks up a sending domain.
    async fn find_domain(&self, domain: &str) -> Result<Option<Domain>>;

    /// Looks up a template.
    async fn find_template(&self, template_id: &str) -> Result<Option<Template>>;

    /// Looks up a backlog entry by campaign and recipient.
    async fn find_email(&self, sending_pool_id: i64, email: &str)
    -> Result<Option<SendingPoolEmail>>;

    /// Writes the terminal status of an entry. Last write wins.
    async fn set_status(&self, id: i64, status: &TerminalStatus) -> Result<()>;
}
