//! Sending pool manager: owns the backlog.

use std::sync::Arc;

use tracing::debug;

use crate::Result;
use crate::model::{SendingPoolEmail, TerminalStatus};
use crate::store::Store;

/// Claims batches of scheduled entries and records their outcome.
#[derive(Clone)]
pub struct SendingPoolManager {
    store: Arc<dyn Store>,
}

impl SendingPoolManager {
    /// Creates a manager over a store.
    #[must_use]
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Claims up to `limit` scheduled entries, moving them to `sending`.
    ///
    /// Entries come back oldest first. A claimed entry is never handed to
    /// another caller.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`](crate::Error::Store) if the claim fails; callers
    /// treat this as fatal.
    pub async fn prepare_for_send(&self, limit: u32) -> Result<Vec<SendingPoolEmail>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let emails = self.store.claim_scheduled(limit).await?;
        debug!(claimed = emails.len(), limit, "Claimed backlog entries");
        Ok(emails)
    }

    /// Marks an entry as sent.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn mark_sent(&self, id: i64) -> Result<()> {
        self.store.set_status(id, &TerminalStatus::Sent).await
    }

    /// Marks an entry as failed with a detail message.
    ///
    /// # Errors
    ///
    /// Returns an error if the store write fails.
    pub async fn mark_error(&self, id: i64, detail: impl Into<String>) -> Result<()> {
        self.store
            .set_status(id, &TerminalStatus::Error(detail.into()))
            .await
    }
}

impl std::fmt::Debug for SendingPoolManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendingPoolManager").finish_non_exhaustive()
    }
}
