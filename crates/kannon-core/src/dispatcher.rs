//! Dispatcher loop: claim, build, publish.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::broker::{Publisher, SUBJECT_SENDING};
use crate::mailbuilder::MailBuilder;
use crate::model::SendingPoolEmail;
use crate::pb;
use crate::pool::SendingPoolManager;
use crate::{Error, Result};

/// Entries claimed per cycle.
pub const BATCH_SIZE: u32 = 100;

/// Pause between cycles.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What happens to a claimed entry whose payload could not be built or
/// published.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchFailurePolicy {
    /// Leave the entry in `sending`.
    #[default]
    Hold,
    /// Mark the entry `error` with the failure text.
    Fail,
}

impl std::str::FromStr for DispatchFailurePolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hold" => Ok(Self::Hold),
            "fail" => Ok(Self::Fail),
            other => Err(Error::Config(format!(
                "unknown dispatch failure policy: {other}"
            ))),
        }
    }
}

/// Counters of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Entries claimed.
    pub claimed: usize,
    /// Payloads published.
    pub published: usize,
    /// Entries whose build or publish failed.
    pub failed: usize,
}

/// Moves claimed entries onto the `emails.sending` subject.
pub struct Dispatcher {
    pool: SendingPoolManager,
    builder: MailBuilder,
    publisher: Arc<dyn Publisher>,
    policy: DispatchFailurePolicy,
}

impl Dispatcher {
    /// Creates a dispatcher with the [`Hold`](DispatchFailurePolicy::Hold)
    /// policy.
    #[must_use]
    pub fn new(
        pool: SendingPoolManager,
        builder: MailBuilder,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            pool,
            builder,
            publisher,
            policy: DispatchFailurePolicy::default(),
        }
    }

    /// Sets the failure policy.
    #[must_use]
    pub const fn policy(mut self, policy: DispatchFailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Runs one cycle: claim a batch and publish a payload per entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the claim fails, or if marking an entry failed
    /// under [`DispatchFailurePolicy::Fail`] hits the store. Per-entry build
    /// and publish failures are only counted.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let batch = self.pool.prepare_for_send(BATCH_SIZE).await?;
        let mut report = CycleReport {
            claimed: batch.len(),
            ..CycleReport::default()
        };
        debug!(claimed = report.claimed, "Fetched backlog batch");

        for entry in &batch {
            match self.dispatch(entry).await {
                Ok(()) => report.published += 1,
                Err(e) => {
                    report.failed += 1;
                    error!(id = entry.id, to = %entry.email, error = %e, "Cannot dispatch entry");
                    if self.policy == DispatchFailurePolicy::Fail {
                        self.pool.mark_error(entry.id, e.to_string()).await?;
                    }
                }
            }
        }

        Ok(report)
    }

    /// Runs cycles forever, pausing [`POLL_INTERVAL`] between them.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error.
    pub async fn run(&self) -> Result<()> {
        info!(batch_size = BATCH_SIZE, policy = ?self.policy, "Dispatcher started");
        loop {
            let report = self.run_cycle().await?;
            if report.failed > 0 {
                warn!(
                    claimed = report.claimed,
                    failed = report.failed,
                    "Cycle finished with failures"
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn dispatch(&self, entry: &SendingPoolEmail) -> Result<()> {
        let payload = self.builder.prepare_for_send(entry).await?;
        self.publisher
            .publish(SUBJECT_SENDING, pb::encode(&payload))
            .await?;
        info!(to = %payload.to, message_id = %payload.message_id, "Accepted");
        Ok(())
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
