//! Retention job: trims events every consumer has crossed.
//!
//! The deletion cutoff never passes the minimum committed offset across
//! all configured servers, so a lagging consumer pins the log. Deletes
//! run in bounded batches; passes repeat while they make progress and
//! otherwise wait for the timer or an offset-commit nudge.

use std::sync::Arc;

use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{EventStore, StoreError};

use super::SubscriptionHub;
use super::config::RetentionConfig;

pub struct RetentionJob {
    store: Arc<dyn EventStore>,
    hub: Arc<SubscriptionHub>,
    server_names: Vec<String>,
    nudge: Arc<Notify>,
    config: RetentionConfig,
}

impl RetentionJob {
    pub fn new(
        store: Arc<dyn EventStore>,
        hub: Arc<SubscriptionHub>,
        server_names: Vec<String>,
        nudge: Arc<Notify>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            store,
            hub,
            server_names,
            nudge,
            config,
        }
    }

    /// Run until `cancel` fires. The job is advisory and idempotent:
    /// store errors simply wait for the next wake-up.
    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
                _ = self.nudge.notified() => {}
            }

            loop {
                match self.run_pass().await {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(err) => {
                        warn!(error = %err, "Retention pass failed; waiting for next tick");
                        break;
                    }
                }
            }
        }
    }

    /// One pass. Returns true when events were deleted, so the caller
    /// can immediately try again.
    async fn run_pass(&self) -> Result<bool, StoreError> {
        let Some(min_committed) = self.min_committed_offset().await? else {
            return Ok(false);
        };
        let Some(min_seq) = self.store.get_min_sequence().await? else {
            return Ok(false);
        };
        let Some(head_seq) = self.hub.head_seq() else {
            return Ok(false);
        };

        let total = head_seq.saturating_sub(min_seq) + 1;
        if total <= self.config.max_total_events as i64 {
            return Ok(false);
        }

        let cutoff = min_committed.min(min_seq + self.config.delete_batch_size as i64);
        if cutoff <= min_seq {
            debug!(min_seq, min_committed, "Retention blocked by a lagging consumer");
            return Ok(false);
        }

        self.store.delete_events_before(cutoff).await?;
        info!(cutoff, min_seq, total, "Trimmed processed events");
        Ok(true)
    }

    /// Minimum committed offset across all configured servers. `None`
    /// when any server has no offset row yet: a consumer that has not
    /// even initialized must not lose events.
    async fn min_committed_offset(&self) -> Result<Option<i64>, StoreError> {
        let mut min_committed = i64::MAX;
        for server_name in &self.server_names {
            match self.store.get_last_sequence(server_name).await? {
                Some(last_seq) => min_committed = min_committed.min(last_seq),
                None => return Ok(None),
            }
        }
        if self.server_names.is_empty() {
            return Ok(None);
        }
        Ok(Some(min_committed))
    }
}
