//! Sequencer: turns freshly inserted events into the global sequence.
//!
//! One long-running task scans the store for events whose `seq` is still
//! null, assigns consecutive sequence numbers in id order, persists the
//! assignment through the store's conditional bulk update, and publishes
//! each pass to the hub as one atomic batch.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{EventStore, StoreError};

use super::SubscriptionHub;
use super::backoff::Backoff;
use super::config::SequencerConfig;

const METRIC_SEQUENCER_PASS_MS: &str = "spurgo_sequencer_pass_ms";

pub struct Sequencer {
    store: Arc<dyn EventStore>,
    hub: Arc<SubscriptionHub>,
    wake: Arc<Notify>,
    config: SequencerConfig,
}

impl Sequencer {
    pub fn new(
        store: Arc<dyn EventStore>,
        hub: Arc<SubscriptionHub>,
        wake: Arc<Notify>,
        config: SequencerConfig,
    ) -> Self {
        Self {
            store,
            hub,
            wake,
            config,
        }
    }

    /// Run until `cancel` fires. Wakes on [`Notify`] signals (coalesced),
    /// on the fallback scan timer, and after error backoff.
    pub async fn run(self, cancel: CancellationToken) {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);

        let Some(mut next_seq) = self.bootstrap(&cancel, &mut backoff).await else {
            return;
        };
        info!(next_seq, "Sequencer started");

        loop {
            match self.drain(&mut next_seq).await {
                Ok(assigned) => {
                    backoff.reset();
                    if assigned > 0 {
                        debug!(assigned, next_seq, "Sequencer pass complete");
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Sequencer pass failed; backing off");
                    let delay = backoff.next_delay();
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                    if matches!(err, StoreError::SequenceConflict) {
                        // Another writer numbered some of our rows; the
                        // in-memory cursor is stale. Reload before the
                        // next pass.
                        match self.bootstrap(&cancel, &mut backoff).await {
                            Some(seq) => next_seq = seq,
                            None => return,
                        }
                    }
                    continue;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = self.wake.notified() => {}
                _ = tokio::time::sleep(self.config.scan_interval) => {}
            }
        }
    }

    /// Load the tail of the sequenced log into the ring and compute the
    /// next sequence number. Retries transient store errors until
    /// success; returns `None` on cancellation.
    async fn bootstrap(&self, cancel: &CancellationToken, backoff: &mut Backoff) -> Option<i64> {
        loop {
            match self.store.get_last_events(self.config.reload_limit).await {
                Ok(recent) => {
                    let next_seq = recent.last().map_or(1, |event| event.sequence() + 1);
                    self.hub.install(recent);
                    backoff.reset();
                    return Some(next_seq);
                }
                Err(err) => {
                    warn!(error = %err, "Failed to load sequenced tail; backing off");
                }
            }
            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Run passes until a partial page signals that the backlog is
    /// drained. Returns the total number of events sequenced.
    async fn drain(&self, next_seq: &mut i64) -> Result<usize, StoreError> {
        let mut total = 0;
        loop {
            let assigned = self.run_pass(next_seq).await?;
            total += assigned;
            if (assigned as u64) < self.config.scan_limit {
                return Ok(total);
            }
        }
    }

    /// One pass: fetch, number, persist, publish.
    async fn run_pass(&self, next_seq: &mut i64) -> Result<usize, StoreError> {
        let pass_started_at = Instant::now();

        let mut events = self
            .store
            .get_unprocessed_events(self.config.scan_limit)
            .await?;
        if events.is_empty() {
            return Ok(0);
        }

        let mut seq = *next_seq;
        for event in &mut events {
            event.seq = Some(seq);
            seq += 1;
        }

        // The conditional update rejects the whole batch if any row was
        // sequenced concurrently, so the cursor only moves on success.
        self.store.update_sequences(&events).await?;
        *next_seq = seq;

        self.hub.publish(&events);

        histogram!(METRIC_SEQUENCER_PASS_MS)
            .record(pass_started_at.elapsed().as_secs_f64() * 1000.0);
        Ok(events.len())
    }
}
