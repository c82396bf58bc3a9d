//! Retry consumer: at-least-once delivery for one cache server.
//!
//! Each consumer owns the durable offset row for its server. A batch is
//! fetched from the hub, dispatched as one key-deletion call, and only
//! then committed; a crash between dispatch and commit re-delivers the
//! batch on restart, which is safe because key deletion is idempotent.

use std::sync::Arc;
use std::time::Instant;

use metrics::{gauge, histogram};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::application::ports::{CacheDispatcher, EventStore};
use crate::domain::InvalidationEvent;

use super::backoff::Backoff;
use super::config::ConsumerConfig;
use super::hub::{FetchError, FetchLimits, SubscriptionHub};

const METRIC_CONSUMER_LAST_SEQ: &str = "spurgo_consumer_last_seq";
const METRIC_DISPATCH_MS: &str = "spurgo_dispatch_ms";

pub struct RetryConsumer {
    hub: Arc<SubscriptionHub>,
    store: Arc<dyn EventStore>,
    dispatcher: Arc<dyn CacheDispatcher>,
    server_id: i64,
    server_name: String,
    retention_nudge: Arc<Notify>,
    config: ConsumerConfig,
}

impl RetryConsumer {
    pub fn new(
        hub: Arc<SubscriptionHub>,
        store: Arc<dyn EventStore>,
        dispatcher: Arc<dyn CacheDispatcher>,
        server_id: i64,
        retention_nudge: Arc<Notify>,
        config: ConsumerConfig,
    ) -> Self {
        let server_name = dispatcher.server_name(server_id);
        Self {
            hub,
            store,
            dispatcher,
            server_id,
            server_name,
            retention_nudge,
            config,
        }
    }

    /// Run until `cancel` fires. Never skips an event: either the batch
    /// is delivered and the offset advances, or the consumer keeps
    /// retrying and the lag is visible on the offset gauge.
    pub async fn run(self, cancel: CancellationToken) {
        let Some(last_seq) = self.load_offset(&cancel).await else {
            return;
        };
        info!(server = %self.server_name, last_seq, "Retry consumer started");

        let limits = FetchLimits {
            max_count: self.config.fetch_limit,
            max_bytes: self.config.fetch_max_bytes,
        };
        let mut subscription = self.hub.subscribe(last_seq + 1, limits);
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);

        loop {
            let batch = match subscription.fetch(&cancel).await {
                Ok(batch) => batch,
                Err(FetchError::Cancelled) => return,
                Err(FetchError::Store(err)) => {
                    warn!(server = %self.server_name, error = %err, "Fetch failed; backing off");
                    if !self.sleep(&cancel, &mut backoff).await {
                        return;
                    }
                    continue;
                }
            };
            backoff.reset();

            let Some(last) = batch.last() else {
                continue;
            };
            let batch_last_seq = last.sequence();

            if !self.dispatch_batch(&cancel, &batch).await {
                return;
            }
            if !self.commit_offset(&cancel, batch_last_seq).await {
                return;
            }
        }
    }

    /// Read the committed offset, writing an initial zero row when the
    /// server has none. Retries until success; `None` on cancellation.
    async fn load_offset(&self, cancel: &CancellationToken) -> Option<i64> {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);
        loop {
            match self.store.get_last_sequence(&self.server_name).await {
                Ok(Some(last_seq)) => {
                    self.record_offset(last_seq);
                    return Some(last_seq);
                }
                Ok(None) => {
                    if self.commit_offset(cancel, 0).await {
                        return Some(0);
                    }
                    return None;
                }
                Err(err) => {
                    warn!(server = %self.server_name, error = %err, "Failed to read offset; backing off");
                }
            }
            if !self.sleep(cancel, &mut backoff).await {
                return None;
            }
        }
    }

    /// Deliver the batch's keys, retrying indefinitely with capped
    /// backoff. Returns false only on cancellation.
    async fn dispatch_batch(
        &self,
        cancel: &CancellationToken,
        batch: &[InvalidationEvent],
    ) -> bool {
        let keys: Vec<String> = batch
            .iter()
            .flat_map(InvalidationEvent::keys)
            .map(str::to_string)
            .collect();

        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);
        loop {
            let dispatch_started_at = Instant::now();
            let attempt = tokio::time::timeout(
                self.config.dispatch_timeout,
                self.dispatcher.delete_keys(self.server_id, keys.clone()),
            )
            .await;
            histogram!(METRIC_DISPATCH_MS, "server_name" => self.server_name.clone())
                .record(dispatch_started_at.elapsed().as_secs_f64() * 1000.0);

            match attempt {
                Ok(Ok(())) => {
                    debug!(
                        server = %self.server_name,
                        events = batch.len(),
                        keys = keys.len(),
                        "Invalidation batch dispatched"
                    );
                    return true;
                }
                Ok(Err(err)) => {
                    warn!(server = %self.server_name, error = %err, "Dispatch failed; backing off");
                }
                Err(_) => {
                    warn!(server = %self.server_name, "Dispatch timed out; backing off");
                }
            }
            if !self.sleep(cancel, &mut backoff).await {
                return false;
            }
        }
    }

    /// Durably advance the offset, retrying indefinitely. The batch is
    /// not re-dispatched while the commit retries. Returns false only on
    /// cancellation.
    async fn commit_offset(&self, cancel: &CancellationToken, seq: i64) -> bool {
        let mut backoff = Backoff::new(self.config.backoff_base, self.config.backoff_cap);
        loop {
            match self.store.set_last_sequence(&self.server_name, seq).await {
                Ok(()) => {
                    self.record_offset(seq);
                    self.retention_nudge.notify_one();
                    return true;
                }
                Err(err) => {
                    warn!(server = %self.server_name, error = %err, "Offset commit failed; backing off");
                }
            }
            if !self.sleep(cancel, &mut backoff).await {
                return false;
            }
        }
    }

    fn record_offset(&self, seq: i64) {
        gauge!(METRIC_CONSUMER_LAST_SEQ, "server_name" => self.server_name.clone())
            .set(seq as f64);
    }

    /// Backoff sleep that loses the race against cancellation.
    async fn sleep(&self, cancel: &CancellationToken, backoff: &mut Backoff) -> bool {
        let delay = backoff.next_delay();
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }
}
